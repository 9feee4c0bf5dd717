//! Core library for the health-check aggregator: check engine, result cache and
//! route handlers for the HTTP server.

pub mod alert;
pub mod cache;
pub mod checks;
pub mod config;
pub mod error;
pub mod fanout;
pub mod fetch;
pub mod handlers;
pub mod middleware;
pub mod orchestrator;

pub use alert::{AlertContext, AlertSink, LogAlertSink, MemoryAlertSink, WebhookAlertSink};
pub use cache::{CacheEntry, CacheStats, ResultCache};
pub use checks::{CheckContract, CheckOutcome, CheckRegistry, ContractRegistry};
pub use crate::config::AppConfig;
pub use error::{AppError, Result};
pub use fanout::FanOut;
pub use fetch::Fetcher;
pub use handlers::routes::create_routes;
pub use middleware::cors::cors_layer_from_config;
pub use middleware::logging::logging_layer;
pub use orchestrator::{CheckReport, Orchestrator};

use axum::Router;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::signal;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub app_name: String,
    pub version: String,
    pub orchestrator: Arc<Orchestrator>,
    pub version_file: PathBuf,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            app_name: "watchpost".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            orchestrator: Arc::new(orchestrator),
            version_file: PathBuf::from("version.json"),
        }
    }

    pub fn with_version_file(mut self, version_file: PathBuf) -> Self {
        self.version_file = version_file;
        self
    }

    /// Loads the check declarations and wires every collaborator from config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let declarations = crate::config::load_declarations(&config.checks.file)?;

        let fetcher = Fetcher::new(&config.fetch)?;
        let fanout = FanOut::bounded(config.checks.max_concurrency);
        let contracts = ContractRegistry::with_builtins(fetcher, fanout)?;
        let registry = CheckRegistry::load(
            &declarations,
            &contracts,
            config.checks.default_ttl_seconds,
        )?;

        let alerts: Arc<dyn AlertSink> = match &config.alerts.webhook_url {
            Some(url) => {
                info!("Alerts will be posted to {}", url);
                Arc::new(
                    WebhookAlertSink::new(url)
                        .map_err(|e| AppError::Configuration(format!("alert webhook: {}", e)))?,
                )
            }
            None => Arc::new(LogAlertSink),
        };

        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            ResultCache::new(config.cache.clone()),
            alerts,
        )
        .with_refresh_secret(config.checks.refresh_secret.clone());

        Ok(Self::new(orchestrator).with_version_file(config.version_file.clone()))
    }
}

pub fn create_app(state: AppState) -> Router {
    create_app_with_config(state, &AppConfig::default())
}

pub fn create_app_with_config(state: AppState, config: &AppConfig) -> Router {
    Router::new()
        .merge(create_routes())
        .layer(cors_layer_from_config(&config.cors))
        .layer(logging_layer())
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<()> {
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
