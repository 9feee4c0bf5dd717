//! Main entry point for the watchpost binary

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use watchpost_core::{create_app_with_config, run_server, AppConfig, AppError, AppState, CheckReport};

/// Health-check aggregator. Serves check results over HTTP, or runs the
/// selected checks once when a project is given.
#[derive(Debug, Parser)]
#[command(name = "watchpost", version, about)]
struct Cli {
    /// Run every check of this project once and exit
    project: Option<String>,

    /// Run only this check of the project
    name: Option<String>,

    /// Settings file (defaults to ./config.toml when present)
    #[arg(short, long, env = "WATCHPOST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(Some(path.as_path())),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("Checks file: {}", config.checks.file.display());

    let state = AppState::from_config(&config).context("Failed to load checks")?;
    info!(
        "{} v{} with {} checks",
        state.app_name,
        state.version,
        state.orchestrator.registry().len()
    );

    match cli.project {
        Some(project) => run_once(&state, &project, cli.name.as_deref()).await,
        None => {
            let addr: SocketAddr = config
                .bind_address()
                .parse()
                .context("Invalid bind address")?;

            let app = create_app_with_config(state, &config);
            run_server(app, addr).await?;

            info!("Server shutdown complete");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Exit code 0 when every selected check passes, 1 when one fails and 2 when
/// the project or check does not exist.
async fn run_once(state: &AppState, project: &str, name: Option<&str>) -> Result<ExitCode> {
    let orchestrator = &state.orchestrator;

    let reports = match name {
        Some(name) => orchestrator
            .run_check(project, name, &BTreeMap::new(), None)
            .await
            .map(|report| vec![report]),
        None => orchestrator.run_checks_by_project(project).await,
    };

    let reports = match reports {
        Ok(reports) => reports,
        Err(AppError::NotFound(msg)) => {
            eprintln!("{}", msg);
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };

    for report in &reports {
        print_report(report)?;
    }

    if reports.iter().all(|r| r.success) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn print_report(report: &CheckReport) -> Result<()> {
    let status = if report.success { "OK" } else { "FAILED" };
    println!(
        "{}/{}: {} ({} ms)",
        report.info.project, report.info.name, status, report.duration
    );
    println!("{}", report.info.description);
    println!("{}", serde_json::to_string_pretty(&report.data)?);
    println!();
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let default_level = if cfg!(debug_assertions) { "debug" } else { "info" };

        format!(
            "watchpost={level},watchpost_core={level},tower_http=info",
            level = default_level
        )
        .into()
    });

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let is_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    if is_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.pretty())
            .init();
    }
}
