use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub checks: ChecksConfig,
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub alerts: AlertsConfig,
    pub cors: CorsConfig,
    pub version_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksConfig {
    /// TOML file declaring `[checks.<project>.<name>]` tables.
    pub file: PathBuf,
    pub default_ttl_seconds: u64,
    /// Shared secret accepted as `?refresh=` to bypass the cache.
    pub refresh_secret: Option<String>,
    /// Ceiling on simultaneous outbound probes inside built-in checks. 0 = unbounded.
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub base_delay_millis: u64,
    pub max_delay_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlertsConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            checks: ChecksConfig::default(),
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
            alerts: AlertsConfig::default(),
            cors: CorsConfig::default(),
            version_file: PathBuf::from("version.json"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("checks.toml"),
            default_ttl_seconds: 60,
            refresh_secret: None,
            max_concurrency: 0,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            max_attempts: 4,
            base_delay_millis: 200,
            max_delay_millis: 5000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl AppConfig {
    /// Defaults, then `config.toml` if present, then `WATCHPOST__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let default_file = Path::new("config.toml");
        if default_file.exists() {
            Self::load_from(Some(default_file))
        } else {
            Self::load_from(None)
        }
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("WATCHPOST")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("Server port cannot be 0".to_string()));
        }

        if self.checks.default_ttl_seconds == 0 {
            return Err(ConfigError::Message(
                "Default check TTL must be greater than 0".to_string(),
            ));
        }

        if matches!(&self.checks.refresh_secret, Some(secret) if secret.is_empty()) {
            return Err(ConfigError::Message(
                "Refresh secret cannot be empty when set".to_string(),
            ));
        }

        if self.fetch.max_attempts == 0 {
            return Err(ConfigError::Message(
                "Fetch max attempts must be greater than 0".to_string(),
            ));
        }

        if self.fetch.timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Fetch timeout must be greater than 0".to_string(),
            ));
        }

        if self.fetch.base_delay_millis > self.fetch.max_delay_millis {
            return Err(ConfigError::Message(
                "Fetch base delay cannot exceed max delay".to_string(),
            ));
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigError::Message(
                "Cache max entries must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
