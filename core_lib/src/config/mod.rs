pub mod declarations;
pub mod settings;

pub use declarations::{load_declarations, parse_declarations, CheckDeclaration};
pub use settings::{
    AlertsConfig, AppConfig, CacheConfig, ChecksConfig, CorsConfig, FetchConfig, ServerConfig,
};
