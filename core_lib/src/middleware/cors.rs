//! CORS (Cross-Origin Resource Sharing) layer configuration

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::config::CorsConfig;

/// Read-only API: only GET, HEAD and OPTIONS are allowed. `"*"` anywhere in the
/// origin list allows every origin.
pub fn cors_layer_from_config(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("accept"),
        ])
        .max_age(std::time::Duration::from_secs(3600));

    if config.allowed_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    layer.allow_origin(origins)
}
