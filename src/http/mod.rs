//! HTTP surfaces for the Manager and Router binaries (spec.md 6).

pub mod auth;
pub mod manager;
pub mod router;

use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};

use crate::config::AuthConfig;

/// CORS permissive enough for admin tooling and the smart client's refresh
/// calls, matching the grounding codebase's `CorsLayer::new().allow_*(Any)`.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn auth_state(config: &AuthConfig) -> Arc<AuthConfig> {
    Arc::new(config.clone())
}
