//! Bearer-token auth and application-scope extraction (spec.md 6): "Auth
//! (when enabled): bearer token in `Authorization`; the application scope
//! may also be passed as header `X-Client-App-ID`."

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::config::AuthConfig;
use crate::error::Error;

pub const APP_ID_HEADER: &str = "x-client-app-id";

/// When `config.token` is set, rejects requests whose `Authorization` header
/// does not present `Bearer <token>`. A disabled (`None`) token makes this a
/// no-op, matching spec.md 6's "when enabled".
pub async fn require_bearer_token(
    State(config): State<std::sync::Arc<AuthConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    if let Some(expected) = &config.token {
        let presented = request
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected.as_str()) {
            return Err(Error::PolicyDenied("missing or invalid bearer token".into()));
        }
    }
    Ok(next.run(request).await)
}

pub fn application_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(APP_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}
