//! Shared error type for the catalog, pool, router, manager and resharder.
//!
//! Every fallible operation in this crate returns [`Result<T>`]. HTTP
//! surfaces (Manager and Router) convert an [`Error`] into the
//! `{"error":{"code":..,"message":..}}` response shape via `IntoResponse`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("in use: {0}")]
    InUse(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("backend error on shard {shard_id}: {message}")]
    BackendError { shard_id: String, message: String },

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable code for the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::InUse(_) => "IN_USE",
            Error::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Error::PolicyDenied(_) => "POLICY_DENIED",
            Error::RateLimited(_) => "RATE_LIMITED",
            Error::BackendError { .. } => "BACKEND_ERROR",
            Error::Unavailable(_) => "UNAVAILABLE",
            Error::Cancelled(_) => "CANCELLED",
            Error::Timeout(_) => "TIMEOUT",
            Error::BadRequest(_) => "BAD_REQUEST",
            Error::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::InUse(_) => StatusCode::CONFLICT,
            Error::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PolicyDenied(_) => StatusCode::FORBIDDEN,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::BackendError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            // 499 (client closed request) is the closest fit for a cancelled
            // deadline; axum's StatusCode accepts any valid u16.
            Error::Cancelled(_) => StatusCode::from_u16(499).unwrap(),
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if matches!(self, Error::Internal(_) | Error::InvariantViolation(_)) {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (self.status(), body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Error::Timeout("connection pool exhausted".into()),
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Error::Unavailable(format!("backend unreachable: {err}"))
            }
            other => Error::BackendError {
                shard_id: "unknown".into(),
                message: other.to_string(),
            },
        }
    }
}

impl From<etcd_client::Error> for Error {
    fn from(err: etcd_client::Error) -> Self {
        Error::Unavailable(format!("metadata store error: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("serialization error: {err}"))
    }
}
