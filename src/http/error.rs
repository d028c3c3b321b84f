/// Maps `ScreenerError` onto the status codes documented for the HTTP
/// adapter. An unmapped panic is caught by a `tower-http` layer upstream;
/// this type only ever sees errors the core itself returned.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::ScreenerError;

/// `status_override` exists only for `/validate-credentials`: an
/// `AuthFailure` there means the submitted credentials were themselves
/// rejected, which the adapter surfaces as 401. Every other call site hits
/// an already-validated broker, so an `AuthFailure` there means the caller
/// skipped validation or the session lapsed — a client-side ordering
/// mistake, surfaced as 400 by the default mapping below.
pub struct AppError {
    error: ScreenerError,
    status_override: Option<StatusCode>,
}

impl From<ScreenerError> for AppError {
    fn from(e: ScreenerError) -> Self {
        AppError { error: e, status_override: None }
    }
}

impl AppError {
    /// Use only when wrapping the result of validating freshly submitted
    /// credentials.
    pub fn credential_failure(e: ScreenerError) -> Self {
        AppError { error: e, status_override: Some(StatusCode::UNAUTHORIZED) }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_override.unwrap_or_else(|| match &self.error {
            ScreenerError::AuthFailure(_) => StatusCode::BAD_REQUEST,
            ScreenerError::NotInitialised => StatusCode::BAD_REQUEST,
            ScreenerError::AlreadyInitialised => StatusCode::CONFLICT,
            ScreenerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ScreenerError::InstrumentNotFound(_) => StatusCode::NOT_FOUND,
            ScreenerError::BrokerError { .. } | ScreenerError::HttpError(_) | ScreenerError::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
            ScreenerError::SqliteError(_)
            | ScreenerError::StoreFailure(_)
            | ScreenerError::FileError(_)
            | ScreenerError::DeserializationError(_)
            | ScreenerError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        });

        let body = Json(json!({
            "error": {
                "kind": self.error.error_code(),
                "message": self.error.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
