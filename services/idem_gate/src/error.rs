//! Unified API error type — every 4xx/5xx response is JSON with a consistent shape.
//!
//! ```json
//! { "code": "invalid_idempotency_key", "message": "..." }
//! ```

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use idem_core::HandleError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after_secs: Option<u64>,
    /// Extra headers to include (e.g. Retry-After).
    pub extra_headers: Vec<(String, String)>,
}

impl AppError {
    /// Key-format violations get their own code so clients can tell them
    /// apart from ordinary validation failures.
    pub fn invalid_idempotency_key(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_idempotency_key",
            message: msg.into(),
            retry_after_secs: None,
            extra_headers: vec![],
        }
    }

    pub fn request_in_flight(msg: impl Into<String>, retry_after: u64) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "request_in_flight",
            message: msg.into(),
            retry_after_secs: Some(retry_after),
            extra_headers: vec![("retry-after".into(), retry_after.to_string())],
        }
    }

    pub fn not_found(resource: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: format!("{resource} not found"),
            retry_after_secs: None,
            extra_headers: vec![],
        }
    }

    pub fn unsupported_media_type() -> Self {
        Self {
            status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
            code: "unsupported_media_type",
            message: "content-type must be application/json".into(),
            retry_after_secs: None,
            extra_headers: vec![],
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: msg.into(),
            retry_after_secs: None,
            extra_headers: vec![],
        }
    }
}

impl From<HandleError> for AppError {
    fn from(err: HandleError) -> Self {
        match err {
            HandleError::InvalidKey { .. } => Self::invalid_idempotency_key(err.to_string()),
            HandleError::InFlight { retry_after_secs } => {
                Self::request_in_flight(err.to_string(), retry_after_secs)
            }
            HandleError::Operation(err) => Self::internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code,
            message: self.message,
            retry_after_secs: self.retry_after_secs,
        };
        let mut resp = (self.status, Json(body)).into_response();
        resp.headers_mut()
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        for (k, v) in &self.extra_headers {
            if let (Ok(name), Ok(val)) = (
                k.parse::<axum::http::header::HeaderName>(),
                v.parse::<axum::http::header::HeaderValue>(),
            ) {
                resp.headers_mut().insert(name, val);
            }
        }
        resp
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.status.as_u16(), self.code, self.message)
    }
}

impl std::error::Error for AppError {}
