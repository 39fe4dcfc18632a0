use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

/// Classification of a failed call to the data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// 401/403: token missing, invalid or expired. Never retried.
    Auth,
    /// Transport failure (DNS, refused connection, broken body). Never retried.
    Network,
    /// The hard per-request deadline elapsed. Never retried.
    Timeout,
    /// 5xx, retried with linear backoff before surfacing.
    Server,
    /// Any other non-success response or an unreadable payload.
    Api,
}

impl ApiErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ApiErrorKind::Auth => "AUTH_ERROR",
            ApiErrorKind::Network => "NETWORK_ERROR",
            ApiErrorKind::Timeout => "TIMEOUT_ERROR",
            ApiErrorKind::Server => "SERVER_ERROR",
            ApiErrorKind::Api => "API_ERROR",
        }
    }

    /// Failures for which a labelled offline dataset may stand in.
    pub fn is_connectivity(self) -> bool {
        matches!(self, ApiErrorKind::Network | ApiErrorKind::Timeout)
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A classified data-API failure. `status` is 0 when no HTTP response was received.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{code} ({status}): {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    pub status: u16,
    pub code: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>, status: u16) -> Self {
        Self {
            kind,
            message: message.into(),
            status,
            code: kind.code().to_string(),
            details: serde_json::Value::Null,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message, 0)
    }

    pub fn timeout() -> Self {
        Self::new(ApiErrorKind::Timeout, "request timed out", 0)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Invalid input: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Screening run superseded by a newer run")]
    Superseded,

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(vec![message.into()])
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match &self {
            AppError::Api(e) => {
                let status = match e.kind {
                    ApiErrorKind::Auth => StatusCode::UNAUTHORIZED,
                    ApiErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, serde_json::json!({ "error": e }))
            }
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": "VALIDATION_ERROR", "errors": errors }),
            ),
            AppError::Superseded => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": "SUPERSEDED", "message": self.to_string() }),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "INTERNAL_ERROR", "message": self.to_string() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}
