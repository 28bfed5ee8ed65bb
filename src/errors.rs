use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use reqwest::StatusCode;
use thiserror::Error;
use uuid::Uuid;

/// Errors that cross the orchestrator boundary or the admin surface.
///
/// Calculation and per-symbol provider failures never appear here; they are
/// folded into run counters and the durable run record instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("a batch run is already in progress")]
    AlreadyRunning,
    #[error("no active portfolios to process")]
    NoActivePortfolios,
    #[error("portfolio {0} does not exist or is inactive")]
    ScopeNotFound(Uuid),
    #[error("run cancelled")]
    Cancelled,
    #[error("Database error: {0}")]
    Db(sqlx::Error),
    #[error("Storage error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found")]
    NotFound,
    #[error("Rate limited by external provider")]
    RateLimited,
    #[error("External error: {0}")]
    External(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::AlreadyRunning => {
                (StatusCode::CONFLICT, "A batch run is already in progress").into_response()
            }
            AppError::NoActivePortfolios => {
                (StatusCode::OK, "No active portfolios to process").into_response()
            }
            AppError::ScopeNotFound(id) => (
                StatusCode::NOT_FOUND,
                format!("Portfolio {} does not exist or is inactive", id),
            )
                .into_response(),
            AppError::Cancelled => (StatusCode::ACCEPTED, "Run cancelled").into_response(),
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::RateLimited => {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", HeaderValue::from_static("60"));
                (StatusCode::TOO_MANY_REQUESTS, headers, "Rate limited").into_response()
            }
            AppError::External(msg) => (StatusCode::BAD_GATEWAY, msg).into_response(),
            AppError::Db(_) | AppError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        AppError::Db(value)
    }
}
