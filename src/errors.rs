#[cfg(feature = "server")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
#[cfg(feature = "server")]
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SentinelError>;

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Unsupported TLD: {0}")]
    UnsupportedTld(String),

    #[error("Network timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] tokio::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("WHOIS error: {0}")]
    Whois(String),

    #[error("Response too large")]
    ResponseTooLarge,

    #[error("Invalid UTF-8 in response")]
    InvalidUtf8,

    #[error("No similarity data found")]
    NoSimilarityData,

    #[error("Worker pool needs at least one worker")]
    InvalidPool,

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Incomplete batch: received {received} of {expected} results")]
    IncompleteBatch { received: usize, expected: usize },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<tokio::time::error::Elapsed> for SentinelError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SentinelError::Timeout
    }
}

#[cfg(feature = "server")]
impl IntoResponse for SentinelError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            SentinelError::InvalidDomain(_) | SentinelError::InvalidThreshold(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            SentinelError::UnsupportedTld(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            SentinelError::NoSimilarityData => (StatusCode::NOT_FOUND, self.to_string()),
            SentinelError::Timeout => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            SentinelError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            SentinelError::Feed(_) | SentinelError::HttpError(_) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
