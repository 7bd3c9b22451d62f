//! Errors for harbor monitor
use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarborError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP request failed with status code 429")]
    RateLimited,

    #[error("HTTP request failed with status code {status}")]
    Upstream { status: u16 },

    #[error("Water classifier error: {0}")]
    Classifier(String),

    #[error("Water classifier timed out")]
    ClassifierTimeout,

    #[error("HTTP client error")]
    HttpClientError(#[from] reqwest::Error),

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Viewer transport error: {0}")]
    Transport(String),

    #[error("Database connection error: {0}")]
    DatabaseConnectionError(String),

    #[error("Database migration error: {0}")]
    MigrationError(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),
}

impl HarborError {
    /// HTTP status class a caller of the report endpoint should see.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HarborError::Validation(_) | HarborError::NotFound(_) => StatusCode::BAD_REQUEST,
            HarborError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            HarborError::DatabaseError(sqlx::Error::RowNotFound) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
