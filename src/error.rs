use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("GitHub authentication failed: {0}")]
    Authentication(String),

    #[error("Transient GitHub API failure: {0}")]
    Transient(String),

    #[error("GitHub API rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Rate limit wait of {}s exceeds the {}s ceiling", wait.as_secs(), ceiling.as_secs())]
    RateLimitCeiling { wait: Duration, ceiling: Duration },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<AppError> },

    #[error("GitHub API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors the transport retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::RateLimited { .. })
    }

    /// Errors that abort the whole run rather than one repository or issue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Authentication(_) | AppError::RateLimitCeiling { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
