use std::time::Duration;

use thiserror::Error;

/// Application-wide error types for Harvest.
#[derive(Error, Debug)]
pub enum AppError {
    /// Run setup rejected: bad configuration values or an empty URL set.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration file could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// HTTP request failed below the status line (protocol or body error).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Server answered with a non-2xx status.
    #[error("HTTP error: HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Operation exceeded its time budget.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Circuit breaker rejected the call without executing it.
    #[error("Circuit breaker '{name}' is open, retry after {}s", .retry_after.as_secs())]
    CircuitOpen { name: String, retry_after: Duration },

    /// Page content could not be turned into a record.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// Persisting the batch or report failed.
    #[error("Sink error: {0}")]
    SinkError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::HttpError(_)
                | AppError::HttpStatus { .. }
                | AppError::NetworkError(_)
                | AppError::Timeout(_)
        )
    }

    /// Returns true if this error should count toward opening a circuit.
    ///
    /// Only signs of an unhealthy host count: a dead link (4xx other than
    /// 429) says nothing about the next URL on the same host.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            AppError::HttpError(_) | AppError::NetworkError(_) | AppError::Timeout(_) => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::SinkError(e.to_string())
    }
}
