use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors surfaced to callers of the broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The question failed validation. No downstream call was made.
    #[error("{0}")]
    InvalidInput(String),

    /// The request body could not be decoded.
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// The generation service failed or every retry was exhausted.
    #[error("Failed to generate response: {0}")]
    GenerationFailure(String),

    /// The cache store failed. The broker logs it and carries on uncached.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl BrokerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BrokerError::InvalidInput(_) | BrokerError::Malformed(_) => StatusCode::BAD_REQUEST,
            BrokerError::GenerationFailure(_) => StatusCode::BAD_GATEWAY,
            BrokerError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

/// Outcome of a single failed generation attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// Throttling, timeouts, unavailability. Worth retrying.
    #[error("transient generation failure: {0}")]
    Transient(String),

    /// Validation, access or model errors. Retrying cannot help.
    #[error("generation failed: {0}")]
    Fatal(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

#[derive(Error, Debug)]
#[error("retrieval failed: {0}")]
pub struct RetrievalError(pub String);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<CacheError> for BrokerError {
    fn from(err: CacheError) -> Self {
        BrokerError::CacheUnavailable(err.to_string())
    }
}
