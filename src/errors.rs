use serde::Serialize;

use crate::cache::CacheError;

/// Infrastructure and input errors raised inside the material services.
///
/// Only `ValidationError` is ever returned to consumers of the stock store;
/// every other variant is logged and compensated by the local fallback.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Remote store error: {0}")]
    RemoteError(String),

    #[error("Cache error: {0}")]
    CacheError(
        #[from]
        #[serde(skip)]
        CacheError,
    ),

    #[error("Serialization error: {0}")]
    SerializationError(
        #[from]
        #[serde(skip)]
        serde_json::Error,
    ),

    #[error("Circuit breaker open")]
    CircuitBreakerOpen,

    #[error("Event error: {0}")]
    EventError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Whether the failure came from infrastructure and should be absorbed by the
    /// local fallback rather than shown to the user.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::ValidationError(_) => false,
            Self::RemoteUnavailable(_)
            | Self::RemoteError(_)
            | Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::CircuitBreakerOpen
            | Self::EventError(_) => true,
        }
    }
}
