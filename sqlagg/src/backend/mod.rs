//! Execution backends
//!
//! A backend takes a compiled [`SearchRequest`] and returns the engine's raw
//! JSON response. [`MemoryBackend`] evaluates requests over in-memory
//! documents; the HTTP backend lives in the `sqlagg-es` crate.

pub mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use serde_json::Value;

use crate::request::SearchRequest;

/// Errors raised while executing a request
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Unsupported by backend: {0}")]
    Unsupported(String),
}

impl BackendError {
    /// Transport failures, timeouts, throttling and server errors
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Execute a request and return the raw response body
    async fn execute(&self, request: &SearchRequest) -> Result<Value, BackendError>;
}

#[async_trait]
impl<B: ExecutionBackend + ?Sized> ExecutionBackend for std::sync::Arc<B> {
    async fn execute(&self, request: &SearchRequest) -> Result<Value, BackendError> {
        (**self).execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(BackendError::Http("connection reset".into()).is_retryable());
        assert!(BackendError::Timeout("30s".into()).is_retryable());
        assert!(BackendError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(BackendError::Status {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!BackendError::Status {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!BackendError::Decode("bad json".into()).is_retryable());
        assert!(!BackendError::Unsupported("script".into()).is_retryable());
    }

    #[test]
    fn test_status_message() {
        let err = BackendError::Status {
            status: 400,
            body: "parsing_exception".to_string(),
        };
        assert_eq!(err.to_string(), "Backend returned 400: parsing_exception");
    }
}
