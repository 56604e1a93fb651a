//! Error types for SQL compilation and execution

use crate::backend::BackendError;

/// Compilation and execution errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Syntax error at {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error("Grouping error: {0}")]
    Grouping(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Invalid argument for {function}: {reason}")]
    InvalidArgument { function: String, reason: String },

    #[error("ORDER BY target not found: {0}")]
    UnresolvedOrderTarget(String),

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("Duplicate column name: {0}")]
    DuplicateName(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl Error {
    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            position,
        }
    }

    pub fn invalid_argument(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            function: function.into(),
            reason: reason.into(),
        }
    }

    /// Stable tag for the error class
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "syntax_error",
            Self::Grouping(_) => "grouping_error",
            Self::UnknownFunction(_) => "unknown_function_error",
            Self::InvalidArgument { .. } => "invalid_argument_error",
            Self::UnresolvedOrderTarget(_) => "unresolved_order_target_error",
            Self::UnresolvedReference(_) => "unresolved_reference_error",
            Self::DuplicateName(_) => "duplicate_name_error",
            Self::Unsupported(_) => "unsupported_error",
            Self::Backend(_) => "backend_error",
        }
    }

    /// Compile-time errors fail identically on every attempt; only some
    /// backend failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
