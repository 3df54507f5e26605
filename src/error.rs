//! Error types for authorization and persona synthesis

use std::time::Duration;
use thiserror::Error;

/// Crate result type
pub type Result<T> = std::result::Result<T, AuthzError>;

/// Authorization errors
#[derive(Error, Debug)]
pub enum AuthzError {
    /// Request rejected before any external call was made
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Uniqueness violation against existing persona policies
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Policy Authority call failed
    #[error("Policy authority error during {operation}: {message}")]
    Authority { operation: String, message: String },

    /// Search engine call failed
    #[error("Search engine error: {0}")]
    Search(String),

    /// Access decision was negative
    #[error("Unauthorized: {principal} is not allowed to {action} on {target}")]
    Unauthorized {
        principal: String,
        action: String,
        target: String,
    },

    /// Required object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// External call exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON encode/decode failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Shorthand for an authority failure
    pub fn authority(operation: impl Into<String>, message: impl ToString) -> Self {
        AuthzError::Authority {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Whether a retry could succeed without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthzError::Authority { .. } | AuthzError::Search(_) | AuthzError::Timeout { .. }
        )
    }
}
