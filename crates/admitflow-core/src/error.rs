//! Admitflow error taxonomy.
//!
//! API-facing operations return explicit kinds so callers can branch on them;
//! the sweep loop never surfaces these to users, only to logs.

use thiserror::Error;

/// All errors produced by Admitflow crates.
#[derive(Debug, Error)]
pub enum AdmitflowError {
    /// Bad configuration or rule setup — rejected before any store mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An optimistic update lost a race. Non-fatal: retry or ignore.
    #[error("Concurrency conflict: {0}")]
    Conflict(String),

    /// The deadline store is unreachable or rejected an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// A notification could not be delivered. Logged and retried next cycle.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Config file problems (missing, unreadable, malformed).
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, AdmitflowError>;

impl AdmitflowError {
    /// Whether a caller may safely retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Dispatch(_) | Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(AdmitflowError::Conflict("lost race".into()).is_retryable());
        assert!(AdmitflowError::Dispatch("timeout".into()).is_retryable());
        assert!(!AdmitflowError::Validation("bad offset".into()).is_retryable());
    }
}
