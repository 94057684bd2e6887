//! Error types for newsdex.
//!
//! This module defines a unified error enum covering configuration, storage,
//! index invariants, collaborator failures and build coordination.

use thiserror::Error;

/// Unified error type for newsdex.
///
/// All fallible functions in the workspace return `Result<T, AppError>`.
/// Errors are represented and propagated, never turned into panics.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Vector store and metadata table errors
    #[error("Index error: {0}")]
    Index(String),

    /// Artifact store (snapshots, manifests, pointer) errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// A vector's dimension disagrees with the established index dimension.
    #[error("FATAL: dimension mismatch (expected {expected}, got {actual})")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Structural invariant violated (row alignment, contiguity, norms).
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Embedding collaborator failed for a whole batch
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Document source collaborator errors
    #[error("Source error: {0}")]
    Source(String),

    /// Another build already holds the single-flight guard
    #[error("An index build is already in progress")]
    BuildInProgress,

    /// Requested version is not retained in the artifact store
    #[error("Version not found: {0}")]
    VersionNotFound(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether this error reflects a broken structural invariant rather than
    /// an environmental failure.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            AppError::Invariant(_) | AppError::DimensionMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_message() {
        let err = AppError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("FATAL: dimension mismatch"));
        assert!(msg.contains("384"));
        assert!(msg.contains("768"));
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_serde_json_conversion() {
        let err: AppError = serde_json::from_str::<u32>("not-a-number")
            .unwrap_err()
            .into();
        assert!(matches!(err, AppError::Serialization(_)));
        assert!(!err.is_invariant_violation());
    }
}
