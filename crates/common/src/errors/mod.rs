//! Error types for the DocuLink engine
//!
//! Provides distinct error types for the failure modes the core can
//! surface to callers. Data-quality problems are not errors: a duplicate
//! document is an `IngestOutcome` variant, an unlinkable document is a
//! Flagged terminal state, and a currency without a conversion path is a
//! data condition consumed by the alert rules.

use thiserror::Error;

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// A mandatory field could not be recovered from the extraction output.
    /// The document is not created.
    #[error("Extraction incomplete: required field '{field}' unrecoverable")]
    ExtractionIncomplete { field: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Alert not found: {id}")]
    AlertNotFound { id: String },

    /// Requested link target is missing, of a non-linkable category, or
    /// would form a cycle.
    #[error("Invalid link target: {message}")]
    InvalidLinkTarget { message: String },

    /// A transaction precondition was violated between read and write
    /// (e.g. the subject document was deleted underneath it). Callers
    /// should retry or abandon.
    #[error("Concurrent modification: {message}")]
    ConcurrentModification { message: String },

    /// Transient storage failure that survived bounded retry. No partial
    /// state was committed.
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether the caller may retry the triggering event as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::StorageUnavailable { .. } | CoreError::ConcurrentModification { .. }
        )
    }
}
