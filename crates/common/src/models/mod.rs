//! Data models for the DocuLink engine
//!
//! `DocumentRecord` is owned by the storage collaborator;
//! `UtilizationState` and `AlertRecord` are derived caches owned by the
//! core, fully rebuildable from the current document set.

pub mod alert;
pub mod document;
pub mod utilization;

pub use alert::{AlertLevel, AlertRecord, RuleKind};
pub use document::{source_fingerprint, DocumentCategory, DocumentRecord, DocumentStatus};
pub use utilization::UtilizationState;
