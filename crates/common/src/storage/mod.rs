//! Storage collaborator boundary
//!
//! The engine consumes storage through `DocumentStore`, a trait of
//! atomic single-record operations. Multi-record atomicity for a
//! transaction is the engine's own responsibility via its per-PO locking
//! discipline. `MemoryStore` is the reference implementation backing all
//! tests; production deployments supply their own.

mod memory;
mod retry;

pub use memory::MemoryStore;
pub use retry::with_retry;

use crate::errors::Result;
use crate::models::{AlertRecord, DocumentCategory, DocumentRecord, UtilizationState};
use async_trait::async_trait;
use uuid::Uuid;

/// Filter for document listings.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub category: Option<DocumentCategory>,
    pub client: Option<String>,
    pub linked_to: Option<Uuid>,
    pub source_fingerprint: Option<String>,
}

impl DocumentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: DocumentCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn linked_to(mut self, target: Uuid) -> Self {
        self.linked_to = Some(target);
        self
    }

    pub fn source_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.source_fingerprint = Some(fingerprint.into());
        self
    }

    /// Whether a record passes this filter.
    pub fn matches(&self, doc: &DocumentRecord) -> bool {
        if let Some(category) = self.category {
            if doc.category != category {
                return false;
            }
        }
        if let Some(ref client) = self.client {
            if !doc.client.eq_ignore_ascii_case(client) {
                return false;
            }
        }
        if let Some(target) = self.linked_to {
            if doc.linked_to != Some(target) {
                return false;
            }
        }
        if let Some(ref fingerprint) = self.source_fingerprint {
            if doc.source_fingerprint != *fingerprint {
                return false;
            }
        }
        true
    }
}

/// Storage operations the engine depends on. Each call is atomic for a
/// single record; transient failures surface as
/// `CoreError::StorageUnavailable` and are retried at the engine
/// boundary with bounded backoff.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, id: Uuid) -> Result<Option<DocumentRecord>>;
    async fn list_documents(&self, filter: DocumentFilter) -> Result<Vec<DocumentRecord>>;
    async fn upsert_document(&self, doc: DocumentRecord) -> Result<()>;
    async fn delete_document(&self, id: Uuid) -> Result<bool>;

    async fn get_alert(&self, id: Uuid) -> Result<Option<AlertRecord>>;
    /// Alerts for one subject document, or all alerts when `subject` is None.
    async fn list_alerts(&self, subject: Option<Uuid>) -> Result<Vec<AlertRecord>>;
    async fn upsert_alert(&self, alert: AlertRecord) -> Result<()>;
    async fn delete_alert(&self, id: Uuid) -> Result<bool>;

    async fn get_utilization(&self, po_id: Uuid) -> Result<Option<UtilizationState>>;
    async fn upsert_utilization(&self, state: UtilizationState) -> Result<()>;
    async fn delete_utilization(&self, po_id: Uuid) -> Result<bool>;
}
