//! In-memory reference store
//!
//! Backs the engine's tests and embedded deployments. Listings are
//! returned in a deterministic order so re-evaluation over unchanged
//! state is reproducible.

use super::{DocumentFilter, DocumentStore};
use crate::errors::Result;
use crate::models::{AlertRecord, DocumentRecord, UtilizationState};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<Uuid, DocumentRecord>>,
    alerts: RwLock<HashMap<Uuid, AlertRecord>>,
    utilization: RwLock<HashMap<Uuid, UtilizationState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, id: Uuid) -> Result<Option<DocumentRecord>> {
        Ok(self.documents.read().await.get(&id).cloned())
    }

    async fn list_documents(&self, filter: DocumentFilter) -> Result<Vec<DocumentRecord>> {
        let mut docs: Vec<DocumentRecord> = self
            .documents
            .read()
            .await
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn upsert_document(&self, doc: DocumentRecord) -> Result<()> {
        self.documents.write().await.insert(doc.id, doc);
        Ok(())
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        Ok(self.documents.write().await.remove(&id).is_some())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<AlertRecord>> {
        Ok(self.alerts.read().await.get(&id).cloned())
    }

    async fn list_alerts(&self, subject: Option<Uuid>) -> Result<Vec<AlertRecord>> {
        let mut alerts: Vec<AlertRecord> = self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| subject.map_or(true, |s| a.subject_document_id == s))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(alerts)
    }

    async fn upsert_alert(&self, alert: AlertRecord) -> Result<()> {
        self.alerts.write().await.insert(alert.id, alert);
        Ok(())
    }

    async fn delete_alert(&self, id: Uuid) -> Result<bool> {
        Ok(self.alerts.write().await.remove(&id).is_some())
    }

    async fn get_utilization(&self, po_id: Uuid) -> Result<Option<UtilizationState>> {
        Ok(self.utilization.read().await.get(&po_id).cloned())
    }

    async fn upsert_utilization(&self, state: UtilizationState) -> Result<()> {
        self.utilization.write().await.insert(state.po_id, state);
        Ok(())
    }

    async fn delete_utilization(&self, po_id: Uuid) -> Result<bool> {
        Ok(self.utilization.write().await.remove(&po_id).is_some())
    }
}
