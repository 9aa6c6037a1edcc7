//! Transaction pipeline
//!
//! Ties the engine stages into short, deterministic transactions, one
//! per external event: document ingested, relinked, or deleted, alerts
//! evaluated or acknowledged. Each transaction re-derives utilization
//! and reconciles alerts for the subjects it touched.
//!
//! Transactions affecting the same PO serialize on a per-PO async lock;
//! disjoint POs proceed in parallel. A transaction that finds its
//! precondition gone (subject deleted underneath it) no-ops instead of
//! operating on stale data.

use crate::alerts::{self, DesiredAlert};
use crate::dedup;
use crate::linker::{self, LinkResult, LinkStrategy};
use crate::metrics as engine_metrics;
use crate::normalizer::{self, RawDocument};
use crate::utilization;
use chrono::{DateTime, Utc};
use doculink_common::config::EngineConfig;
use doculink_common::currency::{self, RateProvider};
use doculink_common::errors::{CoreError, Result};
use doculink_common::models::{AlertRecord, DocumentRecord, DocumentStatus, UtilizationState};
use doculink_common::storage::{with_retry, DocumentFilter, DocumentStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Result of an ingest transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A new record was created (possibly linked, possibly flagged)
    Created(DocumentRecord),
    /// The artifact duplicates an already stored record
    DuplicateOf(Uuid),
}

/// Result of a relink transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    Linked(LinkResult),
    Unlinked,
}

/// The linking and alert engine.
pub struct Engine {
    store: Arc<dyn DocumentStore>,
    rates: Arc<dyn RateProvider>,
    config: EngineConfig,
    po_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        rates: Arc<dyn RateProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            rates,
            config,
            po_locks: Mutex::new(HashMap::new()),
        }
    }

    // ========================================================================
    // Public transactions
    // ========================================================================

    /// Ingest one raw extraction: normalize, dedup, persist, link, and
    /// derive utilization and alerts.
    #[instrument(skip(self, raw), fields(source = raw.source_name.as_deref().unwrap_or("<unknown>")))]
    pub async fn ingest(&self, raw: RawDocument) -> Result<IngestOutcome> {
        let now = Utc::now();

        let prior_currency = self.client_prior_currency(&raw).await?;
        let doc = normalizer::normalize(&raw, prior_currency.as_deref(), now)?;

        let existing = self
            .list_documents(DocumentFilter::all(), "list_documents")
            .await?;

        if let Some(found) = dedup::find_duplicate(&doc, &existing, &self.config.dedup) {
            let existing_id = found.existing.id;
            info!(
                existing_id = %existing_id,
                rule = ?found.rule,
                "Document already exists, not creating"
            );
            engine_metrics::record_duplicate(found.rule.as_str());
            return Ok(IngestOutcome::DuplicateOf(existing_id));
        }

        self.save_document(&doc).await?;
        engine_metrics::record_ingested(doc.category.as_str());
        info!(doc_id = %doc.id, category = doc.category.as_str(), "Document created");

        let doc = if doc.category.is_invoice() || doc.category.is_agreement() {
            self.auto_link(doc, &existing, now).await?
        } else {
            // A fresh PO starts with an empty utilization state.
            self.evaluate_po(doc.id, now).await?;
            doc
        };

        Ok(IngestOutcome::Created(doc))
    }

    /// Attach a document to an operator-chosen PO, or detach it.
    #[instrument(skip(self))]
    pub async fn relink(&self, document_id: Uuid, target_id: Option<Uuid>) -> Result<LinkOutcome> {
        let now = Utc::now();

        let doc = self
            .load_document(document_id)
            .await?
            .ok_or_else(|| CoreError::DocumentNotFound {
                id: document_id.to_string(),
            })?;

        if !(doc.category.is_invoice() || doc.category.is_agreement()) {
            return Err(CoreError::InvalidLinkTarget {
                message: "only invoices and service agreements link to purchase orders".into(),
            });
        }

        match target_id {
            Some(target_id) => self.attach(doc, target_id, now).await,
            None => self.detach(doc, now).await,
        }
    }

    /// Delete a document, cascading to its alerts and to the derived
    /// state of any PO it touched. A record already gone is a no-op.
    #[instrument(skip(self))]
    pub async fn delete_document(&self, document_id: Uuid) -> Result<()> {
        let now = Utc::now();

        let Some(doc) = self.load_document(document_id).await? else {
            debug!(doc_id = %document_id, "Delete target already gone, no-op");
            return Ok(());
        };

        if doc.category.is_po() {
            return self.delete_po(doc, now).await;
        }

        // Invoice or agreement: serialize on the linked PO if any.
        if let Some(po_id) = doc.linked_to {
            let lock = self.po_lock(po_id).await;
            let _guard = lock.lock().await;

            if self.load_document(document_id).await?.is_none() {
                debug!(doc_id = %document_id, "Delete target vanished while locking, no-op");
                return Ok(());
            }
            self.remove_document(document_id).await?;
            self.retract_subject_alerts(document_id).await?;
            self.evaluate_po_locked(po_id, now).await?;
        } else {
            self.remove_document(document_id).await?;
            self.retract_subject_alerts(document_id).await?;
        }

        info!(doc_id = %document_id, "Document deleted");
        Ok(())
    }

    /// Re-evaluate alerts for a document's neighborhood and return the
    /// currently active alerts for the evaluated subjects. Idempotent.
    pub async fn evaluate_alerts(&self, document_id: Uuid) -> Result<Vec<AlertRecord>> {
        self.evaluate_alerts_at(document_id, Utc::now()).await
    }

    /// Clock-explicit variant of `evaluate_alerts`.
    #[instrument(skip(self, now))]
    pub async fn evaluate_alerts_at(
        &self,
        document_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertRecord>> {
        let doc = self
            .load_document(document_id)
            .await?
            .ok_or_else(|| CoreError::DocumentNotFound {
                id: document_id.to_string(),
            })?;

        let mut subjects: HashSet<Uuid> = HashSet::new();
        subjects.insert(doc.id);

        if doc.category.is_po() {
            self.evaluate_po(doc.id, now).await?;
            for linked in self
                .list_documents(DocumentFilter::all().linked_to(doc.id), "list_linked")
                .await?
            {
                subjects.insert(linked.id);
            }
        } else if doc.category.is_invoice() {
            if let Some(po_id) = doc.linked_to {
                self.evaluate_po(po_id, now).await?;
            }
        } else {
            self.evaluate_agreement(doc.id, now).await?;
            if let Some(po_id) = doc.linked_to {
                self.evaluate_po(po_id, now).await?;
            }
        }

        let mut alerts = Vec::new();
        for subject in subjects {
            alerts.extend(self.list_subject_alerts(subject).await?);
        }
        alerts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(alerts)
    }

    /// Mark an alert acknowledged: `Active -> Acknowledged`.
    pub async fn acknowledge(&self, alert_id: Uuid) -> Result<AlertRecord> {
        let mut alert = with_retry(&self.config.storage, "get_alert", || {
            self.store.get_alert(alert_id)
        })
        .await?
        .ok_or_else(|| CoreError::AlertNotFound {
            id: alert_id.to_string(),
        })?;

        alert.acknowledged = true;
        with_retry(&self.config.storage, "upsert_alert", || {
            self.store.upsert_alert(alert.clone())
        })
        .await?;

        info!(alert_id = %alert_id, "Alert acknowledged");
        Ok(alert)
    }

    // ========================================================================
    // Linking
    // ========================================================================

    /// Run the strategy cascade for a freshly ingested invoice or
    /// agreement and commit the winning link, if any.
    async fn auto_link(
        &self,
        mut doc: DocumentRecord,
        existing: &[DocumentRecord],
        now: DateTime<Utc>,
    ) -> Result<DocumentRecord> {
        let candidates: Vec<DocumentRecord> = existing
            .iter()
            .filter(|d| d.category.is_po())
            .cloned()
            .collect();
        let capacity = self.remaining_capacities(&candidates).await?;

        let decision = linker::link(&doc, &candidates, &capacity, &self.config.linker);

        match decision {
            Some(result) => {
                let lock = self.po_lock(result.target_id).await;
                let _guard = lock.lock().await;

                if self.load_document(result.target_id).await?.is_none() {
                    // Target vanished between snapshot and lock; fall back
                    // to the flagged terminal state.
                    debug!(target_id = %result.target_id, "Link target vanished, flagging");
                    return self.flag_unlinked(doc, now).await;
                }

                doc.linked_to = Some(result.target_id);
                self.save_document(&doc).await?;
                engine_metrics::record_link(result.strategy.as_str());
                info!(
                    doc_id = %doc.id,
                    target_id = %result.target_id,
                    strategy = result.strategy.as_str(),
                    confidence = result.confidence,
                    "Document linked"
                );

                self.evaluate_po_locked(result.target_id, now).await?;
                if doc.category.is_agreement() {
                    self.evaluate_agreement(doc.id, now).await?;
                }
                Ok(doc)
            }
            None => self.flag_unlinked(doc, now).await,
        }
    }

    /// No strategy cleared its threshold: a valid terminal state that
    /// feeds the exceptions surface, not an error.
    async fn flag_unlinked(
        &self,
        mut doc: DocumentRecord,
        now: DateTime<Utc>,
    ) -> Result<DocumentRecord> {
        doc.status = DocumentStatus::Flagged;
        self.save_document(&doc).await?;
        engine_metrics::record_flagged();
        info!(doc_id = %doc.id, "No link found, document flagged");

        if doc.category.is_agreement() {
            self.evaluate_agreement(doc.id, now).await?;
        }
        Ok(doc)
    }

    async fn attach(
        &self,
        doc: DocumentRecord,
        target_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LinkOutcome> {
        if target_id == doc.id {
            return Err(CoreError::InvalidLinkTarget {
                message: "document cannot link to itself".into(),
            });
        }

        let target =
            self.load_document(target_id)
                .await?
                .ok_or_else(|| CoreError::InvalidLinkTarget {
                    message: format!("target {} does not exist", target_id),
                })?;

        if !target.category.is_po() {
            return Err(CoreError::InvalidLinkTarget {
                message: format!("target {} is not a purchase order", target_id),
            });
        }
        if doc.category.is_invoice() && Some(target.category) != doc.category.po_counterpart() {
            return Err(CoreError::InvalidLinkTarget {
                message: "invoice direction does not match target PO".into(),
            });
        }

        // Serialize on every affected PO, in sorted order.
        let mut po_ids: Vec<Uuid> = doc.linked_to.into_iter().chain([target_id]).collect();
        po_ids.sort();
        po_ids.dedup();
        let locks = self.po_locks_for(&po_ids).await;
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }

        // Re-validate under the locks.
        let mut doc = self.load_document(doc.id).await?.ok_or_else(|| {
            CoreError::ConcurrentModification {
                message: "document deleted during relink".into(),
            }
        })?;
        if self.load_document(target_id).await?.is_none() {
            return Err(CoreError::ConcurrentModification {
                message: "target deleted during relink".into(),
            });
        }

        doc.linked_to = Some(target_id);
        if doc.status == DocumentStatus::Flagged {
            doc.status = DocumentStatus::PendingReview;
        }
        self.save_document(&doc).await?;
        engine_metrics::record_link(LinkStrategy::Manual.as_str());
        info!(doc_id = %doc.id, target_id = %target_id, "Document relinked");

        for po_id in &po_ids {
            self.evaluate_po_locked(*po_id, now).await?;
        }
        if doc.category.is_agreement() {
            self.evaluate_agreement(doc.id, now).await?;
        }

        Ok(LinkOutcome::Linked(LinkResult {
            target_id,
            strategy: LinkStrategy::Manual,
            confidence: 1.0,
        }))
    }

    async fn detach(&self, doc: DocumentRecord, now: DateTime<Utc>) -> Result<LinkOutcome> {
        let Some(old_po) = doc.linked_to else {
            return Ok(LinkOutcome::Unlinked);
        };

        let lock = self.po_lock(old_po).await;
        let _guard = lock.lock().await;

        let mut doc = self.load_document(doc.id).await?.ok_or_else(|| {
            CoreError::ConcurrentModification {
                message: "document deleted during relink".into(),
            }
        })?;

        doc.linked_to = None;
        doc.status = DocumentStatus::Flagged;
        self.save_document(&doc).await?;
        info!(doc_id = %doc.id, old_target = %old_po, "Document unlinked");

        self.evaluate_po_locked(old_po, now).await?;
        if doc.category.is_invoice() {
            // Mismatch alerts lose their PO when the link goes.
            self.retract_subject_alerts(doc.id).await?;
        } else {
            // The expiry alert outlives the link; refresh its context.
            self.evaluate_agreement(doc.id, now).await?;
        }
        Ok(LinkOutcome::Unlinked)
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Lock a PO and re-derive its utilization and alert neighborhood.
    async fn evaluate_po(&self, po_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let lock = self.po_lock(po_id).await;
        let _guard = lock.lock().await;
        self.evaluate_po_locked(po_id, now).await
    }

    /// Re-derive utilization and alerts for one PO. Caller holds the
    /// PO's lock. A PO that vanished is a no-op.
    async fn evaluate_po_locked(&self, po_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let Some(po) = self.load_document(po_id).await? else {
            debug!(po_id = %po_id, "PO gone before evaluation, no-op");
            return Ok(());
        };
        if !po.category.is_po() {
            return Ok(());
        }

        let linked = self
            .list_documents(DocumentFilter::all().linked_to(po_id), "list_linked")
            .await?;
        let invoices: Vec<DocumentRecord> = linked
            .iter()
            .filter(|d| d.category.is_invoice())
            .cloned()
            .collect();
        let agreements: Vec<DocumentRecord> = linked
            .iter()
            .filter(|d| d.category.is_agreement())
            .cloned()
            .collect();

        let (state, conditions) = utilization::recompute(&po, &invoices, self.rates.as_ref());
        with_retry(&self.config.storage, "upsert_utilization", || {
            self.store.upsert_utilization(state.clone())
        })
        .await?;

        let mut desired: Vec<DesiredAlert> = Vec::new();
        desired.extend(alerts::rules::po_utilization(
            &po,
            &state,
            &self.config.alerts,
        ));
        desired.extend(
            agreements
                .iter()
                .find_map(|agreement| alerts::rules::agreement_window(&po, agreement)),
        );
        for invoice in &invoices {
            desired.extend(alerts::rules::invoice_against_po(
                invoice,
                &po,
                &state,
                &conditions,
            ));
        }

        let mut subjects: HashSet<Uuid> = invoices.iter().map(|i| i.id).collect();
        subjects.insert(po_id);
        self.apply_alert_changes(&subjects, desired, now).await?;

        // Governed agreements interpolate utilization context into their
        // expiry descriptions; refresh them alongside the PO.
        for agreement in &agreements {
            self.evaluate_agreement(agreement.id, now).await?;
        }

        Ok(())
    }

    /// Re-derive the expiry alert for one agreement. An agreement that
    /// vanished is a no-op.
    async fn evaluate_agreement(&self, agreement_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let Some(agreement) = self.load_document(agreement_id).await? else {
            debug!(agreement_id = %agreement_id, "Agreement gone before evaluation, no-op");
            return Ok(());
        };
        if !agreement.category.is_agreement() {
            return Ok(());
        }

        let mut governed: Vec<DocumentRecord> = Vec::new();
        let mut governed_invoice_count = 0;
        if let Some(po_id) = agreement.linked_to {
            if let Some(po) = self.load_document(po_id).await? {
                governed_invoice_count = self
                    .list_documents(DocumentFilter::all().linked_to(po.id), "list_linked")
                    .await?
                    .iter()
                    .filter(|d| d.category.is_invoice())
                    .count();
                governed.push(po);
            }
        }

        let desired: Vec<DesiredAlert> = alerts::rules::agreement_expiry(
            &agreement,
            &governed,
            governed_invoice_count,
            now,
            &self.config.alerts,
        )
        .into_iter()
        .collect();

        let subjects = HashSet::from([agreement_id]);
        self.apply_alert_changes(&subjects, desired, now).await
    }

    /// Reconcile desired against stored alerts and commit the diff.
    async fn apply_alert_changes(
        &self,
        subjects: &HashSet<Uuid>,
        desired: Vec<DesiredAlert>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let existing = with_retry(&self.config.storage, "list_alerts", || {
            self.store.list_alerts(None)
        })
        .await?;

        let changes = alerts::reconcile(&existing, desired, subjects, now);
        if changes.is_empty() {
            return Ok(());
        }

        for alert in &changes.upserts {
            with_retry(&self.config.storage, "upsert_alert", || {
                self.store.upsert_alert(alert.clone())
            })
            .await?;
        }
        for id in &changes.retractions {
            with_retry(&self.config.storage, "delete_alert", || {
                self.store.delete_alert(*id)
            })
            .await?;
        }

        engine_metrics::record_alert_changes(changes.upserts.len(), changes.retractions.len());
        debug!(
            raised = changes.upserts.len(),
            retracted = changes.retractions.len(),
            "Alerts reconciled"
        );
        Ok(())
    }

    // ========================================================================
    // Deletion cascade
    // ========================================================================

    async fn delete_po(&self, po: DocumentRecord, now: DateTime<Utc>) -> Result<()> {
        let lock = self.po_lock(po.id).await;
        let guard = lock.lock().await;

        if self.load_document(po.id).await?.is_none() {
            debug!(po_id = %po.id, "PO vanished while locking, no-op");
            return Ok(());
        }

        let dependents = self
            .list_documents(DocumentFilter::all().linked_to(po.id), "list_linked")
            .await?;

        // Release the dangling links before the record disappears.
        for dependent in &dependents {
            let mut updated = dependent.clone();
            updated.linked_to = None;
            updated.status = DocumentStatus::Flagged;
            self.save_document(&updated).await?;
        }

        self.remove_document(po.id).await?;
        with_retry(&self.config.storage, "delete_utilization", || {
            self.store.delete_utilization(po.id)
        })
        .await?;

        self.retract_subject_alerts(po.id).await?;
        for dependent in &dependents {
            if dependent.category.is_invoice() {
                self.retract_subject_alerts(dependent.id).await?;
            }
        }

        drop(guard);
        self.po_locks.lock().await.remove(&po.id);

        // Expiry alerts on formerly governed agreements survive, but
        // their interpolated context must stop naming the PO.
        for dependent in &dependents {
            if dependent.category.is_agreement() {
                self.evaluate_agreement(dependent.id, now).await?;
            }
        }

        info!(po_id = %po.id, dependents = dependents.len(), "PO deleted, links released");
        Ok(())
    }

    async fn retract_subject_alerts(&self, subject: Uuid) -> Result<()> {
        for alert in self.list_subject_alerts(subject).await? {
            with_retry(&self.config.storage, "delete_alert", || {
                self.store.delete_alert(alert.id)
            })
            .await?;
        }
        Ok(())
    }

    // ========================================================================
    // Storage access
    // ========================================================================

    async fn load_document(&self, id: Uuid) -> Result<Option<DocumentRecord>> {
        with_retry(&self.config.storage, "get_document", || {
            self.store.get_document(id)
        })
        .await
    }

    async fn list_documents(
        &self,
        filter: DocumentFilter,
        label: &str,
    ) -> Result<Vec<DocumentRecord>> {
        with_retry(&self.config.storage, label, || {
            self.store.list_documents(filter.clone())
        })
        .await
    }

    async fn save_document(&self, doc: &DocumentRecord) -> Result<()> {
        with_retry(&self.config.storage, "upsert_document", || {
            self.store.upsert_document(doc.clone())
        })
        .await
    }

    async fn remove_document(&self, id: Uuid) -> Result<()> {
        with_retry(&self.config.storage, "delete_document", || {
            self.store.delete_document(id)
        })
        .await?;
        Ok(())
    }

    async fn list_subject_alerts(&self, subject: Uuid) -> Result<Vec<AlertRecord>> {
        with_retry(&self.config.storage, "list_alerts", || {
            self.store.list_alerts(Some(subject))
        })
        .await
    }

    /// Remaining capacity per candidate PO for the amount-proximity
    /// strategy. POs without stored utilization count as unconsumed.
    async fn remaining_capacities(
        &self,
        candidates: &[DocumentRecord],
    ) -> Result<HashMap<Uuid, f64>> {
        let mut capacities = HashMap::with_capacity(candidates.len());
        for po in candidates {
            if let Some(state) = with_retry(&self.config.storage, "get_utilization", || {
                self.store.get_utilization(po.id)
            })
            .await?
            {
                capacities.insert(po.id, state.remaining());
            }
        }
        Ok(capacities)
    }

    /// The client's most recently seen currency, used as the fallback
    /// when the extracted token is unrecognized.
    async fn client_prior_currency(&self, raw: &RawDocument) -> Result<Option<String>> {
        let recognized = raw
            .currency
            .as_deref()
            .and_then(currency::canonicalize)
            .is_some();
        if recognized {
            return Ok(None);
        }
        let Some(client) = raw.client.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(None);
        };

        let docs = self
            .list_documents(DocumentFilter::all().client(client), "list_by_client")
            .await?;
        Ok(docs.last().map(|d| d.currency.clone()))
    }

    // ========================================================================
    // Locking
    // ========================================================================

    async fn po_lock(&self, po_id: Uuid) -> Arc<Mutex<()>> {
        self.po_locks
            .lock()
            .await
            .entry(po_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn po_locks_for(&self, po_ids: &[Uuid]) -> Vec<Arc<Mutex<()>>> {
        let mut registry = self.po_locks.lock().await;
        po_ids
            .iter()
            .map(|id| {
                registry
                    .entry(*id)
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .clone()
            })
            .collect()
    }

    /// Current utilization snapshot for a PO, if one has been derived.
    pub async fn utilization(&self, po_id: Uuid) -> Result<Option<UtilizationState>> {
        with_retry(&self.config.storage, "get_utilization", || {
            self.store.get_utilization(po_id)
        })
        .await
    }
}
