//! Alert derivation and reconciliation
//!
//! The rules in `rules` compute the set of alerts that should be active
//! for the subjects a transaction touched; `reconcile` diffs that set
//! against the alerts already stored under the same
//! `(subject, rule_kind)` keys. Re-running reconciliation over
//! unchanged state is a no-op: identical conditions leave records
//! untouched, changed conditions update the record in place under its
//! existing id, and cleared conditions retract.

pub mod rules;

pub use rules::DesiredAlert;

use chrono::{DateTime, Utc};
use doculink_common::models::{AlertRecord, RuleKind};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Storage mutations a reconciliation produced.
#[derive(Debug, Default)]
pub struct AlertChanges {
    /// New or in-place-updated records
    pub upserts: Vec<AlertRecord>,
    /// Ids whose condition cleared
    pub retractions: Vec<Uuid>,
}

impl AlertChanges {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.retractions.is_empty()
    }
}

/// Diff desired against stored alerts for the evaluated subjects.
///
/// Only alerts whose subject is in `subjects` are considered: a
/// transaction never retracts alerts belonging to documents it did not
/// evaluate. An acknowledged alert occupies its key (the condition
/// re-firing neither duplicates nor reopens it) and is retracted only
/// once its condition clears.
pub fn reconcile(
    existing: &[AlertRecord],
    desired: Vec<DesiredAlert>,
    subjects: &HashSet<Uuid>,
    now: DateTime<Utc>,
) -> AlertChanges {
    let mut desired_by_key: HashMap<(Uuid, RuleKind), DesiredAlert> = desired
        .into_iter()
        .filter(|d| subjects.contains(&d.subject_document_id))
        .map(|d| ((d.subject_document_id, d.rule_kind), d))
        .collect();

    let mut changes = AlertChanges::default();

    for alert in existing
        .iter()
        .filter(|a| subjects.contains(&a.subject_document_id))
    {
        match desired_by_key.remove(&alert.key()) {
            None => {
                debug!(alert_id = %alert.id, rule = ?alert.rule_kind, "Alert condition cleared");
                changes.retractions.push(alert.id);
            }
            Some(_) if alert.acknowledged => {
                // Key stays occupied; nothing to write.
            }
            Some(want) => {
                let unchanged = alert.level == want.level
                    && alert.title == want.title
                    && alert.description == want.description;
                if !unchanged {
                    changes.upserts.push(AlertRecord {
                        id: alert.id,
                        title: want.title,
                        description: want.description,
                        level: want.level,
                        timestamp: now,
                        subject_document_id: want.subject_document_id,
                        rule_kind: want.rule_kind,
                        acknowledged: false,
                    });
                }
            }
        }
    }

    for (_, want) in desired_by_key {
        changes.upserts.push(AlertRecord {
            id: Uuid::new_v4(),
            title: want.title,
            description: want.description,
            level: want.level,
            timestamp: now,
            subject_document_id: want.subject_document_id,
            rule_kind: want.rule_kind,
            acknowledged: false,
        });
    }

    changes
}
