//! Document linking
//!
//! Finds the best purchase order for an invoice or service agreement
//! through a prioritized strategy cascade. Strategies are evaluated in
//! fixed order; the first one producing a candidate at or above its own
//! minimum confidence wins and later strategies are never consulted.
//! Ties between equal-confidence candidates break on date proximity,
//! then on amount delta.

use chrono::{DateTime, Utc};
use doculink_common::config::LinkerConfig;
use doculink_common::models::{DocumentCategory, DocumentRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Strategy that produced a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStrategy {
    /// Reference number equals the target PO's reference number
    ReferenceExact,
    /// Reference number appears verbatim in the target PO's title
    ReferenceInTitle,
    /// Same client and vendor with dates inside the proximity window
    PartyDateProximity,
    /// Same client with amount close to the target's remaining capacity
    AmountProximity,
    /// Operator-directed relink
    Manual,
}

impl LinkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReferenceExact => "reference_exact",
            Self::ReferenceInTitle => "reference_in_title",
            Self::PartyDateProximity => "party_date_proximity",
            Self::AmountProximity => "amount_proximity",
            Self::Manual => "manual",
        }
    }
}

/// Outcome of a successful link decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkResult {
    pub target_id: Uuid,
    pub strategy: LinkStrategy,
    pub confidence: f64,
}

const REFERENCE_EXACT_CONFIDENCE: f64 = 0.99;
const REFERENCE_IN_TITLE_CONFIDENCE: f64 = 0.9;
const AMOUNT_PROXIMITY_CONFIDENCE: f64 = 0.55;

/// Find the best link target for `doc` among `candidates`.
///
/// `remaining_capacity` carries each candidate PO's unconsumed amount
/// for the amount-proximity strategy; a PO absent from the map is
/// treated as fully unconsumed. Returns `None` when no strategy clears
/// its threshold, in which case the caller flags the document as a
/// valid terminal state rather than an error.
pub fn link(
    doc: &DocumentRecord,
    candidates: &[DocumentRecord],
    remaining_capacity: &HashMap<Uuid, f64>,
    config: &LinkerConfig,
) -> Option<LinkResult> {
    let eligible: Vec<&DocumentRecord> = candidates
        .iter()
        .filter(|candidate| is_eligible_target(doc, candidate))
        .collect();

    if eligible.is_empty() {
        return None;
    }

    let cascade: &[(LinkStrategy, f64)] = &[
        (LinkStrategy::ReferenceExact, REFERENCE_EXACT_CONFIDENCE),
        (LinkStrategy::ReferenceInTitle, REFERENCE_IN_TITLE_CONFIDENCE),
        (LinkStrategy::PartyDateProximity, config.party_date_floor),
        (LinkStrategy::AmountProximity, config.amount_proximity_floor),
    ];

    for (strategy, min_confidence) in cascade {
        let mut scored: Vec<(&DocumentRecord, f64)> = eligible
            .iter()
            .filter_map(|candidate| {
                score(doc, candidate, *strategy, remaining_capacity, config)
                    .filter(|confidence| confidence >= min_confidence)
                    .map(|confidence| (*candidate, confidence))
            })
            .collect();

        if scored.is_empty() {
            continue;
        }

        scored.sort_by(|(a, conf_a), (b, conf_b)| {
            conf_b
                .partial_cmp(conf_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| date_distance(doc, a).cmp(&date_distance(doc, b)))
                .then_with(|| {
                    amount_delta(doc, a)
                        .partial_cmp(&amount_delta(doc, b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        let (target, confidence) = scored[0];
        debug!(
            doc_id = %doc.id,
            target_id = %target.id,
            strategy = strategy.as_str(),
            confidence,
            "Link strategy matched"
        );
        return Some(LinkResult {
            target_id: target.id,
            strategy: *strategy,
            confidence,
        });
    }

    None
}

/// Invoices target the PO of their own direction; agreements target
/// either PO category. POs never link outward.
fn is_eligible_target(doc: &DocumentRecord, candidate: &DocumentRecord) -> bool {
    if candidate.id == doc.id {
        return false;
    }
    match doc.category {
        DocumentCategory::ClientInvoice | DocumentCategory::VendorInvoice => {
            Some(candidate.category) == doc.category.po_counterpart()
        }
        DocumentCategory::ServiceAgreement => candidate.category.is_po(),
        _ => false,
    }
}

fn score(
    doc: &DocumentRecord,
    candidate: &DocumentRecord,
    strategy: LinkStrategy,
    remaining_capacity: &HashMap<Uuid, f64>,
    config: &LinkerConfig,
) -> Option<f64> {
    match strategy {
        LinkStrategy::ReferenceExact => {
            let doc_ref = doc.reference_number.as_deref()?;
            let target_ref = candidate.reference_number.as_deref()?;
            doc_ref
                .eq_ignore_ascii_case(target_ref)
                .then_some(REFERENCE_EXACT_CONFIDENCE)
        }
        LinkStrategy::ReferenceInTitle => {
            let doc_ref = doc.reference_number.as_deref()?;
            candidate
                .title
                .to_lowercase()
                .contains(&doc_ref.to_lowercase())
                .then_some(REFERENCE_IN_TITLE_CONFIDENCE)
        }
        LinkStrategy::PartyDateProximity => {
            if !doc.same_client(candidate) || !doc.same_vendor(candidate) {
                return None;
            }
            let distance = date_distance(doc, candidate);
            let window = config.date_window_days;
            if distance > window {
                return None;
            }
            // Scales from 0.9 at zero distance down to the floor at the
            // window edge.
            let span = 0.9 - config.party_date_floor;
            Some(config.party_date_floor + span * (1.0 - distance as f64 / window as f64))
        }
        LinkStrategy::AmountProximity => {
            if !doc.same_client(candidate) {
                return None;
            }
            let remaining = remaining_capacity
                .get(&candidate.id)
                .copied()
                .unwrap_or(candidate.amount);
            if remaining <= 0.0 {
                return None;
            }
            ((doc.amount - remaining).abs() <= config.amount_tolerance * remaining)
                .then_some(AMOUNT_PROXIMITY_CONFIDENCE)
        }
        LinkStrategy::Manual => None,
    }
}

fn date_distance(doc: &DocumentRecord, candidate: &DocumentRecord) -> i64 {
    signed_days(doc.created_at, candidate.created_at).abs()
}

fn signed_days(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    (a - b).num_days()
}

fn amount_delta(doc: &DocumentRecord, candidate: &DocumentRecord) -> f64 {
    (doc.amount - candidate.amount).abs()
}
