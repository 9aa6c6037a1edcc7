//! Duplicate detection
//!
//! Decides whether an incoming document is already present using a
//! cascade of exact and fuzzy keys, ordered most-certain first. The
//! cascade is a fixed table of rules so each rule can be exercised in
//! isolation. A duplicate is an informational outcome carrying the
//! pre-existing record, never an error.

use chrono::Datelike;
use doculink_common::config::DedupConfig;
use doculink_common::models::DocumentRecord;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which cascade rule identified the duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupRule {
    /// Exact source fingerprint (filename/content hash)
    SourceFingerprint,
    /// Exact (title, amount) pair, zero amount tolerance
    TitleAmount,
    /// (reference number, category) when a reference was extracted
    ReferenceCategory,
    /// (client, amount) within relative tolerance, same calendar month
    ClientAmountMonth,
}

impl DedupRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceFingerprint => "source_fingerprint",
            Self::TitleAmount => "title_amount",
            Self::ReferenceCategory => "reference_category",
            Self::ClientAmountMonth => "client_amount_month",
        }
    }
}

/// A duplicate decision: the stored record the candidate collides with.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch<'a> {
    pub existing: &'a DocumentRecord,
    pub rule: DedupRule,
}

type Matcher = fn(&DocumentRecord, &DocumentRecord, &DedupConfig) -> bool;

/// Cascade in specificity order; first match wins.
const CASCADE: &[(DedupRule, Matcher)] = &[
    (DedupRule::SourceFingerprint, match_fingerprint),
    (DedupRule::TitleAmount, match_title_amount),
    (DedupRule::ReferenceCategory, match_reference_category),
    (DedupRule::ClientAmountMonth, match_client_amount_month),
];

/// Find the stored record the candidate duplicates, if any.
pub fn find_duplicate<'a>(
    candidate: &DocumentRecord,
    existing: &'a [DocumentRecord],
    config: &DedupConfig,
) -> Option<DuplicateMatch<'a>> {
    for (rule, matcher) in CASCADE {
        if let Some(record) = existing
            .iter()
            .find(|stored| stored.id != candidate.id && matcher(candidate, stored, config))
        {
            debug!(
                rule = ?rule,
                existing_id = %record.id,
                "Duplicate detected"
            );
            return Some(DuplicateMatch {
                existing: record,
                rule: *rule,
            });
        }
    }
    None
}

fn match_fingerprint(candidate: &DocumentRecord, stored: &DocumentRecord, _: &DedupConfig) -> bool {
    candidate.source_fingerprint == stored.source_fingerprint
}

fn match_title_amount(candidate: &DocumentRecord, stored: &DocumentRecord, _: &DedupConfig) -> bool {
    candidate.title == stored.title && candidate.amount == stored.amount
}

fn match_reference_category(
    candidate: &DocumentRecord,
    stored: &DocumentRecord,
    _: &DedupConfig,
) -> bool {
    // An invoice's extracted reference usually cites the PO it bills
    // against, so sibling invoices share it; only documents whose
    // reference identifies themselves can key on it.
    if candidate.category.is_invoice() {
        return false;
    }
    match (&candidate.reference_number, &stored.reference_number) {
        (Some(a), Some(b)) => candidate.category == stored.category && a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

fn match_client_amount_month(
    candidate: &DocumentRecord,
    stored: &DocumentRecord,
    config: &DedupConfig,
) -> bool {
    if !candidate.same_client(stored) {
        return false;
    }
    if candidate.created_at.year() != stored.created_at.year()
        || candidate.created_at.month() != stored.created_at.month()
    {
        return false;
    }
    amounts_within(candidate.amount, stored.amount, config.amount_tolerance)
}

/// Relative amount comparison against the larger magnitude, so the
/// check is symmetric in its arguments.
fn amounts_within(a: f64, b: f64, tolerance: f64) -> bool {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        return true;
    }
    (a - b).abs() <= tolerance * scale
}
