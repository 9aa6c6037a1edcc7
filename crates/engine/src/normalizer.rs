//! Field normalization
//!
//! Canonicalizes the raw field map produced by the extraction
//! collaborator into a `DocumentRecord`: ISO currency codes, UTC
//! timestamps, clean numeric amounts, trimmed identifiers, and a
//! combined extraction confidence. Malformed optional fields degrade
//! confidence or flag the record; only an unrecoverable category or
//! amount fails ingestion.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use doculink_common::currency;
use doculink_common::errors::{CoreError, Result};
use doculink_common::models::{
    source_fingerprint, DocumentCategory, DocumentRecord, DocumentStatus,
};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;
use uuid::Uuid;

/// Raw extraction output for one uploaded artifact. Every field is
/// best-effort; the extraction collaborator attaches per-field
/// confidence scores where it has them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDocument {
    pub source_name: Option<String>,
    pub content_checksum: Option<String>,
    pub category: Option<String>,
    pub title: Option<String>,
    pub client: Option<String>,
    pub vendor: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub issued_at: Option<String>,
    pub due_date: Option<String>,
    pub reference_number: Option<String>,
    #[serde(default)]
    pub field_confidence: HashMap<String, f64>,
}

/// Date formats tried in priority order after RFC 3339.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m/%d/%y",
    "%d %b %Y",
    "%B %d, %Y",
];

/// Extraction confidence is capped below certainty.
const CONFIDENCE_CAP: f64 = 0.95;

/// Canonicalize a raw extraction into a document record.
///
/// `client_prior_currency` is the currency last seen for the same
/// client, used as the fallback when the extracted currency token is
/// unrecognized. `now` stamps records whose issue date could not be
/// parsed.
pub fn normalize(
    raw: &RawDocument,
    client_prior_currency: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DocumentRecord> {
    let category = raw
        .category
        .as_deref()
        .and_then(DocumentCategory::parse)
        .ok_or_else(|| CoreError::ExtractionIncomplete {
            field: "category".into(),
        })?;

    let amount = raw.amount.as_deref().and_then(parse_amount);
    let amount = match amount {
        Some(value) => value,
        // Agreements tolerate a missing contract value; POs and invoices
        // are unusable without one.
        None if category.is_agreement() => 0.0,
        None => {
            return Err(CoreError::ExtractionIncomplete {
                field: "amount".into(),
            })
        }
    };

    let mut status = DocumentStatus::PendingReview;

    let currency = match raw.currency.as_deref().and_then(currency::canonicalize) {
        Some(code) => code.to_string(),
        None => {
            status = DocumentStatus::Flagged;
            match client_prior_currency {
                Some(prior) => prior.to_string(),
                None => "USD".to_string(),
            }
        }
    };

    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Document")
        .to_string();

    let client = raw
        .client
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("Unknown Client")
        .to_string();

    let vendor = raw
        .vendor
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    let created_at = raw
        .issued_at
        .as_deref()
        .and_then(parse_date)
        .unwrap_or(now);

    let due_date = raw.due_date.as_deref().and_then(parse_date);

    let reference_number = raw
        .reference_number
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from)
        .or_else(|| extract_reference(&title));

    let fingerprint = match (&raw.source_name, &raw.content_checksum) {
        (Some(name), Some(checksum)) => source_fingerprint(name, checksum),
        (Some(name), None) => source_fingerprint(name, ""),
        // No source identity at all: fall back to content fields so the
        // fingerprint stays deterministic per artifact.
        _ => source_fingerprint(
            &format!("{}|{}|{}", title, client, category.as_str()),
            &format!("{:.2}", amount),
        ),
    };

    let confidence = combined_confidence(raw, vendor.is_some(), reference_number.is_some());

    let record = DocumentRecord {
        id: Uuid::new_v4(),
        category,
        title,
        client,
        vendor,
        amount,
        currency,
        status,
        created_at,
        due_date,
        confidence,
        reference_number,
        linked_to: None,
        source_fingerprint: fingerprint,
    };

    debug!(
        category = record.category.as_str(),
        confidence = record.confidence,
        flagged = record.status == DocumentStatus::Flagged,
        "Document normalized"
    );

    Ok(record)
}

/// Parse a monetary amount tolerating thousands separators, currency
/// symbols, and trailing currency text ("$1,234.50", "1,234.50 USD").
pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    let value: f64 = cleaned.parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}

/// Parse a date against the prioritized format set, normalized to UTC
/// midnight (full timestamps keep their instant).
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in DATE_FORMATS {
        if let Ok(mut date) = NaiveDate::parse_from_str(trimmed, format) {
            // Two-digit years slip through %Y as year 26; the scans
            // these come from mean 20xx.
            if date.year() < 100 {
                date = date.with_year(date.year() + 2000)?;
            }
            let midnight = date.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&midnight));
        }
    }

    None
}

fn reference_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)Purchase\s+Order[:\s#-]*([A-Z0-9][A-Z0-9-]+)",
            r"(?i)P\.O\.[:\s#-]*([A-Z0-9][A-Z0-9-]+)",
            r"(?i)P/O[:\s#-]*([A-Z0-9][A-Z0-9-]+)",
            r"(?i)\bPO[:\s#-]*([A-Z0-9][A-Z0-9-]+)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("reference pattern"))
        .collect()
    })
}

/// Pull a PO/invoice reference number out of free text. Matches shorter
/// than three characters are noise from the OCR layer and are ignored.
pub fn extract_reference(text: &str) -> Option<String> {
    for pattern in reference_patterns() {
        if let Some(captures) = pattern.captures(text) {
            let candidate = captures.get(1)?.as_str().trim_matches('-').to_string();
            if candidate.len() > 2 {
                return Some(candidate);
            }
        }
    }
    None
}

/// Field weights for the combined confidence. Category and amount carry
/// the most signal; optional fields contribute smaller shares.
const FIELD_WEIGHTS: &[(&str, f64)] = &[
    ("category", 0.25),
    ("amount", 0.25),
    ("title", 0.10),
    ("client", 0.10),
    ("currency", 0.10),
    ("issued_at", 0.10),
    ("reference_number", 0.05),
    ("vendor", 0.05),
];

fn combined_confidence(raw: &RawDocument, has_vendor: bool, has_reference: bool) -> f64 {
    let present = |field: &str| -> bool {
        match field {
            "category" => raw.category.is_some(),
            "amount" => raw.amount.is_some(),
            "title" => raw.title.is_some(),
            "client" => raw.client.is_some(),
            "currency" => raw.currency.is_some(),
            "issued_at" => raw.issued_at.is_some(),
            "reference_number" => has_reference,
            "vendor" => has_vendor,
            _ => false,
        }
    };

    let mut confidence = 0.0;
    for (field, weight) in FIELD_WEIGHTS {
        if present(field) {
            let field_conf = raw.field_confidence.get(*field).copied().unwrap_or(1.0);
            confidence += weight * field_conf.clamp(0.0, 1.0);
        }
    }

    confidence.min(CONFIDENCE_CAP)
}
