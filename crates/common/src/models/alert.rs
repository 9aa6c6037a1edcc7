//! Alert entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Which rule produced an alert. Together with the subject document id
/// this forms the alert's identity: at most one active alert exists per
/// `(subject_document_id, rule_kind)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// PO utilization ratio crossed a threshold (subject: PO)
    PoUtilization,
    /// Linked invoice pushes consumption past the PO cap (subject: invoice)
    BalanceExceeded,
    /// Invoice currency differs from its linked PO (subject: invoice)
    CurrencyMismatch,
    /// Client or vendor differs from the linked PO (subject: invoice)
    PartyMismatch,
    /// Invoice dated before its linked PO was created (subject: invoice)
    DateAnomaly,
    /// PO falls outside its governing agreement's validity window (subject: PO)
    AgreementWindow,
    /// Agreement close to or past its expiry date (subject: agreement)
    AgreementExpiry,
}

/// Derived, ephemeral-but-persisted signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Uuid,

    pub title: String,

    /// Interpolated from current computed values at evaluation time;
    /// refreshed in place while the alert's identity persists.
    pub description: String,

    pub level: AlertLevel,

    pub timestamp: DateTime<Utc>,

    pub subject_document_id: Uuid,

    pub rule_kind: RuleKind,

    pub acknowledged: bool,
}

impl AlertRecord {
    /// Identity key for the at-most-one-active invariant.
    pub fn key(&self) -> (Uuid, RuleKind) {
        (self.subject_document_id, self.rule_kind)
    }
}
