//! Alert rules
//!
//! Each rule maps current computed state to a desired alert (or to
//! nothing, which retracts any previously raised alert for the same
//! subject and rule). Descriptions interpolate the values computed at
//! evaluation time so the message always reflects the latest state,
//! while the alert's identity is the `(subject, rule_kind)` pair.

use crate::utilization::CurrencyCondition;
use chrono::{DateTime, Utc};
use doculink_common::config::AlertConfig;
use doculink_common::models::{AlertLevel, DocumentRecord, RuleKind, UtilizationState};
use uuid::Uuid;

/// The alert a rule wants active for its subject.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredAlert {
    pub subject_document_id: Uuid,
    pub rule_kind: RuleKind,
    pub level: AlertLevel,
    pub title: String,
    pub description: String,
}

/// PO utilization thresholds: warning at 80%, critical at 95% of cap.
pub fn po_utilization(
    po: &DocumentRecord,
    state: &UtilizationState,
    config: &AlertConfig,
) -> Option<DesiredAlert> {
    let ratio = state.ratio();

    let (level, title) = if ratio >= config.utilization_critical {
        (AlertLevel::Critical, "Purchase Order Nearly Fully Consumed")
    } else if ratio >= config.utilization_warning {
        (
            AlertLevel::Warning,
            "Purchase Order Approaching Full Utilization",
        )
    } else {
        return None;
    };

    Some(DesiredAlert {
        subject_document_id: po.id,
        rule_kind: RuleKind::PoUtilization,
        level,
        title: title.to_string(),
        description: format!(
            "PO {} is {:.1}% utilized ({} invoice(s) totaling {:.2} {} of {:.2} {}). {:.2} {} remaining.",
            po.title,
            ratio * 100.0,
            state.invoice_count,
            state.consumed,
            po.currency,
            state.cap,
            po.currency,
            state.remaining(),
            po.currency,
        ),
    })
}

/// Mismatch rules for one linked invoice: balance overrun, currency
/// difference, party difference, and date anomaly. Evaluated together
/// because they share the invoice/PO pair.
pub fn invoice_against_po(
    invoice: &DocumentRecord,
    po: &DocumentRecord,
    state: &UtilizationState,
    conditions: &[CurrencyCondition],
) -> Vec<DesiredAlert> {
    let mut desired = Vec::new();

    let condition = conditions.iter().find(|c| c.invoice_id == invoice.id);

    // Contribution of this invoice in PO currency. An unconvertible
    // amount is unknown, so the balance rule stays silent for it and the
    // currency rule carries the signal.
    let contribution = match condition {
        None => Some(invoice.amount),
        Some(c) => c.converted,
    };

    if let Some(contribution) = contribution {
        let other_consumed = state.consumed - contribution;
        if other_consumed + contribution > state.cap {
            desired.push(DesiredAlert {
                subject_document_id: invoice.id,
                rule_kind: RuleKind::BalanceExceeded,
                level: AlertLevel::Critical,
                title: "Invoice Exceeds Remaining Balance".to_string(),
                description: format!(
                    "Invoice {} ({:.2} {}) exceeds remaining balance on PO {}: {:.2} {} consumed of {:.2} {} cap.",
                    invoice.title,
                    contribution,
                    po.currency,
                    po.title,
                    state.consumed,
                    po.currency,
                    state.cap,
                    po.currency,
                ),
            });
        }
    }

    if let Some(condition) = condition {
        let detail = match condition.converted {
            Some(value) => format!("converted at {:.2} {}", value, condition.po_currency),
            None => "no conversion rate configured; amount excluded from utilization".to_string(),
        };
        desired.push(DesiredAlert {
            subject_document_id: invoice.id,
            rule_kind: RuleKind::CurrencyMismatch,
            level: AlertLevel::Warning,
            title: "Invoice Currency Mismatch".to_string(),
            description: format!(
                "Invoice {} currency ({}) differs from PO {} currency ({}); {}.",
                invoice.title, condition.invoice_currency, po.title, condition.po_currency, detail,
            ),
        });
    }

    let client_differs = !invoice.same_client(po);
    let vendor_differs = matches!(
        (&invoice.vendor, &po.vendor),
        (Some(a), Some(b)) if !a.eq_ignore_ascii_case(b)
    );
    if client_differs || vendor_differs {
        let which = match (client_differs, vendor_differs) {
            (true, true) => "client and vendor",
            (true, false) => "client",
            _ => "vendor",
        };
        desired.push(DesiredAlert {
            subject_document_id: invoice.id,
            rule_kind: RuleKind::PartyMismatch,
            level: AlertLevel::Warning,
            title: "Invoice Party Mismatch".to_string(),
            description: format!(
                "Invoice {} {} differs from linked PO {} (invoice: {} / {}, PO: {} / {}).",
                invoice.title,
                which,
                po.title,
                invoice.client,
                invoice.vendor.as_deref().unwrap_or("-"),
                po.client,
                po.vendor.as_deref().unwrap_or("-"),
            ),
        });
    }

    if invoice.created_at < po.created_at {
        desired.push(DesiredAlert {
            subject_document_id: invoice.id,
            rule_kind: RuleKind::DateAnomaly,
            level: AlertLevel::Warning,
            title: "Invoice Dated Before Purchase Order".to_string(),
            description: format!(
                "Invoice {} ({}) predates its linked PO {} ({}).",
                invoice.title,
                invoice.created_at.format("%Y-%m-%d"),
                po.title,
                po.created_at.format("%Y-%m-%d"),
            ),
        });
    }

    desired
}

/// A PO outside its governing agreement's validity window.
pub fn agreement_window(po: &DocumentRecord, agreement: &DocumentRecord) -> Option<DesiredAlert> {
    let valid_until = agreement.due_date?;
    if po.created_at >= agreement.created_at && po.created_at <= valid_until {
        return None;
    }

    Some(DesiredAlert {
        subject_document_id: po.id,
        rule_kind: RuleKind::AgreementWindow,
        level: AlertLevel::Warning,
        title: "Purchase Order Outside Contract Period".to_string(),
        description: format!(
            "PO {} ({}) is outside the validity period of contract {} (valid {} to {}).",
            po.title,
            po.created_at.format("%Y-%m-%d"),
            agreement.title,
            agreement.created_at.format("%Y-%m-%d"),
            valid_until.format("%Y-%m-%d"),
        ),
    })
}

/// Agreement expiry: warning inside the configured window, critical
/// once the due date has passed.
pub fn agreement_expiry(
    agreement: &DocumentRecord,
    governed_pos: &[DocumentRecord],
    governed_invoice_count: usize,
    now: DateTime<Utc>,
    config: &AlertConfig,
) -> Option<DesiredAlert> {
    let due = agreement.due_date?;
    let days_until_expiry = (due - now).num_days();

    let context = if governed_pos.is_empty() {
        String::new()
    } else {
        let total_value: f64 = governed_pos.iter().map(|po| po.amount).sum();
        format!(
            " This contract governs {} PO(s) worth {:.2} {} with {} linked invoice(s).",
            governed_pos.len(),
            total_value,
            agreement.currency,
            governed_invoice_count,
        )
    };

    if due < now {
        Some(DesiredAlert {
            subject_document_id: agreement.id,
            rule_kind: RuleKind::AgreementExpiry,
            level: AlertLevel::Critical,
            title: "Contract Has Expired".to_string(),
            description: format!(
                "Service Agreement {} expired on {}.{} Please renew or terminate.",
                agreement.title,
                due.format("%Y-%m-%d"),
                context,
            ),
        })
    } else if days_until_expiry <= config.expiry_warning_days {
        Some(DesiredAlert {
            subject_document_id: agreement.id,
            rule_kind: RuleKind::AgreementExpiry,
            level: AlertLevel::Warning,
            title: "Contract Expiring Soon".to_string(),
            description: format!(
                "Service Agreement {} will expire in {} days ({}).{} Please review renewal options.",
                agreement.title,
                days_until_expiry,
                due.format("%Y-%m-%d"),
                context,
            ),
        })
    } else {
        None
    }
}
