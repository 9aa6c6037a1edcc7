//! PO utilization tracking
//!
//! Rebuilds a PO's `UtilizationState` from the invoices currently
//! linked to it. Amounts are converted into the PO currency through the
//! configured rate provider; an invoice with no conversion path is
//! excluded from the consumed total and reported as a currency
//! condition for the alert rules instead of being silently summed.

use doculink_common::currency::RateProvider;
use doculink_common::models::{DocumentRecord, UtilizationState};
use tracing::debug;
use uuid::Uuid;

/// An invoice whose currency differs from its PO's.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyCondition {
    pub invoice_id: Uuid,
    pub invoice_currency: String,
    pub po_currency: String,
    pub amount: f64,
    /// Amount in PO currency when a conversion path exists
    pub converted: Option<f64>,
}

/// Recompute utilization for `po` from its currently linked invoices.
pub fn recompute(
    po: &DocumentRecord,
    linked_invoices: &[DocumentRecord],
    rates: &dyn RateProvider,
) -> (UtilizationState, Vec<CurrencyCondition>) {
    let mut consumed = 0.0;
    let mut conditions = Vec::new();

    for invoice in linked_invoices {
        if invoice.currency == po.currency {
            consumed += invoice.amount;
            continue;
        }

        let converted = rates.convert(invoice.amount, &invoice.currency, &po.currency);
        if let Some(value) = converted {
            consumed += value;
        }
        conditions.push(CurrencyCondition {
            invoice_id: invoice.id,
            invoice_currency: invoice.currency.clone(),
            po_currency: po.currency.clone(),
            amount: invoice.amount,
            converted,
        });
    }

    let state = UtilizationState {
        po_id: po.id,
        cap: po.amount,
        consumed,
        invoice_count: linked_invoices.len(),
    };

    debug!(
        po_id = %po.id,
        consumed = state.consumed,
        cap = state.cap,
        invoice_count = state.invoice_count,
        "Utilization recomputed"
    );

    (state, conditions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use doculink_common::currency::FixedRateProvider;
    use doculink_common::models::{DocumentCategory, DocumentStatus};

    fn po(amount: f64) -> DocumentRecord {
        DocumentRecord {
            id: Uuid::from_u128(1),
            category: DocumentCategory::ClientPo,
            title: "PO 7781".to_string(),
            client: "Northwind".to_string(),
            vendor: None,
            amount,
            currency: "USD".to_string(),
            status: DocumentStatus::Approved,
            created_at: Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap(),
            due_date: None,
            confidence: 0.9,
            reference_number: Some("7781".to_string()),
            linked_to: None,
            source_fingerprint: "fp-po".to_string(),
        }
    }

    fn invoice(id: u128, amount: f64, currency: &str) -> DocumentRecord {
        let mut record = po(amount);
        record.id = Uuid::from_u128(id);
        record.category = DocumentCategory::ClientInvoice;
        record.currency = currency.to_string();
        record.linked_to = Some(Uuid::from_u128(1));
        record.source_fingerprint = format!("fp-{}", id);
        record
    }

    #[test]
    fn test_same_currency_sums() {
        let po = po(150_000.0);
        let invoices = vec![invoice(2, 80_000.0, "USD"), invoice(3, 70_000.0, "USD")];
        let (state, conditions) = recompute(&po, &invoices, &FixedRateProvider::new());

        assert_eq!(state.consumed, 150_000.0);
        assert_eq!(state.invoice_count, 2);
        assert_eq!(state.ratio(), 1.0);
        assert!(conditions.is_empty());
    }

    #[test]
    fn test_convertible_currency_converted_and_reported() {
        let po = po(100_000.0);
        let invoices = vec![invoice(2, 10_000.0, "EUR")];
        let rates = FixedRateProvider::new().with_rate("EUR", "USD", 1.10);

        let (state, conditions) = recompute(&po, &invoices, &rates);
        assert!((state.consumed - 11_000.0).abs() < 1e-6);
        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].converted.is_some());
    }

    #[test]
    fn test_unconvertible_currency_excluded() {
        let po = po(100_000.0);
        let invoices = vec![invoice(2, 40_000.0, "USD"), invoice(3, 10_000.0, "CHF")];

        let (state, conditions) = recompute(&po, &invoices, &FixedRateProvider::new());
        assert_eq!(state.consumed, 40_000.0);
        assert_eq!(state.invoice_count, 2);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].invoice_currency, "CHF");
        assert_eq!(conditions[0].converted, None);
    }

    #[test]
    fn test_empty_po() {
        let po = po(100_000.0);
        let (state, conditions) = recompute(&po, &[], &FixedRateProvider::new());
        assert_eq!(state.consumed, 0.0);
        assert_eq!(state.ratio(), 0.0);
        assert!(conditions.is_empty());
    }
}
