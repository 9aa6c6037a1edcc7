//! Document entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Document category as produced by the extraction collaborator's
/// classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentCategory {
    #[serde(rename = "Client PO")]
    ClientPo,
    #[serde(rename = "Vendor PO")]
    VendorPo,
    #[serde(rename = "Client Invoice")]
    ClientInvoice,
    #[serde(rename = "Vendor Invoice")]
    VendorInvoice,
    #[serde(rename = "Service Agreement")]
    ServiceAgreement,
}

impl DocumentCategory {
    /// Parse the category label used on the extraction boundary.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "Client PO" => Some(Self::ClientPo),
            "Vendor PO" => Some(Self::VendorPo),
            "Client Invoice" => Some(Self::ClientInvoice),
            "Vendor Invoice" => Some(Self::VendorInvoice),
            "Service Agreement" => Some(Self::ServiceAgreement),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientPo => "Client PO",
            Self::VendorPo => "Vendor PO",
            Self::ClientInvoice => "Client Invoice",
            Self::VendorInvoice => "Vendor Invoice",
            Self::ServiceAgreement => "Service Agreement",
        }
    }

    pub fn is_po(&self) -> bool {
        matches!(self, Self::ClientPo | Self::VendorPo)
    }

    pub fn is_invoice(&self) -> bool {
        matches!(self, Self::ClientInvoice | Self::VendorInvoice)
    }

    pub fn is_agreement(&self) -> bool {
        matches!(self, Self::ServiceAgreement)
    }

    /// The PO category an invoice of this category links against.
    pub fn po_counterpart(&self) -> Option<DocumentCategory> {
        match self {
            Self::ClientInvoice => Some(Self::ClientPo),
            Self::VendorInvoice => Some(Self::VendorPo),
            _ => None,
        }
    }
}

/// Document review status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    Draft,
    Approved,
    #[serde(rename = "Pending Review")]
    PendingReview,
    Flagged,
}

/// One ingested artifact with canonical field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Stable identifier, immutable once assigned
    pub id: Uuid,

    pub category: DocumentCategory,

    pub title: String,

    pub client: String,

    pub vendor: Option<String>,

    /// Non-negative monetary amount in `currency`
    pub amount: f64,

    /// ISO 4217 currency code
    pub currency: String,

    pub status: DocumentStatus,

    pub created_at: DateTime<Utc>,

    /// Agreement expiry or invoice payment due date
    pub due_date: Option<DateTime<Utc>>,

    /// Extraction quality in [0, 1]
    pub confidence: f64,

    /// PO/invoice number as printed on the artifact
    pub reference_number: Option<String>,

    /// At most one outgoing link: invoice -> PO or agreement -> PO
    pub linked_to: Option<Uuid>,

    /// Dedup key derived from the source artifact, not user-visible
    pub source_fingerprint: String,
}

impl DocumentRecord {
    /// Case-insensitive client comparison, the way the linking rules
    /// match parties.
    pub fn same_client(&self, other: &DocumentRecord) -> bool {
        self.client.eq_ignore_ascii_case(&other.client)
    }

    /// Case-insensitive vendor comparison; two missing vendors do not
    /// count as a match.
    pub fn same_vendor(&self, other: &DocumentRecord) -> bool {
        match (&self.vendor, &other.vendor) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

/// Derive the dedup fingerprint from the source artifact's name and
/// content checksum. Stable across re-uploads of the same file.
pub fn source_fingerprint(source_name: &str, content_checksum: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_name.trim().to_lowercase().as_bytes());
    hasher.update(b"\x00");
    hasher.update(content_checksum.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_roundtrip() {
        for label in [
            "Client PO",
            "Vendor PO",
            "Client Invoice",
            "Vendor Invoice",
            "Service Agreement",
        ] {
            let category = DocumentCategory::parse(label).unwrap();
            assert_eq!(category.as_str(), label);
        }
        assert!(DocumentCategory::parse("Receipt").is_none());
    }

    #[test]
    fn test_po_counterpart_direction() {
        assert_eq!(
            DocumentCategory::ClientInvoice.po_counterpart(),
            Some(DocumentCategory::ClientPo)
        );
        assert_eq!(
            DocumentCategory::VendorInvoice.po_counterpart(),
            Some(DocumentCategory::VendorPo)
        );
        assert_eq!(DocumentCategory::ServiceAgreement.po_counterpart(), None);
    }

    #[test]
    fn test_fingerprint_stable_and_name_insensitive() {
        let a = source_fingerprint("Invoice-0042.PDF", "abc123");
        let b = source_fingerprint("invoice-0042.pdf", "abc123");
        let c = source_fingerprint("invoice-0042.pdf", "abc124");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
