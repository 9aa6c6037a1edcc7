//! PO utilization state

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived, per-PO consumption snapshot. Always recomputed from the
/// current document set inside the owning transaction, never drifted
/// incrementally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationState {
    pub po_id: Uuid,

    /// PO capacity (the PO's amount, in the PO's currency)
    pub cap: f64,

    /// Sum of currently linked, convertible invoice amounts in PO currency
    pub consumed: f64,

    pub invoice_count: usize,
}

impl UtilizationState {
    /// Utilization ratio. A zero cap is degenerate: 100% utilized if any
    /// invoice is linked, else 0%.
    pub fn ratio(&self) -> f64 {
        if self.cap > 0.0 {
            self.consumed / self.cap
        } else if self.invoice_count > 0 {
            1.0
        } else {
            0.0
        }
    }

    pub fn remaining(&self) -> f64 {
        self.cap - self.consumed
    }
}
