//! DocuLink Engine
//!
//! The document linking and alert-generation core:
//! - `normalizer` canonicalizes raw extraction output into records
//! - `dedup` rejects documents already present in storage
//! - `linker` attaches invoices and agreements to purchase orders
//!   through a prioritized, confidence-scored strategy cascade
//! - `utilization` maintains running PO consumption state
//! - `alerts` derives leveled alerts idempotently from current state
//! - `pipeline` ties the stages into atomic per-event transactions

pub mod alerts;
pub mod dedup;
pub mod linker;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod utilization;

pub use normalizer::RawDocument;
pub use pipeline::{Engine, IngestOutcome, LinkOutcome};
