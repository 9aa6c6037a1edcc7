//! Metrics for the linking and alert engine
//!
//! Counter series recorded at transaction boundaries, exported through
//! whatever recorder the embedding application installs.

use metrics::{counter, describe_counter, Unit};

/// Metrics prefix for all DocuLink series
pub const METRICS_PREFIX: &str = "doculink";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Documents accepted by the ingest transaction"
    );

    describe_counter!(
        format!("{}_duplicates_detected_total", METRICS_PREFIX),
        Unit::Count,
        "Ingest attempts resolved as duplicates of a stored document"
    );

    describe_counter!(
        format!("{}_links_created_total", METRICS_PREFIX),
        Unit::Count,
        "Links attached by the strategy cascade or an operator"
    );

    describe_counter!(
        format!("{}_documents_flagged_total", METRICS_PREFIX),
        Unit::Count,
        "Documents left unlinked and flagged for follow-up"
    );

    describe_counter!(
        format!("{}_alerts_raised_total", METRICS_PREFIX),
        Unit::Count,
        "Alerts created or updated by reconciliation"
    );

    describe_counter!(
        format!("{}_alerts_retracted_total", METRICS_PREFIX),
        Unit::Count,
        "Alerts retracted after their condition cleared"
    );

    tracing::info!("Metrics registered");
}

pub fn record_ingested(category: &str) {
    counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        "category" => category.to_string()
    )
    .increment(1);
}

pub fn record_duplicate(rule: &str) {
    counter!(
        format!("{}_duplicates_detected_total", METRICS_PREFIX),
        "rule" => rule.to_string()
    )
    .increment(1);
}

pub fn record_link(strategy: &str) {
    counter!(
        format!("{}_links_created_total", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .increment(1);
}

pub fn record_flagged() {
    counter!(format!("{}_documents_flagged_total", METRICS_PREFIX)).increment(1);
}

pub fn record_alert_changes(raised: usize, retracted: usize) {
    if raised > 0 {
        counter!(format!("{}_alerts_raised_total", METRICS_PREFIX)).increment(raised as u64);
    }
    if retracted > 0 {
        counter!(format!("{}_alerts_retracted_total", METRICS_PREFIX))
            .increment(retracted as u64);
    }
}
