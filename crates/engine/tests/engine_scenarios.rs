//! End-to-end engine scenarios against the in-memory store.

use chrono::{Duration, Utc};
use doculink_common::config::EngineConfig;
use doculink_common::currency::FixedRateProvider;
use doculink_common::models::{AlertLevel, DocumentStatus, RuleKind};
use doculink_common::storage::{DocumentFilter, DocumentStore, MemoryStore};
use doculink_engine::pipeline::{Engine, IngestOutcome, LinkOutcome};
use doculink_engine::RawDocument;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine_with_store() -> (Engine, Arc<MemoryStore>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(
        store.clone(),
        Arc::new(FixedRateProvider::new()),
        EngineConfig::default(),
    );
    (engine, store)
}

fn raw(
    source: &str,
    category: &str,
    title: &str,
    amount: &str,
    reference: Option<&str>,
    issued: &str,
) -> RawDocument {
    RawDocument {
        source_name: Some(source.to_string()),
        content_checksum: Some(format!("sum-{}", source)),
        category: Some(category.to_string()),
        title: Some(title.to_string()),
        client: Some("Northwind Logistics".to_string()),
        vendor: Some("Meridian Consulting".to_string()),
        amount: Some(amount.to_string()),
        currency: Some("USD".to_string()),
        issued_at: Some(issued.to_string()),
        due_date: None,
        reference_number: reference.map(String::from),
        field_confidence: HashMap::new(),
    }
}

async fn ingest_created(engine: &Engine, raw: RawDocument) -> doculink_common::DocumentRecord {
    match engine.ingest(raw).await.expect("ingest") {
        IngestOutcome::Created(doc) => doc,
        IngestOutcome::DuplicateOf(id) => panic!("unexpected duplicate of {}", id),
    }
}

#[tokio::test]
async fn dedup_symmetry_second_ingest_returns_existing_id() {
    let (engine, store) = engine_with_store();

    let first = raw(
        "po-7781.pdf",
        "Client PO",
        "Purchase Order PO-7781",
        "150000",
        Some("PO-7781"),
        "2026-01-15",
    );
    let created = ingest_created(&engine, first.clone()).await;

    let outcome = engine.ingest(first).await.expect("second ingest");
    assert_eq!(outcome, IngestOutcome::DuplicateOf(created.id));

    let stored = store
        .list_documents(DocumentFilter::all())
        .await
        .expect("list");
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn extraction_incomplete_surfaces_and_creates_nothing() {
    let (engine, store) = engine_with_store();

    let mut missing_category = raw(
        "scan-001.pdf",
        "Client Invoice",
        "Invoice INV-1",
        "500",
        None,
        "2026-03-01",
    );
    missing_category.category = None;
    assert!(engine.ingest(missing_category).await.is_err());

    let mut missing_amount = raw(
        "scan-002.pdf",
        "Client Invoice",
        "Invoice INV-2",
        "500",
        None,
        "2026-03-01",
    );
    missing_amount.amount = None;
    assert!(engine.ingest(missing_amount).await.is_err());

    let stored = store
        .list_documents(DocumentFilter::all())
        .await
        .expect("list");
    assert!(stored.is_empty());
}

#[tokio::test]
async fn end_to_end_po_consumption_scenario() {
    let (engine, _store) = engine_with_store();

    let po = ingest_created(
        &engine,
        raw(
            "po-7781.pdf",
            "Client PO",
            "Purchase Order PO-7781",
            "150000",
            Some("PO-7781"),
            "2026-01-15",
        ),
    )
    .await;

    // Invoice A: 80,000 referencing the PO number. Linked, 53.3%
    // utilized, no alerts.
    let invoice_a = ingest_created(
        &engine,
        raw(
            "inv-9001.pdf",
            "Client Invoice",
            "Invoice INV-9001",
            "80000",
            Some("PO-7781"),
            "2026-03-10",
        ),
    )
    .await;
    assert_eq!(invoice_a.linked_to, Some(po.id));

    let state = engine
        .utilization(po.id)
        .await
        .expect("utilization")
        .expect("state present");
    assert_eq!(state.consumed, 80_000.0);
    assert!((state.ratio() - 0.5333).abs() < 0.001);

    let alerts = engine.evaluate_alerts(po.id).await.expect("evaluate");
    assert!(alerts.is_empty(), "no alerts at 53.3%: {:?}", alerts);

    // Invoice B: 70,000 more. Exactly at cap: utilization critical, but
    // no balance-exceeded alert.
    let invoice_b = ingest_created(
        &engine,
        raw(
            "inv-9002.pdf",
            "Client Invoice",
            "Invoice INV-9002",
            "70000",
            Some("PO-7781"),
            "2026-03-12",
        ),
    )
    .await;
    assert_eq!(invoice_b.linked_to, Some(po.id));

    let state = engine.utilization(po.id).await.unwrap().unwrap();
    assert_eq!(state.consumed, 150_000.0);
    assert_eq!(state.ratio(), 1.0);

    let alerts = engine.evaluate_alerts(po.id).await.expect("evaluate");
    assert_eq!(alerts.len(), 1, "only the utilization alert: {:?}", alerts);
    let utilization_alert = &alerts[0];
    assert_eq!(utilization_alert.rule_kind, RuleKind::PoUtilization);
    assert_eq!(utilization_alert.level, AlertLevel::Critical);
    assert_eq!(utilization_alert.subject_document_id, po.id);

    // Invoice C: 20,000 past the cap. Balance-exceeded critical joins
    // the utilization critical, whose identity persists.
    let invoice_c = ingest_created(
        &engine,
        raw(
            "inv-9003.pdf",
            "Client Invoice",
            "Invoice INV-9003",
            "20000",
            Some("PO-7781"),
            "2026-03-20",
        ),
    )
    .await;
    assert_eq!(invoice_c.linked_to, Some(po.id));

    let state = engine.utilization(po.id).await.unwrap().unwrap();
    assert_eq!(state.consumed, 170_000.0);

    let alerts = engine.evaluate_alerts(po.id).await.expect("evaluate");

    let utilization_after = alerts
        .iter()
        .find(|a| a.rule_kind == RuleKind::PoUtilization)
        .expect("utilization alert still active");
    assert_eq!(utilization_after.id, utilization_alert.id);
    assert_eq!(utilization_after.level, AlertLevel::Critical);
    assert!(utilization_after.description.contains("113.3%"));

    let exceeded = alerts
        .iter()
        .find(|a| {
            a.rule_kind == RuleKind::BalanceExceeded && a.subject_document_id == invoice_c.id
        })
        .expect("balance exceeded on invoice C");
    assert_eq!(exceeded.level, AlertLevel::Critical);
    assert!(exceeded.description.contains("exceeds remaining balance"));
}

#[tokio::test]
async fn alert_evaluation_is_idempotent() {
    let (engine, _store) = engine_with_store();

    let po = ingest_created(
        &engine,
        raw(
            "po-5500.pdf",
            "Client PO",
            "Purchase Order PO-5500",
            "100000",
            Some("PO-5500"),
            "2026-01-10",
        ),
    )
    .await;
    ingest_created(
        &engine,
        raw(
            "inv-5501.pdf",
            "Client Invoice",
            "Invoice INV-5501",
            "90000",
            Some("PO-5500"),
            "2026-02-01",
        ),
    )
    .await;

    let now = Utc::now();
    let first = engine.evaluate_alerts_at(po.id, now).await.expect("first");
    let second = engine
        .evaluate_alerts_at(po.id, now)
        .await
        .expect("second");
    let third = engine
        .evaluate_alerts_at(po.id, now + Duration::minutes(5))
        .await
        .expect("third");

    assert!(!first.is_empty());
    assert_eq!(first, second);
    // Unchanged state five minutes later: same ids, same fields.
    assert_eq!(first, third);
}

#[tokio::test]
async fn utilization_threshold_boundaries_through_full_path() {
    let (engine, _store) = engine_with_store();

    let po = ingest_created(
        &engine,
        raw(
            "po-100.pdf",
            "Client PO",
            "Purchase Order PO-100",
            "10000",
            Some("PO-100"),
            "2026-01-05",
        ),
    )
    .await;

    // 79.99% consumed: below the warning line.
    let small = ingest_created(
        &engine,
        raw(
            "inv-101.pdf",
            "Client Invoice",
            "Invoice INV-101",
            "7999",
            Some("PO-100"),
            "2026-02-01",
        ),
    )
    .await;
    let alerts = engine.evaluate_alerts(po.id).await.unwrap();
    assert!(alerts.is_empty());

    // Nudge to exactly 80%: warning.
    engine.delete_document(small.id).await.expect("delete");
    ingest_created(
        &engine,
        raw(
            "inv-102.pdf",
            "Client Invoice",
            "Invoice INV-102",
            "8000",
            Some("PO-100"),
            "2026-02-02",
        ),
    )
    .await;
    let alerts = engine.evaluate_alerts(po.id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_kind, RuleKind::PoUtilization);
    assert_eq!(alerts[0].level, AlertLevel::Warning);
    let warning_id = alerts[0].id;

    // 94.99%: still the same warning record.
    ingest_created(
        &engine,
        raw(
            "inv-103.pdf",
            "Client Invoice",
            "Invoice INV-103",
            "1499",
            Some("PO-100"),
            "2026-02-03",
        ),
    )
    .await;
    let alerts = engine.evaluate_alerts(po.id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level, AlertLevel::Warning);
    assert_eq!(alerts[0].id, warning_id);

    // 95%: the record escalates in place.
    ingest_created(
        &engine,
        raw(
            "inv-104.pdf",
            "Client Invoice",
            "Invoice INV-104",
            "1",
            Some("PO-100"),
            "2026-02-04",
        ),
    )
    .await;
    let alerts = engine.evaluate_alerts(po.id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level, AlertLevel::Critical);
    assert_eq!(alerts[0].id, warning_id);
}

#[tokio::test]
async fn utilization_conservation_over_link_unlink_delete() {
    let (engine, store) = engine_with_store();

    let po_a = ingest_created(
        &engine,
        raw(
            "po-a.pdf",
            "Client PO",
            "Purchase Order PO-A100",
            "1000000",
            Some("PO-A100"),
            "2026-01-02",
        ),
    )
    .await;
    let po_b = ingest_created(
        &engine,
        raw(
            "po-b.pdf",
            "Client PO",
            "Purchase Order PO-B200",
            "1000000",
            Some("PO-B200"),
            "2026-01-03",
        ),
    )
    .await;

    let mut invoice_ids: Vec<Uuid> = Vec::new();
    for i in 0..6 {
        let amount = 10_000.0 + 1_000.0 * i as f64;
        let doc = ingest_created(
            &engine,
            raw(
                &format!("inv-c{}.pdf", i),
                "Client Invoice",
                &format!("Invoice INV-C{}", i),
                &format!("{}", amount),
                Some("PO-A100"),
                &format!("2026-02-{:02}", 10 + i),
            ),
        )
        .await;
        assert_eq!(doc.linked_to, Some(po_a.id));
        invoice_ids.push(doc.id);
    }

    conserved_single(&engine, &store, po_a.id).await;
    conserved_single(&engine, &store, po_b.id).await;

    // Re-link two invoices to the other PO.
    for id in invoice_ids.iter().take(2) {
        let outcome = engine.relink(*id, Some(po_b.id)).await.expect("relink");
        assert!(matches!(outcome, LinkOutcome::Linked(_)));
        conserved_single(&engine, &store, po_a.id).await;
        conserved_single(&engine, &store, po_b.id).await;
    }

    // Detach one.
    let outcome = engine.relink(invoice_ids[2], None).await.expect("unlink");
    assert_eq!(outcome, LinkOutcome::Unlinked);
    conserved_single(&engine, &store, po_a.id).await;
    conserved_single(&engine, &store, po_b.id).await;

    // Delete one linked invoice outright.
    engine
        .delete_document(invoice_ids[3])
        .await
        .expect("delete");
    conserved_single(&engine, &store, po_a.id).await;
    conserved_single(&engine, &store, po_b.id).await;

    // Delete a whole PO: its dependents are released and flagged.
    engine.delete_document(po_b.id).await.expect("delete po");
    for id in invoice_ids.iter().take(2) {
        let doc = store.get_document(*id).await.expect("get").expect("doc");
        assert_eq!(doc.linked_to, None);
        assert_eq!(doc.status, DocumentStatus::Flagged);
    }
    conserved_single(&engine, &store, po_a.id).await;
}

#[tokio::test]
async fn utilization_conservation_under_random_operation_sequences() {
    let (engine, store) = engine_with_store();
    let mut rng = StdRng::seed_from_u64(0x5EED);

    let po_a = ingest_created(
        &engine,
        raw(
            "po-ra.pdf",
            "Client PO",
            "Purchase Order PO-RA10",
            "5000000",
            Some("PO-RA10"),
            "2026-01-02",
        ),
    )
    .await;
    let po_b = ingest_created(
        &engine,
        raw(
            "po-rb.pdf",
            "Client PO",
            "Purchase Order PO-RB20",
            "5000000",
            Some("PO-RB20"),
            "2026-01-03",
        ),
    )
    .await;

    let mut live: Vec<Uuid> = Vec::new();
    for i in 0..8 {
        // Spread amounts far enough apart that the fuzzy dedup rule
        // never collapses two of them.
        let amount = 20_000.0 + 5_000.0 * i as f64;
        let doc = ingest_created(
            &engine,
            raw(
                &format!("inv-r{}.pdf", i),
                "Client Invoice",
                &format!("Invoice INV-R{}", i),
                &format!("{}", amount),
                Some("PO-RA10"),
                &format!("2026-02-{:02}", 2 + i),
            ),
        )
        .await;
        live.push(doc.id);
    }

    for _ in 0..40 {
        let id = live[rng.gen_range(0..live.len())];
        match rng.gen_range(0..4) {
            0 => {
                let _ = engine.relink(id, Some(po_a.id)).await;
            }
            1 => {
                let _ = engine.relink(id, Some(po_b.id)).await;
            }
            2 => {
                let _ = engine.relink(id, None).await;
            }
            _ => {
                engine.delete_document(id).await.expect("delete");
            }
        }
        conserved_single(&engine, &store, po_a.id).await;
        conserved_single(&engine, &store, po_b.id).await;
    }
}

async fn conserved_single(engine: &Engine, store: &Arc<MemoryStore>, po_id: Uuid) {
    let linked_sum: f64 = store
        .list_documents(DocumentFilter::all().linked_to(po_id))
        .await
        .expect("list")
        .iter()
        .filter(|d| d.category.is_invoice())
        .map(|d| d.amount)
        .sum();
    let state = engine
        .utilization(po_id)
        .await
        .expect("utilization")
        .expect("state");
    assert_eq!(state.consumed, linked_sum);
}

#[tokio::test]
async fn linker_cascade_precedence_title_beats_amount() {
    let (engine, _store) = engine_with_store();

    // The first PO carries the cited number only in its title (its own
    // reference differs, so the exact strategy misses); the second PO's
    // remaining capacity matches the invoice amount closely. The title
    // strategy must win and the amount strategy must never run.
    let title_po = ingest_created(
        &engine,
        raw(
            "po-t.pdf",
            "Client PO",
            "PO 88150 annual services",
            "500000",
            Some("PO-T500"),
            "2026-01-05",
        ),
    )
    .await;
    ingest_created(
        &engine,
        raw(
            "po-m.pdf",
            "Client PO",
            "Purchase Order PO-M900",
            "10000",
            Some("PO-M900"),
            "2026-01-06",
        ),
    )
    .await;

    let invoice = raw(
        "inv-t1.pdf",
        "Client Invoice",
        "Invoice INV-T1",
        "10000",
        Some("88150"),
        "2026-02-01",
    );

    let doc = ingest_created(&engine, invoice).await;
    assert_eq!(doc.linked_to, Some(title_po.id));
}

#[tokio::test]
async fn currency_mismatch_excluded_from_consumption_and_warned() {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(
        store.clone(),
        Arc::new(FixedRateProvider::new()), // no EUR->USD path
        EngineConfig::default(),
    );

    let po = ingest_created(
        &engine,
        raw(
            "po-fx.pdf",
            "Client PO",
            "Purchase Order PO-FX1",
            "100000",
            Some("PO-FX1"),
            "2026-01-05",
        ),
    )
    .await;

    let mut invoice = raw(
        "inv-fx.pdf",
        "Client Invoice",
        "Invoice INV-FX1",
        "40000",
        Some("PO-FX1"),
        "2026-02-01",
    );
    invoice.currency = Some("EUR".to_string());
    let invoice = ingest_created(&engine, invoice).await;
    assert_eq!(invoice.linked_to, Some(po.id));

    let state = engine.utilization(po.id).await.unwrap().unwrap();
    assert_eq!(state.consumed, 0.0, "unconvertible amount never summed");
    assert_eq!(state.invoice_count, 1);

    let alerts = engine.evaluate_alerts(invoice.id).await.unwrap();
    let mismatch = alerts
        .iter()
        .find(|a| a.rule_kind == RuleKind::CurrencyMismatch)
        .expect("currency mismatch warning");
    assert_eq!(mismatch.level, AlertLevel::Warning);
    assert!(mismatch.description.contains("EUR"));
}

#[tokio::test]
async fn expiry_alert_escalates_without_duplicating() {
    let (engine, store) = engine_with_store();

    let now = Utc::now();
    let due = now + Duration::days(20);

    let mut agreement_raw = raw(
        "msa-2026.pdf",
        "Service Agreement",
        "Master Services Agreement 2026",
        "250000",
        None,
        "2026-01-01",
    );
    agreement_raw.due_date = Some(due.format("%Y-%m-%d").to_string());

    let agreement = ingest_created(&engine, agreement_raw).await;
    // No PO matches: flagged terminal state, not an error.
    assert_eq!(agreement.status, DocumentStatus::Flagged);
    assert_eq!(agreement.linked_to, None);

    let alerts = engine
        .evaluate_alerts_at(agreement.id, now)
        .await
        .expect("evaluate");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_kind, RuleKind::AgreementExpiry);
    assert_eq!(alerts[0].level, AlertLevel::Warning);
    let warning_id = alerts[0].id;

    // Advance the clock past the due date: the same record escalates.
    let later = now + Duration::days(25);
    let alerts = engine
        .evaluate_alerts_at(agreement.id, later)
        .await
        .expect("evaluate");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].id, warning_id);
    assert_eq!(alerts[0].level, AlertLevel::Critical);
    assert!(alerts[0].description.contains("expired"));

    let all = store.list_alerts(None).await.expect("list");
    assert_eq!(
        all.iter()
            .filter(|a| a.rule_kind == RuleKind::AgreementExpiry)
            .count(),
        1
    );
}

#[tokio::test]
async fn acknowledged_alert_survives_reevaluation_without_duplicates() {
    let (engine, store) = engine_with_store();

    let po = ingest_created(
        &engine,
        raw(
            "po-ack.pdf",
            "Client PO",
            "Purchase Order PO-ACK",
            "10000",
            Some("PO-ACK"),
            "2026-01-05",
        ),
    )
    .await;
    ingest_created(
        &engine,
        raw(
            "inv-ack.pdf",
            "Client Invoice",
            "Invoice INV-ACK",
            "9000",
            Some("PO-ACK"),
            "2026-02-01",
        ),
    )
    .await;

    let alerts = engine.evaluate_alerts(po.id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    let acked = engine.acknowledge(alerts[0].id).await.expect("acknowledge");
    assert!(acked.acknowledged);

    // Condition still holds: the acknowledged record occupies the key.
    let alerts = engine.evaluate_alerts(po.id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].id, acked.id);
    assert!(alerts[0].acknowledged);

    // Condition clears: the acknowledged record is retracted.
    let invoices = store
        .list_documents(DocumentFilter::all().linked_to(po.id))
        .await
        .unwrap();
    engine.delete_document(invoices[0].id).await.unwrap();

    let alerts = engine.evaluate_alerts(po.id).await.unwrap();
    assert!(alerts.is_empty());
}

#[tokio::test]
async fn relink_validates_targets_and_updates_both_pos() {
    let (engine, _store) = engine_with_store();

    let po_a = ingest_created(
        &engine,
        raw(
            "po-r1.pdf",
            "Client PO",
            "Purchase Order PO-R1",
            "50000",
            Some("PO-R1"),
            "2026-01-05",
        ),
    )
    .await;
    let po_b = ingest_created(
        &engine,
        raw(
            "po-r2.pdf",
            "Client PO",
            "Purchase Order PO-R2",
            "50000",
            Some("PO-R2"),
            "2026-01-06",
        ),
    )
    .await;
    let invoice = ingest_created(
        &engine,
        raw(
            "inv-r1.pdf",
            "Client Invoice",
            "Invoice INV-R1",
            "30000",
            Some("PO-R1"),
            "2026-02-01",
        ),
    )
    .await;
    assert_eq!(invoice.linked_to, Some(po_a.id));

    // A PO itself cannot be relinked.
    assert!(engine.relink(po_a.id, Some(po_b.id)).await.is_err());
    // Nor can an invoice link to another invoice or to itself.
    assert!(engine.relink(invoice.id, Some(invoice.id)).await.is_err());
    assert!(engine
        .relink(invoice.id, Some(Uuid::new_v4()))
        .await
        .is_err());

    let outcome = engine
        .relink(invoice.id, Some(po_b.id))
        .await
        .expect("relink");
    assert!(matches!(outcome, LinkOutcome::Linked(ref r) if r.target_id == po_b.id));

    let state_a = engine.utilization(po_a.id).await.unwrap().unwrap();
    let state_b = engine.utilization(po_b.id).await.unwrap().unwrap();
    assert_eq!(state_a.consumed, 0.0);
    assert_eq!(state_b.consumed, 30_000.0);
}

#[tokio::test]
async fn unmatched_invoice_is_flagged_not_failed() {
    let (engine, _store) = engine_with_store();

    let doc = ingest_created(
        &engine,
        raw(
            "inv-orphan.pdf",
            "Client Invoice",
            "Invoice INV-ORPHAN",
            "500",
            None,
            "2026-03-01",
        ),
    )
    .await;
    assert_eq!(doc.linked_to, None);
    assert_eq!(doc.status, DocumentStatus::Flagged);
}
