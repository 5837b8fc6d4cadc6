//! Behaviour of the SQLite stores: uniqueness, eligibility filtering,
//! counter updates, event dedup, cascade delete, and email idempotency.

mod support;

use chrono::{Duration, Utc};
use tracklet_core::database::AutoRefreshOutcome;
use tracklet_core::{Database, TrackerError};
use tracklet_model::{
    Carrier, EmailProcessingRecord, EmailProcessingStatus,
    EmailScanMethod, NewShipment, ShipmentStatus,
};

use support::event;

#[tokio::test]
async fn on_disk_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tracklet.db");

    let db = Database::connect(&path).await.unwrap();
    db.shipments()
        .create(&NewShipment::new(
            "1Z999AA10123456784",
            Carrier::Ups,
            "socks",
        ))
        .await
        .unwrap();
    db.pool().close().await;

    // Reopening applies the schema idempotently and finds the same data.
    let reopened = Database::connect(&path).await.unwrap();
    let shipments = reopened.shipments().list().await.unwrap();
    assert_eq!(shipments.len(), 1);
    assert_eq!(shipments[0].tracking_number, "1Z999AA10123456784");
    reopened.pool().close().await;
}

#[tokio::test]
async fn create_enforces_tracking_number_uniqueness_per_carrier() {
    let db = Database::in_memory().await.unwrap();
    let store = db.shipments();

    let new =
        NewShipment::new("1Z999AA10123456784", Carrier::Ups, "socks");
    store.create(&new).await.unwrap();

    let duplicate = store.create(&new).await;
    assert!(matches!(duplicate, Err(TrackerError::Validation(_))));

    // The same number under a different carrier is a different shipment.
    let other_carrier =
        NewShipment::new("1Z999AA10123456784", Carrier::Dhl, "socks");
    assert!(store.create(&other_carrier).await.is_ok());
}

#[tokio::test]
async fn eligibility_filter_excludes_the_right_shipments() {
    let db = Database::in_memory().await.unwrap();
    let store = db.shipments();
    let now = Utc::now();
    let cutoff = now - Duration::days(30);
    let stale_before = now - Duration::hours(1);

    let eligible = store
        .create(&NewShipment::new(
            "9405511206213119531111",
            Carrier::Usps,
            "eligible",
        ))
        .await
        .unwrap();

    // Delivered shipments never appear.
    let delivered = store
        .create(&NewShipment::new(
            "9405511206213119532222",
            Carrier::Usps,
            "delivered",
        ))
        .await
        .unwrap();
    db.persist_refresh(
        delivered.id,
        &[event("Delivered", now)],
        ShipmentStatus::Delivered,
        None,
        tracklet_core::RefreshStamp::None,
        now,
    )
    .await
    .unwrap();

    // At the failure cap.
    let failing = store
        .create(&NewShipment::new(
            "9405511206213119533333",
            Carrier::Usps,
            "failing",
        ))
        .await
        .unwrap();
    for _ in 0..10 {
        store
            .update_auto_refresh_tracking(
                failing.id,
                &AutoRefreshOutcome::Failure("boom".to_string()),
                now,
            )
            .await
            .unwrap();
    }

    // Recently auto-refreshed.
    let fresh = store
        .create(&NewShipment::new(
            "9405511206213119534444",
            Carrier::Usps,
            "fresh",
        ))
        .await
        .unwrap();
    store
        .update_auto_refresh_tracking(
            fresh.id,
            &AutoRefreshOutcome::Success,
            now - Duration::minutes(10),
        )
        .await
        .unwrap();

    let results = store
        .get_active_for_auto_update(
            Carrier::Usps,
            cutoff,
            stale_before,
            10,
        )
        .await
        .unwrap();

    let ids: Vec<i64> = results.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![eligible.id]);
}

#[tokio::test]
async fn eligibility_orders_oldest_first_with_never_refreshed_leading() {
    let db = Database::in_memory().await.unwrap();
    let store = db.shipments();
    let now = Utc::now();

    let refreshed_old = store
        .create(&NewShipment::new(
            "9405511206213119531111",
            Carrier::Usps,
            "old refresh",
        ))
        .await
        .unwrap();
    store
        .update_auto_refresh_tracking(
            refreshed_old.id,
            &AutoRefreshOutcome::Success,
            now - Duration::hours(8),
        )
        .await
        .unwrap();

    let refreshed_older = store
        .create(&NewShipment::new(
            "9405511206213119532222",
            Carrier::Usps,
            "older refresh",
        ))
        .await
        .unwrap();
    store
        .update_auto_refresh_tracking(
            refreshed_older.id,
            &AutoRefreshOutcome::Success,
            now - Duration::hours(20),
        )
        .await
        .unwrap();

    let never_refreshed = store
        .create(&NewShipment::new(
            "9405511206213119533333",
            Carrier::Usps,
            "never refreshed",
        ))
        .await
        .unwrap();

    let results = store
        .get_active_for_auto_update(
            Carrier::Usps,
            now - Duration::days(30),
            now - Duration::hours(1),
            10,
        )
        .await
        .unwrap();
    let ids: Vec<i64> = results.iter().map(|s| s.id).collect();
    assert_eq!(
        ids,
        vec![never_refreshed.id, refreshed_older.id, refreshed_old.id]
    );
}

#[tokio::test]
async fn auto_refresh_counters_update_atomically() {
    let db = Database::in_memory().await.unwrap();
    let store = db.shipments();
    let now = Utc::now();

    let shipment = store
        .create(&NewShipment::new(
            "1Z999AA10123456784",
            Carrier::Ups,
            "socks",
        ))
        .await
        .unwrap();

    store
        .update_auto_refresh_tracking(
            shipment.id,
            &AutoRefreshOutcome::Failure("carrier timeout".to_string()),
            now,
        )
        .await
        .unwrap();
    let after_failure = store.get(shipment.id).await.unwrap().unwrap();
    assert_eq!(after_failure.auto_refresh_fail_count, 1);
    assert_eq!(
        after_failure.last_auto_refresh_error.as_deref(),
        Some("carrier timeout")
    );
    assert!(after_failure.last_auto_refresh.is_none());

    // Any success resets the failure state.
    store
        .update_auto_refresh_tracking(
            shipment.id,
            &AutoRefreshOutcome::Success,
            now,
        )
        .await
        .unwrap();
    let after_success = store.get(shipment.id).await.unwrap().unwrap();
    assert_eq!(after_success.auto_refresh_fail_count, 0);
    assert_eq!(after_success.auto_refresh_count, 1);
    assert!(after_success.last_auto_refresh.is_some());
    assert!(after_success.last_auto_refresh_error.is_none());
}

#[tokio::test]
async fn appending_the_same_event_twice_is_a_no_op() {
    let db = Database::in_memory().await.unwrap();
    let shipment = db
        .shipments()
        .create(&NewShipment::new(
            "1Z999AA10123456784",
            Carrier::Ups,
            "socks",
        ))
        .await
        .unwrap();

    let when = Utc::now();
    let events = vec![
        event("Arrived at facility", when),
        event("Departed facility", when - Duration::hours(2)),
    ];

    let first = db.events().append(shipment.id, &events).await.unwrap();
    assert_eq!(first, 2);

    let second = db.events().append(shipment.id, &events).await.unwrap();
    assert_eq!(second, 0);

    let stored =
        db.events().list_for_shipment(shipment.id).await.unwrap();
    assert_eq!(stored.len(), 2);
    // Most recent first.
    assert_eq!(stored[0].description, "Arrived at facility");
}

#[tokio::test]
async fn deleting_a_shipment_cascades_to_its_events() {
    let db = Database::in_memory().await.unwrap();
    let shipment = db
        .shipments()
        .create(&NewShipment::new(
            "1Z999AA10123456784",
            Carrier::Ups,
            "socks",
        ))
        .await
        .unwrap();
    db.events()
        .append(shipment.id, &[event("Arrived", Utc::now())])
        .await
        .unwrap();

    db.shipments().delete(shipment.id).await.unwrap();

    let orphans =
        db.events().list_for_shipment(shipment.id).await.unwrap();
    assert!(orphans.is_empty());

    let gone = db.shipments().delete(shipment.id).await;
    assert!(matches!(gone, Err(TrackerError::NotFound(_))));
}

#[tokio::test]
async fn delivered_status_latches_in_the_store() {
    let db = Database::in_memory().await.unwrap();
    let shipment = db
        .shipments()
        .create(&NewShipment::new(
            "1Z999AA10123456784",
            Carrier::Ups,
            "socks",
        ))
        .await
        .unwrap();
    let now = Utc::now();

    db.persist_refresh(
        shipment.id,
        &[event("Delivered", now)],
        ShipmentStatus::Delivered,
        None,
        tracklet_core::RefreshStamp::Manual,
        now,
    )
    .await
    .unwrap();

    // A later (out-of-order) refresh must not undeliver the shipment.
    db.persist_refresh(
        shipment.id,
        &[event("In transit", now - Duration::hours(5))],
        ShipmentStatus::InTransit,
        None,
        tracklet_core::RefreshStamp::Manual,
        now,
    )
    .await
    .unwrap();

    let stored = db.shipments().get(shipment.id).await.unwrap().unwrap();
    assert!(stored.delivered);
    assert_eq!(stored.status, ShipmentStatus::Delivered);
}

#[tokio::test]
async fn email_records_are_idempotent_by_message_id() {
    let db = Database::in_memory().await.unwrap();
    let emails = db.emails();
    let now = Utc::now();

    assert!(!emails.has_processed("msg-1").await.unwrap());

    let record = EmailProcessingRecord {
        message_id: "msg-1".to_string(),
        thread_id: None,
        from: "orders@acme.example".to_string(),
        subject: "Your order shipped".to_string(),
        received_at: now,
        body_text: "UPS 1Z999AA10123456784".to_string(),
        body_html: String::new(),
        scan_method: EmailScanMethod::TimeWindow,
        processed_at: now,
        status: EmailProcessingStatus::Processed,
        tracking_numbers: vec!["1Z999AA10123456784".to_string()],
        error: None,
    };
    emails.record(&record).await.unwrap();
    assert!(emails.has_processed("msg-1").await.unwrap());

    // Re-recording updates the terminal state instead of failing.
    let failed = EmailProcessingRecord {
        status: EmailProcessingStatus::Failed,
        error: Some("validator rejected".to_string()),
        ..record
    };
    emails.record(&failed).await.unwrap();

    let stored = emails.get("msg-1").await.unwrap().unwrap();
    assert_eq!(stored.status, EmailProcessingStatus::Failed);
    assert_eq!(
        stored.tracking_numbers,
        vec!["1Z999AA10123456784".to_string()]
    );
}
