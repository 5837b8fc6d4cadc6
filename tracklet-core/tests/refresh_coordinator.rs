//! Refresh coordinator behaviour: cache fast path, rate limiting,
//! single-flight, delivered short-circuit, error mapping, and counter
//! bookkeeping.

mod support;

use tracklet_config::{CacheSettings, RateLimitSettings};
use tracklet_core::carriers::CarrierError;
use tracklet_core::{CacheKeys, TrackerError};
use tracklet_model::{Carrier, RefreshCaller, ShipmentStatus};

use support::{delivered_snapshot, harness, harness_with, in_transit_snapshot};

#[tokio::test]
async fn refresh_persists_events_and_manual_counters() {
    let h = harness().await;
    let shipment =
        h.insert_shipment("1Z999AA10123456784", Carrier::Ups).await;
    h.provider
        .client
        .script("1Z999AA10123456784", vec![Ok(in_transit_snapshot())]);

    let response = h
        .coordinator
        .refresh_shipment(shipment.id, false, RefreshCaller::User)
        .await
        .unwrap();

    assert_eq!(response.events_added, 1);
    assert_eq!(response.total_events, 1);

    let stored =
        h.db.shipments().get(shipment.id).await.unwrap().unwrap();
    assert_eq!(stored.manual_refresh_count, 1);
    assert!(stored.last_manual_refresh.is_some());
    assert_eq!(stored.status, ShipmentStatus::InTransit);
    assert_eq!(stored.auto_refresh_count, 0);
}

#[tokio::test]
async fn cached_response_short_circuits_the_rate_limit() {
    let h = harness().await;
    let shipment =
        h.insert_shipment("1Z999AA10123456784", Carrier::Ups).await;
    h.provider
        .client
        .script("1Z999AA10123456784", vec![Ok(in_transit_snapshot())]);

    // First refresh reaches the carrier and stamps last_manual_refresh.
    let first = h
        .coordinator
        .refresh_shipment(shipment.id, false, RefreshCaller::User)
        .await
        .unwrap();
    let stamped =
        h.db.shipments().get(shipment.id).await.unwrap().unwrap();

    // Two minutes later (well inside the window) the user refreshes
    // again: the cached response is served, no carrier call, no error,
    // and the manual-refresh stamp is unchanged.
    let second = h
        .coordinator
        .refresh_shipment(shipment.id, false, RefreshCaller::User)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.provider.client.call_count(), 1);

    let after = h.db.shipments().get(shipment.id).await.unwrap().unwrap();
    assert_eq!(after.last_manual_refresh, stamped.last_manual_refresh);
    assert_eq!(after.manual_refresh_count, 1);
}

#[tokio::test]
async fn rate_limit_blocks_user_when_cache_is_cold() {
    // Cache disabled: the rate limiter is the only defense left.
    let h = harness_with(
        CacheSettings {
            disabled: true,
            ttl: std::time::Duration::from_secs(300),
        },
        RateLimitSettings::default(),
    )
    .await;
    let shipment =
        h.insert_shipment("1Z999AA10123456784", Carrier::Ups).await;
    h.provider
        .client
        .script("1Z999AA10123456784", vec![Ok(in_transit_snapshot())]);

    h.coordinator
        .refresh_shipment(shipment.id, false, RefreshCaller::User)
        .await
        .unwrap();

    let blocked = h
        .coordinator
        .refresh_shipment(shipment.id, false, RefreshCaller::User)
        .await;
    assert!(matches!(
        blocked,
        Err(TrackerError::RateLimited { .. })
    ));
    assert_eq!(h.provider.client.call_count(), 1);

    // Forced bypasses the window.
    h.coordinator
        .refresh_shipment(shipment.id, true, RefreshCaller::User)
        .await
        .unwrap();
    assert_eq!(h.provider.client.call_count(), 2);
}

#[tokio::test]
async fn concurrent_refreshes_make_exactly_one_carrier_call() {
    let h = harness().await;
    let shipment =
        h.insert_shipment("1Z999AA10123456784", Carrier::Ups).await;
    h.provider
        .client
        .script("1Z999AA10123456784", vec![Ok(in_transit_snapshot())]);

    let coordinator = h.coordinator.clone();
    let id = shipment.id;
    let first = tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            coordinator
                .refresh_shipment(id, false, RefreshCaller::User)
                .await
        }
    });
    let second = tokio::spawn(async move {
        coordinator
            .refresh_shipment(id, false, RefreshCaller::User)
            .await
    });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(h.provider.client.call_count(), 1);
}

#[tokio::test]
async fn delivered_shipments_short_circuit() {
    let h = harness().await;
    let shipment =
        h.insert_shipment("1Z999AA10123456784", Carrier::Ups).await;
    h.provider
        .client
        .script("1Z999AA10123456784", vec![Ok(delivered_snapshot())]);

    h.coordinator
        .refresh_shipment(shipment.id, false, RefreshCaller::User)
        .await
        .unwrap();

    // Invalidate so the next call cannot be served from cache; the
    // delivered check must fire before any carrier work.
    h.coordinator
        .invalidate_shipment(shipment.id)
        .await
        .unwrap();

    let result = h
        .coordinator
        .refresh_shipment(shipment.id, true, RefreshCaller::User)
        .await;
    assert!(matches!(
        result,
        Err(TrackerError::AlreadyDelivered(_))
    ));
    assert_eq!(h.provider.client.call_count(), 1);
}

#[tokio::test]
async fn unknown_tracking_is_a_domain_error_and_never_cached() {
    let h = harness().await;
    let shipment =
        h.insert_shipment("1Z999AA10123456784", Carrier::Ups).await;
    h.provider.client.script(
        "1Z999AA10123456784",
        vec![Err(CarrierError::NotFound("no such parcel".to_string()))],
    );

    let result = h
        .coordinator
        .refresh_shipment(shipment.id, false, RefreshCaller::User)
        .await;
    assert!(matches!(
        result,
        Err(TrackerError::UnknownTracking(_))
    ));

    // Failures are not cached.
    assert!(
        h.cache
            .get(&CacheKeys::shipment(shipment.id))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn transient_carrier_failures_stay_transient() {
    let h = harness().await;
    let shipment =
        h.insert_shipment("1Z999AA10123456784", Carrier::Ups).await;
    h.provider.client.script(
        "1Z999AA10123456784",
        vec![Err(CarrierError::Transient("tunnel collapsed".to_string()))],
    );

    let err = h
        .coordinator
        .refresh_shipment(shipment.id, false, RefreshCaller::Scheduler)
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let auth = CarrierError::Auth("bad key".to_string());
    assert!(!TrackerError::Carrier(auth).is_transient());
}

#[tokio::test]
async fn validator_mode_caches_under_the_tracking_key() {
    let h = harness().await;
    h.provider
        .client
        .script("9405511206213119531111", vec![Ok(in_transit_snapshot())]);

    let first = h
        .coordinator
        .validate_candidate("9405511206213119531111", Carrier::Usps)
        .await
        .unwrap();
    assert_eq!(first.events.len(), 1);

    // Second validation of the same candidate is served from cache.
    let second = h
        .coordinator
        .validate_candidate("9405511206213119531111", Carrier::Usps)
        .await
        .unwrap();
    assert_eq!(second.events.len(), 1);
    assert_eq!(h.provider.client.call_count(), 1);

    // And it never touched the shipment namespace.
    let cached = h
        .cache
        .get(&CacheKeys::validation(
            Carrier::Usps,
            "9405511206213119531111",
        ))
        .await
        .unwrap();
    assert!(cached.is_some());
}

#[tokio::test]
async fn scheduler_caller_stamps_auto_counters() {
    let h = harness().await;
    let shipment =
        h.insert_shipment("1Z999AA10123456784", Carrier::Ups).await;
    h.provider
        .client
        .script("1Z999AA10123456784", vec![Ok(in_transit_snapshot())]);

    h.coordinator
        .refresh_shipment(shipment.id, false, RefreshCaller::Scheduler)
        .await
        .unwrap();

    let stored =
        h.db.shipments().get(shipment.id).await.unwrap().unwrap();
    assert_eq!(stored.auto_refresh_count, 1);
    assert!(stored.last_auto_refresh.is_some());
    assert_eq!(stored.manual_refresh_count, 0);
    assert!(stored.last_manual_refresh.is_none());
}

#[tokio::test]
async fn refresh_responses_compare_equal_only_for_identical_content() {
    let h = harness().await;
    let a = h.insert_shipment("1Z999AA10123456784", Carrier::Ups).await;
    let b = h.insert_shipment("1Z999AA10123456799", Carrier::Ups).await;
    h.provider
        .client
        .script("1Z999AA10123456784", vec![Ok(in_transit_snapshot())]);
    h.provider
        .client
        .script("1Z999AA10123456799", vec![Ok(in_transit_snapshot())]);

    let ra = h
        .coordinator
        .refresh_shipment(a.id, false, RefreshCaller::User)
        .await
        .unwrap();
    let rb = h
        .coordinator
        .refresh_shipment(b.id, false, RefreshCaller::User)
        .await
        .unwrap();
    assert_ne!(ra.shipment_id, rb.shipment_id);
    assert_ne!(ra, rb);
}
