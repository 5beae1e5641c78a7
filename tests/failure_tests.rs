//! Persistent-failure handling: auto-disable threshold and the guarantees
//! around disabled subscriptions.

mod common;

use std::sync::atomic::Ordering;

use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{wait_for, Harness, SequenceResponder};
use vetgrid_webhooks::models::DeliveryOutcome;
use vetgrid_webhooks::store::{DeliveryFilter, WebhookStore};

#[tokio::test]
async fn subscription_disables_exactly_at_threshold() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    // Single-attempt deliveries: every failed delivery is an exhausted chain.
    let harness = Harness::with_limits(1, 10);
    let tenant = Uuid::new_v4();
    let (sub, _) = harness
        .subscription(tenant, &server.uri(), &["pet.created"])
        .await;

    // Nine exhausted deliveries: one short of the threshold.
    for _ in 0..9 {
        harness
            .delivery
            .deliver(sub.id, "pet.created", "{}", 1)
            .await
            .unwrap();
    }
    let refreshed = harness.store.find_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(refreshed.consecutive_failures, 9);
    assert!(refreshed.is_active, "nine failures must not disable");

    // The tenth crosses the threshold.
    harness
        .delivery
        .deliver(sub.id, "pet.created", "{}", 1)
        .await
        .unwrap();
    let refreshed = harness.store.find_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(refreshed.consecutive_failures, 10);
    assert!(!refreshed.is_active, "tenth failure must disable");
}

#[tokio::test]
async fn streak_just_below_threshold_survives_one_more_success() {
    let server = MockServer::start().await;
    let (responder, _) = SequenceResponder::new(vec![500, 500, 200]);
    Mock::given(method("POST"))
        .respond_with(responder)
        .mount(&server)
        .await;

    let harness = Harness::with_limits(1, 3);
    let tenant = Uuid::new_v4();
    let (sub, _) = harness
        .subscription(tenant, &server.uri(), &["pet.created"])
        .await;

    for _ in 0..2 {
        harness
            .delivery
            .deliver(sub.id, "pet.created", "{}", 1)
            .await
            .unwrap();
    }
    // At threshold - 1; the next delivery succeeds and clears the streak.
    harness
        .delivery
        .deliver(sub.id, "pet.created", "{}", 1)
        .await
        .unwrap();

    let refreshed = harness.store.find_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(refreshed.consecutive_failures, 0);
    assert!(refreshed.is_active);
}

#[tokio::test]
async fn disabled_subscription_gets_no_http_and_no_log_row() {
    let server = MockServer::start().await;
    let (responder, hits) = SequenceResponder::new(vec![200]);
    Mock::given(method("POST"))
        .respond_with(responder)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let tenant = Uuid::new_v4();
    let (sub, _) = harness
        .subscription(tenant, &server.uri(), &["pet.created"])
        .await;
    harness.store.disable_subscription(sub.id).await.unwrap();

    let result = harness
        .delivery
        .deliver(sub.id, "pet.created", "{}", 1)
        .await
        .unwrap();

    assert_eq!(result.outcome, DeliveryOutcome::Disabled);
    assert!(result.delivery_id.is_none());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(
        harness
            .store
            .count_deliveries(tenant, &DeliveryFilter::default())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn dispatcher_skips_disabled_subscriptions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/active"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let (disabled_responder, disabled_hits) = SequenceResponder::new(vec![200]);
    Mock::given(method("POST"))
        .and(path("/disabled"))
        .respond_with(disabled_responder)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let tenant = Uuid::new_v4();
    harness
        .subscription(tenant, &format!("{}/active", server.uri()), &["pet.created"])
        .await;
    let (disabled_sub, _) = harness
        .subscription(
            tenant,
            &format!("{}/disabled", server.uri()),
            &["pet.created"],
        )
        .await;
    harness
        .store
        .disable_subscription(disabled_sub.id)
        .await
        .unwrap();

    harness
        .dispatcher()
        .trigger(tenant, "pet.created", serde_json::json!({}))
        .await;

    let store = harness.store.clone();
    assert!(
        wait_for(|| {
            let store = store.clone();
            async move {
                store
                    .count_deliveries(tenant, &DeliveryFilter::default())
                    .await
                    .unwrap()
                    == 1
            }
        })
        .await
    );
    assert_eq!(disabled_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_claimed_after_disable_does_not_fire() {
    let server = MockServer::start().await;
    let (responder, hits) = SequenceResponder::new(vec![500]);
    Mock::given(method("POST"))
        .respond_with(responder)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let tenant = Uuid::new_v4();
    let (sub, _) = harness
        .subscription(tenant, &server.uri(), &["pet.created"])
        .await;
    let worker = harness.worker();

    // Fail once, leaving a scheduled retry, then disable before the sweep.
    harness
        .delivery
        .deliver(sub.id, "pet.created", "{}", 1)
        .await
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    harness.store.disable_subscription(sub.id).await.unwrap();

    // The row is claimed, but the delivery engine refuses disabled targets.
    assert_eq!(worker.sweep().await.unwrap(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Only the original attempt row exists.
    assert_eq!(
        harness
            .store
            .count_deliveries(tenant, &DeliveryFilter::default())
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn check_and_disable_is_idempotent() {
    let harness = Harness::with_limits(1, 3);
    let tenant = Uuid::new_v4();
    let (sub, _) = harness
        .subscription(tenant, "https://hooks.example.com/x", &["pet.created"])
        .await;

    // Below the threshold: nothing happens.
    harness.store.increment_consecutive_failures(sub.id).await.unwrap();
    assert!(!harness.delivery.check_and_disable(sub.id).await.unwrap());
    assert!(harness.store.find_subscription(sub.id).await.unwrap().unwrap().is_active);

    // At the threshold: disabled, and repeat calls stay disabled.
    harness.store.increment_consecutive_failures(sub.id).await.unwrap();
    harness.store.increment_consecutive_failures(sub.id).await.unwrap();
    assert!(harness.delivery.check_and_disable(sub.id).await.unwrap());
    assert!(harness.delivery.check_and_disable(sub.id).await.unwrap());
    assert!(!harness.store.find_subscription(sub.id).await.unwrap().unwrap().is_active);

    // Unknown subscription: reported as not disabled, no error.
    assert!(!harness.delivery.check_and_disable(Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
async fn one_failing_endpoint_does_not_block_the_fan_out() {
    let server = MockServer::start().await;
    // This endpoint hangs longer than the delivery timeout.
    Mock::given(method("POST"))
        .and(path("/hanging"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(30)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/healthy"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let tenant = Uuid::new_v4();
    harness
        .subscription(
            tenant,
            &format!("{}/hanging", server.uri()),
            &["sale.completed"],
        )
        .await;
    harness
        .subscription(
            tenant,
            &format!("{}/healthy", server.uri()),
            &["sale.completed"],
        )
        .await;

    harness
        .dispatcher()
        .trigger(tenant, "sale.completed", serde_json::json!({}))
        .await;

    // The healthy endpoint's delivery lands while the other is still hanging.
    let store = harness.store.clone();
    let settled = wait_for(|| {
        let store = store.clone();
        async move {
            store
                .count_deliveries(
                    tenant,
                    &DeliveryFilter {
                        status: Some("delivered".to_string()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
                == 1
        }
    })
    .await;
    assert!(settled, "healthy delivery was blocked by the hanging one");
}

#[tokio::test]
async fn timeout_is_recorded_as_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let harness = Harness::new();
    let delivery_service = vetgrid_webhooks::DeliveryService::new(
        harness.store(),
        common::TEST_KEY.to_vec(),
    )
    .unwrap()
    .with_timeout(std::time::Duration::from_millis(100));
    let tenant = Uuid::new_v4();
    let (sub, _) = harness
        .subscription(tenant, &server.uri(), &["pet.created"])
        .await;

    let result = delivery_service
        .deliver(sub.id, "pet.created", "{}", 1)
        .await
        .unwrap();

    assert_eq!(result.outcome, DeliveryOutcome::Failed);
    assert_eq!(result.response_code, None);
    assert!(result.error_message.unwrap().contains("timed out"));
}
