//! Shared harness for the integration tests.
//!
//! Everything runs against the in-memory store and a wiremock endpoint, so
//! the suite needs neither Postgres nor outbound network access.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

use vetgrid_webhooks::crypto;
use vetgrid_webhooks::models::{CreateWebhookSubscription, WebhookSubscription};
use vetgrid_webhooks::services::{DeliveryService, EventDispatcher};
use vetgrid_webhooks::store::{MemoryWebhookStore, WebhookStore};
use vetgrid_webhooks::worker::RetryWorker;

pub const TEST_KEY: [u8; 32] = [0x42; 32];

/// Delivery engine wired to an in-memory store, with retry delays collapsed
/// to zero so sweeps can run back-to-back.
pub struct Harness {
    pub store: Arc<MemoryWebhookStore>,
    pub delivery: Arc<DeliveryService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(4, 10)
    }

    pub fn with_limits(max_attempts: i32, disable_threshold: i32) -> Self {
        init_tracing();
        let store = Arc::new(MemoryWebhookStore::new());
        let delivery = DeliveryService::new(
            store.clone() as Arc<dyn WebhookStore>,
            TEST_KEY.to_vec(),
        )
        .expect("http client builds")
        .with_max_attempts(max_attempts)
        .with_disable_threshold(disable_threshold)
        .with_timeout(Duration::from_secs(5))
        .with_backoff_schedule(vec![Duration::ZERO]);

        Self {
            store,
            delivery: Arc::new(delivery),
        }
    }

    pub fn store(&self) -> Arc<dyn WebhookStore> {
        self.store.clone()
    }

    pub fn dispatcher(&self) -> EventDispatcher {
        EventDispatcher::new(self.store(), Arc::clone(&self.delivery))
    }

    pub fn worker(&self) -> RetryWorker {
        RetryWorker::new(self.store(), Arc::clone(&self.delivery))
    }

    /// Insert a subscription directly, bypassing URL validation so tests can
    /// point at the loopback mock server. Returns the row and the plaintext
    /// signing secret.
    pub async fn subscription(
        &self,
        tenant_id: Uuid,
        url: &str,
        event_types: &[&str],
    ) -> (WebhookSubscription, String) {
        let secret = crypto::generate_secret();
        let secret_encrypted =
            crypto::encrypt_secret(&secret, &TEST_KEY).expect("encryption works");
        let sub = self
            .store
            .create_subscription(CreateWebhookSubscription {
                tenant_id,
                url: url.to_string(),
                secret_encrypted,
                event_types: event_types.iter().map(|s| s.to_string()).collect(),
            })
            .await
            .expect("subscription created");
        (sub, secret)
    }
}

/// Install a test subscriber once; respects `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll a condition until it holds or the deadline passes. Used to observe
/// fire-and-forget deliveries settling.
pub async fn wait_for<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Responds with each status in sequence, repeating the last one, and counts
/// the requests it has seen.
pub struct SequenceResponder {
    statuses: Vec<u16>,
    hits: Arc<AtomicUsize>,
}

impl SequenceResponder {
    pub fn new(statuses: Vec<u16>) -> (Self, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        (
            Self {
                statuses,
                hits: Arc::clone(&hits),
            },
            hits,
        )
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.hits.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .get(n)
            .or_else(|| self.statuses.last())
            .copied()
            .unwrap_or(200);
        ResponseTemplate::new(status)
    }
}
