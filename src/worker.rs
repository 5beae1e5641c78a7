//! Background retry worker.
//!
//! Failed delivery rows carry a `next_attempt_at` marker; the worker sweeps
//! for due rows, claims them atomically, and re-runs each logical delivery
//! at the following attempt number. Because the schedule lives in the rows
//! rather than in timers, pending retries survive a process restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::error::WebhookError;
use crate::services::DeliveryService;
use crate::store::WebhookStore;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_BATCH_SIZE: i64 = 50;

pub struct RetryWorker {
    store: Arc<dyn WebhookStore>,
    delivery: Arc<DeliveryService>,
    poll_interval: Duration,
    batch_size: i64,
}

impl RetryWorker {
    pub fn new(store: Arc<dyn WebhookStore>, delivery: Arc<DeliveryService>) -> Self {
        Self {
            store,
            delivery,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Run the sweep loop until the task is aborted.
    pub async fn run(self) {
        info!(
            target: "webhook_retry",
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            batch_size = self.batch_size,
            "Retry worker started"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep().await {
                error!(target: "webhook_retry", error = %e, "Retry sweep failed");
            }
        }
    }

    /// Claim due retries and re-deliver them. Returns how many were claimed.
    ///
    /// Claiming clears each row's schedule marker, so a retry fires at most
    /// once even with concurrent sweepers.
    pub async fn sweep(&self) -> Result<usize, WebhookError> {
        let due = self
            .store
            .claim_due_retries(Utc::now(), self.batch_size)
            .await?;
        if due.is_empty() {
            return Ok(0);
        }

        debug!(target: "webhook_retry", claimed = due.len(), "Retrying due deliveries");

        let claimed = due.len();
        for failed in due {
            let next_attempt = failed.attempt_number + 1;
            let result = self
                .delivery
                .deliver(
                    failed.subscription_id,
                    &failed.event_type,
                    &failed.payload,
                    next_attempt,
                )
                .await;
            if let Err(e) = result {
                error!(
                    target: "webhook_retry",
                    subscription_id = %failed.subscription_id,
                    delivery_id = %failed.id,
                    attempt = next_attempt,
                    error = %e,
                    "Retry attempt failed to execute"
                );
            }
        }

        Ok(claimed)
    }
}
