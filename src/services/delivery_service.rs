//! Webhook delivery engine: signs payloads, performs the HTTP POST, records
//! every attempt in the delivery log, schedules retries, and auto-disables
//! endpoints that fail persistently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto;
use crate::error::WebhookError;
use crate::models::{
    CreateWebhookDelivery, DeliveryOutcome, DeliveryResult, WebhookEnvelope, WebhookSubscription,
};
use crate::store::WebhookStore;

/// Maximum delivery attempts per logical delivery (1 initial + 3 retries).
pub const MAX_DELIVERY_ATTEMPTS: i32 = 4;

/// Consecutive failed deliveries after which a subscription is disabled.
pub const DISABLE_THRESHOLD: i32 = 10;

/// Per-request timeout for the outbound HTTP call.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies stored in the delivery log are capped at this many
/// characters.
pub const RESPONSE_BODY_CAP: usize = 10_000;

/// Signature header: `sha256={hex}` over `{timestamp}.{payload}`.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Event type header.
pub const EVENT_HEADER: &str = "X-Webhook-Event";
/// Delivery-log row id header, unique per attempt.
pub const DELIVERY_HEADER: &str = "X-Webhook-Delivery";
/// Unix timestamp the signature was computed over.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

const USER_AGENT: &str = "vetgrid-webhooks/1.0";

/// Delay inserted before attempt N+1, indexed by the attempt number N that
/// just failed. At the default attempt cap of 4 only the first three entries
/// are reachable; the 30-minute entry takes effect when `with_max_attempts`
/// raises the cap (and repeats for any attempts beyond it).
const BACKOFF_SCHEDULE: [Duration; 4] = [
    Duration::ZERO,
    Duration::from_secs(60),
    Duration::from_secs(300),
    Duration::from_secs(1800),
];

/// How a single attempt behaves after the HTTP exchange settles.
#[derive(Debug, Clone, Copy)]
struct AttemptPolicy {
    /// Schedule a follow-up attempt when this one fails below the cap.
    schedule_retry: bool,
    /// Let the outcome move the subscription's consecutive-failure counter.
    affect_counter: bool,
}

/// Engine for delivering signed webhook payloads.
///
/// All knobs default to production values; the builder-style `with_*` methods
/// exist so tests can shrink timeouts and backoff delays.
pub struct DeliveryService {
    store: Arc<dyn WebhookStore>,
    http_client: reqwest::Client,
    encryption_key: Vec<u8>,
    max_attempts: i32,
    disable_threshold: i32,
    timeout: Duration,
    backoff_schedule: Vec<Duration>,
}

impl DeliveryService {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        encryption_key: Vec<u8>,
    ) -> Result<Self, WebhookError> {
        // Redirects are refused: a 3xx from the receiver is a failure, and
        // following one could bypass the SSRF screen applied to the
        // configured URL.
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            store,
            http_client,
            encryption_key,
            max_attempts: MAX_DELIVERY_ATTEMPTS,
            disable_threshold: DISABLE_THRESHOLD,
            timeout: DELIVERY_TIMEOUT,
            backoff_schedule: BACKOFF_SCHEDULE.to_vec(),
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_disable_threshold(mut self, threshold: i32) -> Self {
        self.disable_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.backoff_schedule = schedule;
        self
    }

    /// Delay before the attempt that follows a failed attempt number, or
    /// `None` when the attempt cap is reached.
    pub fn backoff_delay(&self, failed_attempt: i32) -> Option<Duration> {
        if failed_attempt >= self.max_attempts {
            return None;
        }
        let idx = (failed_attempt - 1).max(0) as usize;
        Some(
            self.backoff_schedule
                .get(idx)
                .copied()
                .unwrap_or_else(|| self.backoff_schedule.last().copied().unwrap_or(Duration::ZERO)),
        )
    }

    /// Deliver a payload to a subscription at the given attempt number.
    ///
    /// Never errors on delivery failure; the HTTP outcome is reported in the
    /// returned [`DeliveryResult`]. `Err` is reserved for store failures.
    /// Inactive or missing subscriptions are skipped without an HTTP call and
    /// without a log row.
    pub async fn deliver(
        &self,
        subscription_id: Uuid,
        event_type: &str,
        payload: &str,
        attempt: i32,
    ) -> Result<DeliveryResult, WebhookError> {
        let Some(subscription) = self.store.find_subscription(subscription_id).await? else {
            debug!(
                target: "webhook_delivery",
                %subscription_id,
                "Skipping delivery: subscription not found"
            );
            return Ok(DeliveryResult::skipped(DeliveryOutcome::NotFound, attempt));
        };

        if !subscription.is_active {
            debug!(
                target: "webhook_delivery",
                %subscription_id,
                event_type,
                "Skipping delivery: subscription is disabled"
            );
            return Ok(DeliveryResult::skipped(DeliveryOutcome::Disabled, attempt));
        }

        self.attempt_once(
            &subscription,
            event_type,
            payload,
            attempt,
            AttemptPolicy {
                schedule_retry: true,
                affect_counter: true,
            },
        )
        .await
    }

    /// Send a `ping` event to a subscription, bypassing retry scheduling and
    /// the failure counter. Used by the test-send endpoint so operators can
    /// probe an endpoint without risking its active status.
    pub async fn send_test(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<DeliveryResult, WebhookError> {
        let Some(subscription) = self
            .store
            .find_subscription_for_tenant(tenant_id, subscription_id)
            .await?
        else {
            return Ok(DeliveryResult::skipped(DeliveryOutcome::NotFound, 1));
        };

        if !subscription.is_active {
            return Ok(DeliveryResult::skipped(DeliveryOutcome::Disabled, 1));
        }

        let envelope = WebhookEnvelope::new(
            "ping",
            serde_json::json!({ "subscription_id": subscription_id }),
        );
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| WebhookError::Internal(format!("Failed to serialize envelope: {e}")))?;

        self.attempt_once(
            &subscription,
            "ping",
            &payload,
            1,
            AttemptPolicy {
                schedule_retry: false,
                affect_counter: false,
            },
        )
        .await
    }

    /// Disable the subscription if its failure streak has reached the
    /// threshold. Idempotent; returns whether it is now disabled.
    pub async fn check_and_disable(&self, subscription_id: Uuid) -> Result<bool, WebhookError> {
        let Some(subscription) = self.store.find_subscription(subscription_id).await? else {
            return Ok(false);
        };
        if !subscription.is_active {
            return Ok(true);
        }
        if subscription.consecutive_failures >= self.disable_threshold {
            self.store.disable_subscription(subscription_id).await?;
            warn!(
                target: "webhook_delivery",
                %subscription_id,
                consecutive_failures = subscription.consecutive_failures,
                threshold = self.disable_threshold,
                "Subscription disabled by threshold check"
            );
            return Ok(true);
        }
        Ok(false)
    }

    async fn attempt_once(
        &self,
        subscription: &WebhookSubscription,
        event_type: &str,
        payload: &str,
        attempt: i32,
        policy: AttemptPolicy,
    ) -> Result<DeliveryResult, WebhookError> {
        let delivery = self
            .store
            .create_delivery(CreateWebhookDelivery {
                tenant_id: subscription.tenant_id,
                subscription_id: subscription.id,
                event_type: event_type.to_string(),
                payload: payload.to_string(),
                attempt_number: attempt,
            })
            .await?;

        let now = Utc::now();
        self.store
            .mark_subscription_attempt(subscription.id, now)
            .await?;

        let timestamp = now.timestamp();
        // Every delivery is signed. An undecryptable secret fails the
        // attempt before any bytes leave the process; the normal retry and
        // counter machinery applies, so a corrupted secret eventually
        // surfaces as a disabled subscription rather than unsigned traffic.
        let secret = match crypto::decrypt_secret(
            &subscription.secret_encrypted,
            &self.encryption_key,
        ) {
            Ok(secret) => secret,
            Err(e) => {
                warn!(
                    target: "webhook_delivery",
                    subscription_id = %subscription.id,
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to decrypt signing secret; delivery not sent"
                );
                return self
                    .record_failure(
                        subscription,
                        &delivery.id,
                        attempt,
                        policy,
                        None,
                        None,
                        format!("Signing secret unavailable: {e}"),
                    )
                    .await;
            }
        };
        let signature = crypto::sign(payload, &secret, timestamp);

        let request = self
            .http_client
            .post(&subscription.url)
            .timeout(self.timeout)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature.as_str())
            .header(EVENT_HEADER, event_type)
            .header(DELIVERY_HEADER, delivery.id.to_string())
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .body(payload.to_string());

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let body = truncate_response(&response.text().await.unwrap_or_default());

                if status.is_success() {
                    self.record_success(subscription, &delivery.id, attempt, status, body)
                        .await
                } else {
                    let error_message = format!("HTTP {status}");
                    self.record_failure(
                        subscription,
                        &delivery.id,
                        attempt,
                        policy,
                        Some(status.as_u16()),
                        Some(body),
                        error_message,
                    )
                    .await
                }
            }
            Err(e) => {
                let error_message = if e.is_timeout() {
                    format!("Request timed out after {}s", self.timeout.as_secs())
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request failed: {e}")
                };
                self.record_failure(
                    subscription,
                    &delivery.id,
                    attempt,
                    policy,
                    None,
                    None,
                    error_message,
                )
                .await
            }
        }
    }

    async fn record_success(
        &self,
        subscription: &WebhookSubscription,
        delivery_id: &Uuid,
        attempt: i32,
        status: reqwest::StatusCode,
        body: String,
    ) -> Result<DeliveryResult, WebhookError> {
        let completed_at = Utc::now();
        self.store
            .mark_delivery_delivered(
                *delivery_id,
                status.as_u16() as i16,
                Some(&body),
                completed_at,
            )
            .await?;
        // Any success wipes the consecutive-failure streak.
        self.store
            .mark_subscription_success(subscription.id, completed_at)
            .await?;

        info!(
            target: "webhook_delivery",
            subscription_id = %subscription.id,
            delivery_id = %delivery_id,
            attempt,
            status = status.as_u16(),
            "Webhook delivered"
        );

        Ok(DeliveryResult {
            outcome: DeliveryOutcome::Delivered,
            delivery_id: Some(*delivery_id),
            attempt,
            response_code: Some(status.as_u16()),
            response_body: Some(body),
            error_message: None,
            next_attempt_at: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_failure(
        &self,
        subscription: &WebhookSubscription,
        delivery_id: &Uuid,
        attempt: i32,
        policy: AttemptPolicy,
        response_code: Option<u16>,
        response_body: Option<String>,
        error_message: String,
    ) -> Result<DeliveryResult, WebhookError> {
        let completed_at = Utc::now();
        let exhausted = attempt >= self.max_attempts;

        let next_attempt_at = if policy.schedule_retry && !exhausted {
            self.backoff_delay(attempt).map(|delay| {
                completed_at
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero())
            })
        } else {
            None
        };

        self.store
            .mark_delivery_failed(
                *delivery_id,
                response_code.map(|c| c as i16),
                response_body.as_deref(),
                &error_message,
                next_attempt_at,
                completed_at,
            )
            .await?;

        warn!(
            target: "webhook_delivery",
            subscription_id = %subscription.id,
            delivery_id = %delivery_id,
            attempt,
            max_attempts = self.max_attempts,
            response_code,
            error = %error_message,
            retry_at = next_attempt_at.map(|t| t.to_rfc3339()),
            "Webhook delivery failed"
        );

        // The failure streak counts exhausted logical deliveries, not
        // individual attempts: a flaky endpoint that recovers on a retry
        // never moves the counter.
        if policy.affect_counter && exhausted {
            let failures = self
                .store
                .increment_consecutive_failures(subscription.id)
                .await?;
            if failures >= self.disable_threshold {
                self.store.disable_subscription(subscription.id).await?;
                warn!(
                    target: "webhook_delivery",
                    subscription_id = %subscription.id,
                    consecutive_failures = failures,
                    threshold = self.disable_threshold,
                    "Subscription auto-disabled after persistent failures"
                );
            }
        }

        Ok(DeliveryResult {
            outcome: DeliveryOutcome::Failed,
            delivery_id: Some(*delivery_id),
            attempt,
            response_code,
            response_body,
            error_message: Some(error_message),
            next_attempt_at,
        })
    }
}

/// Cap a response body for log storage.
fn truncate_response(body: &str) -> String {
    if body.chars().count() <= RESPONSE_BODY_CAP {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(RESPONSE_BODY_CAP).collect();
    truncated.push_str("... [truncated]");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryWebhookStore;

    fn service() -> DeliveryService {
        DeliveryService::new(Arc::new(MemoryWebhookStore::new()), vec![0x42; 32])
            .expect("client builds")
    }

    #[test]
    fn test_backoff_schedule_gaps() {
        let service = service();
        assert_eq!(service.backoff_delay(1), Some(Duration::ZERO));
        assert_eq!(service.backoff_delay(2), Some(Duration::from_secs(60)));
        assert_eq!(service.backoff_delay(3), Some(Duration::from_secs(300)));
        // Attempt cap reached: no further retry.
        assert_eq!(service.backoff_delay(4), None);
        assert_eq!(service.backoff_delay(7), None);
    }

    #[test]
    fn test_backoff_final_entry_applies_with_raised_cap() {
        let service = service().with_max_attempts(6);
        assert_eq!(service.backoff_delay(4), Some(Duration::from_secs(1800)));
        // Beyond the table, the final delay repeats.
        assert_eq!(service.backoff_delay(5), Some(Duration::from_secs(1800)));
        assert_eq!(service.backoff_delay(6), None);
    }

    #[test]
    fn test_backoff_schedule_override() {
        let service = service()
            .with_max_attempts(6)
            .with_backoff_schedule(vec![Duration::from_millis(5), Duration::from_millis(10)]);
        assert_eq!(service.backoff_delay(1), Some(Duration::from_millis(5)));
        assert_eq!(service.backoff_delay(2), Some(Duration::from_millis(10)));
        // Past the end of the schedule, the last entry repeats.
        assert_eq!(service.backoff_delay(5), Some(Duration::from_millis(10)));
        assert_eq!(service.backoff_delay(6), None);
    }

    #[test]
    fn test_truncate_short_body_unchanged() {
        assert_eq!(truncate_response("ok"), "ok");
    }

    #[test]
    fn test_truncate_caps_long_body() {
        let long = "x".repeat(RESPONSE_BODY_CAP + 500);
        let truncated = truncate_response(&long);
        assert_eq!(
            truncated.len(),
            RESPONSE_BODY_CAP + "... [truncated]".len()
        );
        assert!(truncated.ends_with("... [truncated]"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(RESPONSE_BODY_CAP + 1);
        let truncated = truncate_response(&long);
        assert_eq!(truncated.chars().count(), RESPONSE_BODY_CAP + "... [truncated]".chars().count());
    }
}
