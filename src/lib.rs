//! Outbound webhook delivery for the VetGrid clinic platform.
//!
//! Provides tenant-scoped webhook subscription management, fire-and-forget
//! event fan-out with HMAC-SHA256 signing, fixed-schedule retries backed by
//! durable delivery rows, and auto-disable of persistently failing endpoints.

pub mod crypto;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;
pub mod validation;
pub mod worker;

pub use error::WebhookError;
pub use events::WebhookEventType;
pub use models::{DeliveryOutcome, DeliveryResult, TenantId, WebhookEnvelope};
pub use router::{webhooks_router, WebhooksState};
pub use services::delivery_service::DeliveryService;
pub use services::dispatcher::EventDispatcher;
pub use services::subscription_service::SubscriptionService;
pub use store::{MemoryWebhookStore, PgWebhookStore, WebhookStore};
pub use worker::RetryWorker;
