//! Business logic services for the webhook subsystem.

pub mod delivery_service;
pub mod dispatcher;
pub mod subscription_service;

pub use delivery_service::DeliveryService;
pub use dispatcher::EventDispatcher;
pub use subscription_service::SubscriptionService;
