//! Axum handlers for the webhook API.
//!
//! Tenant identity arrives as a [`crate::models::TenantId`] request
//! extension, installed by the host application's auth middleware.

pub mod deliveries;
pub mod subscriptions;
