//! Outbound client notifications: signed, retrying, at-least-once.

pub mod deliverer;
pub mod payload;
pub mod service;
pub mod signature;

pub use deliverer::{DeliveryConfig, DeliveryReport, WebhookDeliverer, USER_AGENT};
pub use payload::{PayloadMetadata, WebhookPayload};
pub use service::DeliveryService;
pub use signature::{sign_body, verify_body};
