//! Flowhub event bus.
//!
//! In-process publish/subscribe infrastructure connecting the API-facing
//! services to the ingestion worker:
//!
//! - [`EventBus`] — fan-out hub backed by `tokio::sync::broadcast`.
//! - [`DomainEvent`] — the canonical event envelope.
//! - [`payloads`] — typed payloads for the events the worker consumes.
//!
//! Delivery is at-least-once from a handler's point of view: a handler
//! that crashes mid-run will see the event again when it is republished,
//! so handlers must be idempotent.

pub mod bus;
pub mod payloads;

pub use bus::{DomainEvent, EventBus};
pub use payloads::VersionAddedPayload;
