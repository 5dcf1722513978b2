//! `larder-events` — event mechanics shared by the stock ledger.
//!
//! Events here are the **facts** of the stock domain: append-only, immutable,
//! tenant-scoped. This crate carries only the mechanics (trait, envelope,
//! pub/sub); the actual ledger events live in `larder-stock`.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
