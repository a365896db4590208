//! Domain events and their in-process distribution.
//!
//! Aggregates emit typed events; after a change is committed the orchestrator
//! wraps each one in an [`EventEnvelope`] and publishes it on an [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{BusError, EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
