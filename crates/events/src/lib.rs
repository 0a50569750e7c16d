//! Session event bus and observability sink.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`; the UI layer subscribes to it.
//! - [`SessionEvent`]: lifecycle, timer, draft and connection events.
//! - [`EventLogger`]: background subscriber that writes every event to
//!   `tracing`.

pub mod bus;
pub mod logger;

pub use bus::{EventBus, EventEnvelope, SessionEvent};
pub use logger::EventLogger;
