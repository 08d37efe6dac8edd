//! Registry of live notification streams.
//!
//! Each open stream registers a bounded buffer for its recipient. Fan-out
//! pushes an event into every buffer of that recipient without waiting:
//! a stream whose buffer is full is dropped from the registry (it will
//! reconnect and replay from the event log), so one slow client never holds
//! up producers or its siblings.
//!
//! # Example
//!
//! ```ignore
//! let registry = ConnectionRegistry::new(64);
//! let handle = registry.register(&RecipientId::new("alice"));
//!
//! registry.fan_out(&event);
//! let delivered = handle.recv()?;
//!
//! registry.unregister(&handle.recipient, handle.id);
//! ```

mod manager;
mod types;

pub use manager::{ConnectionRegistry, DEFAULT_BUFFER_SIZE};
pub use types::{DropReason, FanOutReport, SessionHandle, SessionId};
