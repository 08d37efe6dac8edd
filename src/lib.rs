//! # Herald
//!
//! Real-time notification delivery for a Q&A platform. Producers (answer,
//! report and inquiry workflows) publish events to a member; every open
//! stream of that member receives them live, and a reconnecting client
//! resumes from its last seen sequence without gaps or duplicates.
//!
//! ## Core Concepts
//!
//! - **Event Log**: bounded per-member history with a monotonically
//!   increasing sequence
//! - **Connection Registry**: live streams per member, each with its own
//!   bounded buffer
//! - **Dispatcher**: append then fan out, never blocking on a client
//! - **Stream Session**: replay after the cursor, then relay live events
//!   with heartbeats
//! - **Read-State**: per-notification read flags, updated in batches
//!
//! ## Example
//!
//! ```ignore
//! use herald::{HubConfig, NotificationHub, NotificationPayload, RecipientId, SseTransport};
//!
//! let (hub, members) = NotificationHub::in_memory(HubConfig::default())?;
//! let alice = RecipientId::new("alice");
//! members.insert(alice.clone());
//!
//! hub.publish(&alice, NotificationPayload::new_answer(123, 7, "New answer on Q123"))?;
//!
//! // On the client's connection thread:
//! let session = hub.connect_with_token(&alice, last_event_id)?;
//! let outcome = session.run(&mut SseTransport::new(socket));
//! ```

pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod hub;
pub mod read_state;
pub mod registry;
pub mod session;
pub mod types;

pub use directory::{MemberDirectory, RecipientDirectory};
pub use dispatcher::{Dispatcher, Published};
pub use error::{NotifyError, Result};
pub use events::{EventLog, ReplayBatch, RetentionPolicy};
pub use hub::{HubConfig, NotificationHub};
pub use read_state::{InMemoryReadState, NotificationRecord, ReadStateStore, ReadUpdate};
pub use registry::{ConnectionRegistry, DropReason, FanOutReport, SessionHandle, SessionId};
pub use session::{
    CloseReason, DisconnectHandle, Frame, SessionConfig, SessionOutcome, SessionState,
    SseTransport, StreamSession, Transport, TransportError,
};
pub use types::{
    parse_cursor, EventKind, NotificationEvent, NotificationPayload, RecipientId, Sequence,
    Timestamp,
};
