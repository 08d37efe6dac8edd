//! Per-connection streaming protocol.
//!
//! A session moves through `Connecting → Replaying → Live → Closed`:
//!
//! - **Connecting**: the hub replays the recipient's log after the client's
//!   cursor and registers the stream in one step under the recipient's log
//!   lock, so every event ends up either in the replay or in the live
//!   buffer, never both and never neither.
//! - **Replaying**: the backlog is written in order. A truncated backlog is
//!   preceded by a `resync` frame.
//! - **Live**: buffered events are forwarded as they arrive, with periodic
//!   heartbeats.
//! - **Closed**: client disconnect, write failure, idle timeout, lifetime
//!   expiry or a registry drop. The stream is unregistered exactly once.
//!
//! # Example
//!
//! ```ignore
//! let session = hub.connect(&recipient, parse_cursor(last_event_id)?)?;
//! let disconnect = session.disconnect_handle();
//!
//! std::thread::spawn(move || {
//!     let mut transport = SseTransport::new(socket);
//!     let outcome = session.run(&mut transport);
//!     println!("stream closed: {:?}", outcome.reason);
//! });
//! ```

mod frame;
mod stream;

pub use frame::{Frame, SseTransport, Transport, TransportError};
pub use stream::{
    CloseReason, DisconnectHandle, SessionConfig, SessionOutcome, SessionState, StreamSession,
};
