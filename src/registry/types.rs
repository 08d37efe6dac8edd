//! Types shared between the registry and stream sessions.

use crate::types::{NotificationEvent, RecipientId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Unique identifier for a registered stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the registry let go of a stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiving side was gone before it unregistered.
    Disconnected,
    /// Explicitly unregistered by its session.
    Unregistered,
    /// Registry was shut down.
    Shutdown,
}

/// Slot shared by the registry entry and the handle, recording why the
/// registry dropped the stream.
pub(crate) type DropCell = Arc<Mutex<Option<DropReason>>>;

/// Outcome of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Streams that accepted the event into their buffer.
    pub delivered: usize,
    /// Streams dropped during this fan-out.
    pub dropped: usize,
}

/// Receiving end of a registered stream.
pub struct SessionHandle {
    pub id: SessionId,
    pub recipient: RecipientId,
    /// Channel to receive live events.
    pub receiver: crossbeam_channel::Receiver<Arc<NotificationEvent>>,
    pub(crate) drop_reason: DropCell,
}

impl SessionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<Arc<NotificationEvent>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<Arc<NotificationEvent>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Arc<NotificationEvent>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Why the registry dropped this stream, if it did.
    pub fn drop_reason(&self) -> Option<DropReason> {
        self.drop_reason.lock().clone()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("recipient", &self.recipient)
            .field("buffered", &self.receiver.len())
            .finish()
    }
}
