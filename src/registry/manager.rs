//! Connection registry keyed by recipient.

use crate::types::{NotificationEvent, RecipientId};
use crossbeam_channel::{bounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{DropCell, DropReason, FanOutReport, SessionHandle, SessionId};

/// Default per-stream buffer (events) before a stream is dropped.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Internal registry entry.
struct SessionSlot {
    sender: Sender<Arc<NotificationEvent>>,
    drop_reason: DropCell,
}

impl SessionSlot {
    /// Try to buffer an event. Returns the drop reason if the stream can't take it.
    fn try_send(&self, event: Arc<NotificationEvent>) -> Result<(), DropReason> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(crossbeam_channel::TrySendError::Full(_)) => Err(DropReason::BufferOverflow),
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => Err(DropReason::Disconnected),
        }
    }

    /// Record why the stream was dropped. The sender goes away with `self`,
    /// so the receiver sees a disconnect once it drains its buffer.
    fn close(self, reason: DropReason) {
        let mut cell = self.drop_reason.lock();
        if cell.is_none() {
            *cell = Some(reason);
        }
    }
}

/// Tracks every live stream, grouped by recipient.
pub struct ConnectionRegistry {
    /// Registered streams by recipient, then by session.
    sessions: RwLock<HashMap<RecipientId, HashMap<SessionId, SessionSlot>>>,
    /// Counter for generating session IDs.
    next_id: AtomicU64,
    /// Capacity of each stream's buffer.
    buffer_size: usize,
}

impl ConnectionRegistry {
    /// Create a registry whose streams buffer up to `buffer_size` events.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Register a new stream for `recipient`.
    ///
    /// Every event fanned out after this call returns lands in the
    /// handle's buffer (or drops the stream if the buffer is full).
    pub fn register(&self, recipient: &RecipientId) -> SessionHandle {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);
        let drop_reason: DropCell = Arc::new(Mutex::new(None));

        let slot = SessionSlot {
            sender,
            drop_reason: Arc::clone(&drop_reason),
        };

        self.sessions
            .write()
            .entry(recipient.clone())
            .or_default()
            .insert(id, slot);

        debug!(recipient = %recipient, session = %id, "registered stream");

        SessionHandle {
            id,
            recipient: recipient.clone(),
            receiver,
            drop_reason,
        }
    }

    /// Remove a stream. Returns false if it was already gone.
    pub fn unregister(&self, recipient: &RecipientId, id: SessionId) -> bool {
        let removed = self.remove(recipient, id);
        match removed {
            Some(slot) => {
                slot.close(DropReason::Unregistered);
                debug!(recipient = %recipient, session = %id, "unregistered stream");
                true
            }
            None => false,
        }
    }

    /// Push `event` to every stream of its recipient.
    ///
    /// Never blocks: streams that can't take the event are dropped.
    pub fn fan_out(&self, event: &Arc<NotificationEvent>) -> FanOutReport {
        let recipient = &event.recipient;
        let mut report = FanOutReport::default();
        let mut to_remove = Vec::new();

        {
            let sessions = self.sessions.read();
            if let Some(streams) = sessions.get(recipient) {
                for (id, slot) in streams.iter() {
                    match slot.try_send(Arc::clone(event)) {
                        Ok(()) => report.delivered += 1,
                        Err(reason) => to_remove.push((*id, reason)),
                    }
                }
            }
        }

        // Remove dropped streams
        for (id, reason) in to_remove {
            if let Some(slot) = self.remove(recipient, id) {
                warn!(
                    recipient = %recipient,
                    session = %id,
                    sequence = event.sequence.0,
                    reason = ?reason,
                    "dropping stream"
                );
                slot.close(reason);
                report.dropped += 1;
            }
        }

        report
    }

    /// Drop every stream. Returns how many were dropped.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().drain().collect();
        let mut count = 0;
        for (_, streams) in drained {
            for (_, slot) in streams {
                slot.close(DropReason::Shutdown);
                count += 1;
            }
        }
        count
    }

    /// Number of live streams for `recipient`.
    pub fn session_count(&self, recipient: &RecipientId) -> usize {
        self.sessions
            .read()
            .get(recipient)
            .map(|streams| streams.len())
            .unwrap_or(0)
    }

    /// Number of live streams across all recipients.
    pub fn total_sessions(&self) -> usize {
        self.sessions.read().values().map(|streams| streams.len()).sum()
    }

    /// Whether `id` is still registered for `recipient`.
    pub fn contains(&self, recipient: &RecipientId, id: SessionId) -> bool {
        self.sessions
            .read()
            .get(recipient)
            .map(|streams| streams.contains_key(&id))
            .unwrap_or(false)
    }

    fn remove(&self, recipient: &RecipientId, id: SessionId) -> Option<SessionSlot> {
        let mut sessions = self.sessions.write();
        let streams = sessions.get_mut(recipient)?;
        let slot = streams.remove(&id);
        if streams.is_empty() {
            sessions.remove(recipient);
        }
        slot
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}
