//! Stream session state machine.

use crate::events::ReplayBatch;
use crate::registry::{ConnectionRegistry, DropReason, SessionHandle, SessionId};
use crate::types::{NotificationEvent, RecipientId, Sequence};
use crossbeam_channel::{after, bounded, never, select, tick, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::frame::{Frame, Transport, TransportError};

/// Per-stream timing and buffering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Max buffered live events before the stream is dropped.
    /// Default: 1024
    pub buffer_size: usize,

    /// Interval between keep-alive frames.
    /// Default: 20s
    #[serde(rename = "heartbeat_interval_ms", with = "crate::types::millis")]
    pub heartbeat_interval: Duration,

    /// Close the stream after this long without a successful write.
    /// Default: 90s
    #[serde(rename = "idle_timeout_ms", with = "crate::types::millis")]
    pub idle_timeout: Duration,

    /// Close the stream after this total lifetime (None = unlimited).
    /// Default: 60 minutes
    #[serde(rename = "max_lifetime_ms", with = "crate::types::millis::option")]
    pub max_lifetime: Option<Duration>,

    /// Pause between attempts to write a notification under backpressure.
    /// Default: 50ms
    #[serde(rename = "write_retry_backoff_ms", with = "crate::types::millis")]
    pub write_retry_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_size: crate::registry::DEFAULT_BUFFER_SIZE,
            heartbeat_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(90),
            max_lifetime: Some(Duration::from_secs(60 * 60)),
            write_retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Lifecycle of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Replaying,
    Live,
    Closed,
}

/// Why a stream ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Client went away or asked to stop.
    ClientDisconnected,
    /// A write failed for a reason other than disconnect.
    TransportFailed(String),
    /// No successful write within the idle timeout.
    IdleTimeout,
    /// Stream reached its maximum lifetime.
    LifetimeExpired,
    /// Live buffer overflowed and the registry dropped the stream.
    BufferOverflow,
    /// The hub shut down.
    Shutdown,
    /// Removed from the registry by someone else.
    Unregistered,
}

/// Summary returned when a stream ends.
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub recipient: RecipientId,
    /// Sequence of the last notification written, to resume from.
    pub cursor: Option<Sequence>,
    /// Notifications written (replayed and live).
    pub delivered: u64,
    pub heartbeats: u64,
    pub reason: CloseReason,
}

/// Asks a running session to stop, from any thread.
#[derive(Clone, Debug)]
pub struct DisconnectHandle {
    tx: Sender<()>,
}

impl DisconnectHandle {
    pub fn disconnect(&self) {
        let _ = self.tx.try_send(());
    }
}

/// One client connection.
///
/// Created by [`NotificationHub::connect`](crate::NotificationHub::connect)
/// already registered, holding the backlog to replay. [`run`](Self::run)
/// drives it to completion on the calling thread.
pub struct StreamSession {
    id: SessionId,
    recipient: RecipientId,
    /// Last notification written.
    cursor: Option<Sequence>,
    state: SessionState,
    /// Backlog captured at registration, consumed by the replay phase.
    backlog: Option<ReplayBatch>,
    handle: SessionHandle,
    registry: Arc<ConnectionRegistry>,
    config: SessionConfig,
    disconnect_tx: Sender<()>,
    disconnect_rx: Receiver<()>,
    opened_at: Instant,
    last_write: Instant,
    delivered: u64,
    heartbeats: u64,
    registered: bool,
}

impl StreamSession {
    pub(crate) fn new(
        cursor: Option<Sequence>,
        backlog: ReplayBatch,
        handle: SessionHandle,
        registry: Arc<ConnectionRegistry>,
        config: SessionConfig,
    ) -> Self {
        let (disconnect_tx, disconnect_rx) = bounded(1);
        let now = Instant::now();

        Self {
            id: handle.id,
            recipient: handle.recipient.clone(),
            cursor,
            state: SessionState::Connecting,
            backlog: Some(backlog),
            handle,
            registry,
            config,
            disconnect_tx,
            disconnect_rx,
            opened_at: now,
            last_write: now,
            delivered: 0,
            heartbeats: 0,
            registered: true,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn recipient(&self) -> &RecipientId {
        &self.recipient
    }

    pub fn cursor(&self) -> Option<Sequence> {
        self.cursor
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the backlog reaches past the retention window.
    pub fn is_truncated(&self) -> bool {
        self.backlog.as_ref().map(|b| b.truncated).unwrap_or(false)
    }

    pub fn disconnect_handle(&self) -> DisconnectHandle {
        DisconnectHandle {
            tx: self.disconnect_tx.clone(),
        }
    }

    /// Replay the backlog, then relay live events until the stream ends.
    pub fn run<T: Transport + ?Sized>(mut self, transport: &mut T) -> SessionOutcome {
        info!(
            recipient = %self.recipient,
            session = %self.id,
            cursor = ?self.cursor,
            "stream opened"
        );

        let reason = match self.replay(transport) {
            Ok(()) => self.relay(transport),
            Err(reason) => reason,
        };
        self.close();

        info!(
            recipient = %self.recipient,
            session = %self.id,
            cursor = ?self.cursor,
            delivered = self.delivered,
            reason = ?reason,
            "stream closed"
        );

        SessionOutcome {
            session_id: self.id,
            recipient: self.recipient.clone(),
            cursor: self.cursor,
            delivered: self.delivered,
            heartbeats: self.heartbeats,
            reason,
        }
    }

    // --- Phases ---

    fn replay<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<(), CloseReason> {
        self.state = SessionState::Replaying;
        let Some(batch) = self.backlog.take() else {
            self.state = SessionState::Live;
            return Ok(());
        };

        self.write(
            transport,
            &Frame::Connected {
                recipient: self.recipient.clone(),
                latest: batch.latest,
            },
        )?;

        if batch.truncated {
            self.write(
                transport,
                &Frame::Resync {
                    oldest_retained: batch.oldest_retained,
                    latest: batch.latest,
                },
            )?;
            // Restart the cursor at the retained window.
            self.cursor = match batch.events.first() {
                Some(first) => first.sequence.prev(),
                None => Some(batch.latest),
            };
        }

        for event in &batch.events {
            if self.disconnect_rx.try_recv().is_ok() {
                return Err(CloseReason::ClientDisconnected);
            }
            if self.last_write.elapsed() >= self.config.heartbeat_interval {
                self.heartbeat(transport)?;
            }
            self.deliver(transport, event)?;
        }

        debug!(
            recipient = %self.recipient,
            session = %self.id,
            replayed = batch.events.len(),
            truncated = batch.truncated,
            "replay complete"
        );

        self.state = SessionState::Live;
        Ok(())
    }

    fn relay<T: Transport + ?Sized>(&mut self, transport: &mut T) -> CloseReason {
        let events = self.handle.receiver.clone();
        let disconnect = self.disconnect_rx.clone();
        let heartbeat = tick(self.config.heartbeat_interval);
        let lifetime = match self.config.max_lifetime {
            Some(limit) => after(limit.saturating_sub(self.opened_at.elapsed())),
            None => never(),
        };

        loop {
            select! {
                recv(events) -> msg => match msg {
                    Ok(event) => {
                        if let Err(reason) = self.deliver(transport, &event) {
                            return reason;
                        }
                    }
                    Err(_) => return self.registry_drop_reason(),
                },
                recv(heartbeat) -> _ => {
                    if self.idle_expired() {
                        return CloseReason::IdleTimeout;
                    }
                    if let Err(reason) = self.heartbeat(transport) {
                        return reason;
                    }
                },
                recv(disconnect) -> _ => return CloseReason::ClientDisconnected,
                recv(lifetime) -> _ => return CloseReason::LifetimeExpired,
            }
        }
    }

    // --- Writes ---

    /// Write a notification and advance the cursor. Events at or below the
    /// cursor were already written and are skipped.
    fn deliver<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        event: &Arc<NotificationEvent>,
    ) -> Result<(), CloseReason> {
        if let Some(cursor) = self.cursor {
            if event.sequence <= cursor {
                return Ok(());
            }
        }

        self.write(transport, &Frame::Notification(Arc::clone(event)))?;
        self.cursor = Some(event.sequence);
        self.delivered += 1;
        Ok(())
    }

    /// Write a frame, retrying under backpressure until the idle timeout.
    fn write<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        frame: &Frame,
    ) -> Result<(), CloseReason> {
        loop {
            match transport.send(frame) {
                Ok(()) => {
                    self.last_write = Instant::now();
                    return Ok(());
                }
                Err(TransportError::Backpressure) => {
                    if self.idle_expired() {
                        return Err(CloseReason::IdleTimeout);
                    }
                    select! {
                        recv(self.disconnect_rx) -> _ => return Err(CloseReason::ClientDisconnected),
                        default(self.config.write_retry_backoff) => {}
                    }
                }
                Err(TransportError::Closed) => return Err(CloseReason::ClientDisconnected),
                Err(e) => return Err(CloseReason::TransportFailed(e.to_string())),
            }
        }
    }

    /// Heartbeats are not retried; a skipped one just lets the idle clock run.
    fn heartbeat<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<(), CloseReason> {
        match transport.send(&Frame::Heartbeat) {
            Ok(()) => {
                self.last_write = Instant::now();
                self.heartbeats += 1;
                Ok(())
            }
            Err(TransportError::Backpressure) => Ok(()),
            Err(TransportError::Closed) => Err(CloseReason::ClientDisconnected),
            Err(e) => Err(CloseReason::TransportFailed(e.to_string())),
        }
    }

    fn idle_expired(&self) -> bool {
        self.last_write.elapsed() >= self.config.idle_timeout
    }

    // --- Teardown ---

    fn registry_drop_reason(&self) -> CloseReason {
        match self.handle.drop_reason() {
            Some(DropReason::BufferOverflow) => CloseReason::BufferOverflow,
            Some(DropReason::Shutdown) => CloseReason::Shutdown,
            _ => CloseReason::Unregistered,
        }
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
        if self.registered {
            self.registered = false;
            self.registry.unregister(&self.recipient, self.id);
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}
