//! Producer entry point.
//!
//! Question, answer, report and inquiry workflows call
//! [`Dispatcher::publish`] to notify a member. The event's read-state row is
//! recorded, then the event is appended to the member's log and pushed into
//! the buffer of every live stream, all while the member's log is locked, which keeps live delivery in sequence order and
//! lines up with the replay-then-register step of new streams. Pushing never
//! waits on a client.

use crate::directory::RecipientDirectory;
use crate::error::{NotifyError, Result};
use crate::events::EventLog;
use crate::read_state::ReadStateStore;
use crate::registry::{ConnectionRegistry, FanOutReport};
use crate::types::{NotificationEvent, NotificationPayload, RecipientId, Sequence};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a successful publish.
#[derive(Clone, Debug)]
pub struct Published {
    pub event: Arc<NotificationEvent>,
    /// Best-effort live delivery; does not affect success.
    pub fan_out: FanOutReport,
}

impl Published {
    pub fn sequence(&self) -> Sequence {
        self.event.sequence
    }
}

/// Appends events and fans them out to live streams.
#[derive(Clone)]
pub struct Dispatcher {
    log: Arc<EventLog>,
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn RecipientDirectory>,
    read_state: Arc<dyn ReadStateStore>,
}

impl Dispatcher {
    pub fn new(
        log: Arc<EventLog>,
        registry: Arc<ConnectionRegistry>,
        directory: Arc<dyn RecipientDirectory>,
        read_state: Arc<dyn ReadStateStore>,
    ) -> Self {
        Self {
            log,
            registry,
            directory,
            read_state,
        }
    }

    /// Notify `recipient`.
    ///
    /// The read-state row is written before the event is committed or
    /// fanned out, so a client can mark read anything it has been sent.
    /// Fails for an unknown recipient, an exhausted sequence counter or a
    /// read-state store error; in the latter two cases nothing was stored
    /// or delivered and producers may retry.
    pub fn publish(
        &self,
        recipient: &RecipientId,
        payload: NotificationPayload,
    ) -> Result<Published> {
        if !self.directory.contains(recipient) {
            return Err(NotifyError::RecipientUnknown(recipient.clone()));
        }

        let registry = &self.registry;
        let read_state = &self.read_state;
        let (event, fan_out) = self
            .log
            .append_with(recipient, payload, |event| {
                read_state.record(event)?;
                Ok(registry.fan_out(event))
            })
            .map_err(|e| {
                warn!(recipient = %recipient, error = %e, "publish failed");
                e
            })?;

        debug!(
            recipient = %recipient,
            sequence = event.sequence.0,
            delivered = fan_out.delivered,
            dropped = fan_out.dropped,
            "published notification"
        );

        Ok(Published { event, fan_out })
    }
}
