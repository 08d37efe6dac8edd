//! Bounded log for a single recipient.

use crate::error::{NotifyError, Result};
use crate::types::{NotificationEvent, NotificationPayload, RecipientId, Sequence, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Default number of events retained per recipient.
pub const DEFAULT_MAX_EVENTS: usize = 256;

/// How much history each recipient log keeps for replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Max events kept per recipient. Always enforced.
    /// Default: 256
    pub max_events: usize,

    /// Events older than this are evicted (None = count bound only).
    #[serde(rename = "max_age_ms", with = "crate::types::millis::option")]
    pub max_age: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            max_age: None,
        }
    }
}

impl RetentionPolicy {
    /// Keep at most `max_events` per recipient.
    pub fn count(max_events: usize) -> Self {
        Self {
            max_events,
            max_age: None,
        }
    }

    /// Also evict events older than `max_age`.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// Result of a replay request.
#[derive(Clone, Debug)]
pub struct ReplayBatch {
    /// Retained events after the cursor, in increasing sequence order.
    pub events: Vec<Arc<NotificationEvent>>,

    /// True if events between the cursor and the oldest retained entry
    /// were evicted, or the cursor is ahead of anything this log issued.
    pub truncated: bool,

    /// High-water mark at the time of the replay.
    pub latest: Sequence,

    /// Oldest sequence still retained (None if the log is empty).
    pub oldest_retained: Option<Sequence>,
}

impl ReplayBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sequence of the last replayed event, if any.
    pub fn last_sequence(&self) -> Option<Sequence> {
        self.events.last().map(|e| e.sequence)
    }
}

/// Retained events and counters for one recipient.
#[derive(Debug)]
pub struct RecipientLog {
    entries: VecDeque<Arc<NotificationEvent>>,

    /// Last sequence handed out.
    head: Sequence,

    /// Highest sequence that has been evicted.
    evicted_through: Sequence,

    /// Set when the log is dropped from the event log under memory pressure.
    pub(crate) retired: bool,
}

impl RecipientLog {
    /// Empty log; the first append gets sequence 1.
    pub fn new() -> Self {
        Self::resume(Sequence::ZERO)
    }

    /// Empty log continuing after `head`. Everything up to `head` counts as
    /// evicted, so older cursors replay as truncated.
    pub fn resume(head: Sequence) -> Self {
        Self {
            entries: VecDeque::new(),
            head,
            evicted_through: head,
            retired: false,
        }
    }

    pub fn latest(&self) -> Sequence {
        self.head
    }

    pub fn oldest_retained(&self) -> Option<Sequence> {
        self.entries.front().map(|e| e.sequence)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Assign the next sequence, store the event and apply retention.
    pub fn append(
        &mut self,
        recipient: &RecipientId,
        payload: NotificationPayload,
        policy: &RetentionPolicy,
    ) -> Result<Arc<NotificationEvent>> {
        let event = self.prepare(recipient, payload)?;
        self.commit(Arc::clone(&event), policy);
        Ok(event)
    }

    /// Build the next event without storing it. Until it is committed the
    /// log is unchanged and its sequence is still free.
    pub fn prepare(
        &self,
        recipient: &RecipientId,
        payload: NotificationPayload,
    ) -> Result<Arc<NotificationEvent>> {
        let sequence = self
            .head
            .next()
            .ok_or_else(|| NotifyError::SequenceExhausted(recipient.clone()))?;

        Ok(Arc::new(NotificationEvent {
            sequence,
            recipient: recipient.clone(),
            payload,
            created_at: Timestamp::now(),
        }))
    }

    /// Store an event from [`prepare`](Self::prepare) and apply retention.
    pub fn commit(&mut self, event: Arc<NotificationEvent>, policy: &RetentionPolicy) {
        debug_assert_eq!(self.head.next(), Some(event.sequence));
        self.head = event.sequence;
        let now = event.created_at;
        self.entries.push_back(event);
        self.enforce(policy, now);
    }

    /// Evict entries past the count bound or older than the age bound.
    pub fn enforce(&mut self, policy: &RetentionPolicy, now: Timestamp) {
        let max_events = policy.max_events.max(1);
        while self.entries.len() > max_events {
            self.evict_front();
        }

        if let Some(max_age) = policy.max_age {
            while let Some(front) = self.entries.front() {
                if front.created_at.elapsed_until(now) <= max_age {
                    break;
                }
                self.evict_front();
            }
        }
    }

    fn evict_front(&mut self) {
        if let Some(evicted) = self.entries.pop_front() {
            self.evicted_through = evicted.sequence;
        }
    }

    /// Retained events with `sequence > cursor`.
    ///
    /// `None` means the client has never connected; it gets the whole
    /// retained window and is never reported as truncated.
    pub fn replay_after(&self, cursor: Option<Sequence>) -> ReplayBatch {
        let (events, truncated) = match cursor {
            None => (self.entries.iter().cloned().collect(), false),
            Some(cursor) if cursor > self.head => (Vec::new(), true),
            Some(cursor) => {
                let start = self.entries.partition_point(|e| e.sequence <= cursor);
                let events = self.entries.range(start..).cloned().collect();
                (events, cursor < self.evicted_through)
            }
        };

        ReplayBatch {
            events,
            truncated,
            latest: self.head,
            oldest_retained: self.oldest_retained(),
        }
    }
}

impl Default for RecipientLog {
    fn default() -> Self {
        Self::new()
    }
}
