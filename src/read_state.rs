//! Read/unread flags for delivered notifications.
//!
//! Every published event gets exactly one row keyed by
//! `(recipient, sequence)`, written before the event reaches any stream. Clients flip rows to read in batches; a batch
//! either applies completely or not at all.

use crate::error::{NotifyError, Result};
use crate::types::{EventKind, NotificationEvent, RecipientId, Sequence, Timestamp};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use tracing::debug;

/// One item of a client read-state update request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadUpdate {
    pub notification_sequence: Sequence,
}

impl ReadUpdate {
    pub fn new(sequence: u64) -> Self {
        Self {
            notification_sequence: Sequence(sequence),
        }
    }
}

/// Stored read-state row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub sequence: Sequence,
    pub kind: EventKind,
    pub message: String,
    pub created_at: Timestamp,
    pub read: bool,
}

/// Persistence seam for read flags.
pub trait ReadStateStore: Send + Sync {
    /// Create the unread row for a freshly published event.
    fn record(&self, event: &NotificationEvent) -> Result<()>;

    /// Mark every listed row read. Fails without changing anything if any
    /// row is missing.
    fn mark_read(&self, recipient: &RecipientId, sequences: &BTreeSet<Sequence>) -> Result<()>;

    /// All rows for `recipient`, oldest first.
    fn notifications(&self, recipient: &RecipientId) -> Result<Vec<NotificationRecord>>;

    fn unread_count(&self, recipient: &RecipientId) -> Result<usize>;
}

/// Default number of rows kept per recipient by [`InMemoryReadState`].
pub const DEFAULT_MAX_ROWS: usize = 1024;

/// Read-state kept in process memory.
///
/// Meant for tests and single-process deployments; durable hosts implement
/// [`ReadStateStore`] over their database. Memory is bounded the same way
/// the event log bounds it: at most `max_rows` rows per recipient (oldest
/// dropped first) and, optionally, at most `max_recipients` recipients
/// (least recently touched dropped first). Dropped rows can no longer be
/// marked read.
pub struct InMemoryReadState {
    rows: Mutex<LruCache<RecipientId, BTreeMap<Sequence, NotificationRecord>>>,
    max_rows: usize,
}

impl Default for InMemoryReadState {
    fn default() -> Self {
        Self::bounded(None, DEFAULT_MAX_ROWS)
    }
}

impl InMemoryReadState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bounded(max_recipients: Option<usize>, max_rows: usize) -> Self {
        let rows = match max_recipients.and_then(NonZeroUsize::new) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            rows: Mutex::new(rows),
            max_rows: max_rows.max(1),
        }
    }

    /// Number of recipients with rows in memory.
    pub fn recipient_count(&self) -> usize {
        self.rows.lock().len()
    }
}

impl ReadStateStore for InMemoryReadState {
    fn record(&self, event: &NotificationEvent) -> Result<()> {
        let record = NotificationRecord {
            sequence: event.sequence,
            kind: event.kind(),
            message: event.payload.message().to_string(),
            created_at: event.created_at,
            read: false,
        };

        let mut rows = self.rows.lock();
        let recipient_rows = rows.get_or_insert_mut(event.recipient.clone(), BTreeMap::new);
        recipient_rows.insert(event.sequence, record);
        while recipient_rows.len() > self.max_rows {
            recipient_rows.pop_first();
        }
        Ok(())
    }

    fn mark_read(&self, recipient: &RecipientId, sequences: &BTreeSet<Sequence>) -> Result<()> {
        let mut rows = self.rows.lock();

        let missing = match rows.peek(recipient) {
            Some(recipient_rows) => sequences.iter().find(|s| !recipient_rows.contains_key(*s)),
            None => sequences.iter().next(),
        };
        if let Some(&sequence) = missing {
            return Err(NotifyError::NotificationNotFound {
                recipient: recipient.clone(),
                sequence,
            });
        }

        if let Some(recipient_rows) = rows.get_mut(recipient) {
            for sequence in sequences {
                if let Some(row) = recipient_rows.get_mut(sequence) {
                    row.read = true;
                }
            }
        }

        debug!(recipient = %recipient, count = sequences.len(), "marked notifications read");
        Ok(())
    }

    fn notifications(&self, recipient: &RecipientId) -> Result<Vec<NotificationRecord>> {
        Ok(self
            .rows
            .lock()
            .peek(recipient)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn unread_count(&self, recipient: &RecipientId) -> Result<usize> {
        Ok(self
            .rows
            .lock()
            .peek(recipient)
            .map(|rows| rows.values().filter(|r| !r.read).count())
            .unwrap_or(0))
    }
}
