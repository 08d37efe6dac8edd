//! Keyed collection of recipient logs.

use crate::error::Result;
use crate::types::{NotificationEvent, NotificationPayload, RecipientId, Sequence, Timestamp};
use lru::LruCache;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::recipient::{RecipientLog, ReplayBatch, RetentionPolicy};

type RecipientSlot = Arc<Mutex<RecipientLog>>;
type RecipientGuard = ArcMutexGuard<RawMutex, RecipientLog>;

enum Lookup {
    Live(RecipientSlot),
    Detached(Sequence),
}

/// Event logs for all recipients.
///
/// The outer map lock is only held to find or create a recipient's slot;
/// appends and replays for a recipient serialize on that recipient's own
/// mutex, so producers for different recipients never contend.
pub struct EventLog {
    /// Recipient logs, least recently used first out when bounded.
    logs: Mutex<LruCache<RecipientId, RecipientSlot>>,

    /// High-water marks of logs dropped under memory pressure.
    retired_heads: RwLock<HashMap<RecipientId, Sequence>>,

    /// Retention applied to every recipient log.
    policy: RetentionPolicy,
}

impl EventLog {
    /// Create an event log with no limit on the number of recipients.
    pub fn new(policy: RetentionPolicy) -> Self {
        Self::with_max_recipients(policy, None)
    }

    /// Create an event log keeping at most `max_recipients` recipient logs
    /// in memory. The least recently touched log is dropped first.
    pub fn with_max_recipients(policy: RetentionPolicy, max_recipients: Option<usize>) -> Self {
        let logs = match max_recipients.and_then(NonZeroUsize::new) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };

        Self {
            logs: Mutex::new(logs),
            retired_heads: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Number of recipient logs currently held in memory.
    pub fn recipient_count(&self) -> usize {
        self.logs.lock().len()
    }

    // --- Write Path ---

    /// Append an event for `recipient` and return its sequence.
    pub fn append(&self, recipient: &RecipientId, payload: NotificationPayload) -> Result<Sequence> {
        self.append_with(recipient, payload, |_| Ok(()))
            .map(|(event, ())| event.sequence)
    }

    /// Append an event, running `then` while the recipient's log is locked.
    ///
    /// `then` sees the event before it is stored. If it fails, nothing is
    /// stored and the sequence stays free; otherwise the event is committed
    /// before the lock is released. Anything `then` does is ordered with
    /// respect to every other append and replay for the same recipient.
    pub fn append_with<R>(
        &self,
        recipient: &RecipientId,
        payload: NotificationPayload,
        then: impl FnOnce(&Arc<NotificationEvent>) -> Result<R>,
    ) -> Result<(Arc<NotificationEvent>, R)> {
        let mut log = self.lock_recipient(recipient);
        let event = log.prepare(recipient, payload)?;
        let result = then(&event)?;
        log.commit(Arc::clone(&event), &self.policy);

        debug!(
            recipient = %recipient,
            sequence = event.sequence.0,
            kind = %event.kind(),
            retained = log.len(),
            "appended notification"
        );

        Ok((event, result))
    }

    // --- Read Path ---

    /// Retained events after `cursor`. Does not create a log for unseen
    /// recipients.
    pub fn replay_after(&self, recipient: &RecipientId, cursor: Option<Sequence>) -> ReplayBatch {
        match self.lookup(recipient) {
            Lookup::Live(slot) => {
                let mut log = slot.lock();
                self.replay_locked(recipient, &mut log, cursor)
            }
            Lookup::Detached(head) => RecipientLog::resume(head).replay_after(cursor),
        }
    }

    /// Replay after `cursor` and run `then` while the recipient's log is
    /// still locked, so no append can land between the two.
    pub fn replay_with<R>(
        &self,
        recipient: &RecipientId,
        cursor: Option<Sequence>,
        then: impl FnOnce(&ReplayBatch) -> R,
    ) -> (ReplayBatch, R) {
        let mut log = self.lock_recipient(recipient);
        let batch = self.replay_locked(recipient, &mut log, cursor);
        let result = then(&batch);
        (batch, result)
    }

    /// Current high-water mark for `recipient` (0 if nothing was appended).
    pub fn latest_sequence(&self, recipient: &RecipientId) -> Sequence {
        match self.lookup(recipient) {
            Lookup::Live(slot) => slot.lock().latest(),
            Lookup::Detached(head) => head,
        }
    }

    fn replay_locked(
        &self,
        recipient: &RecipientId,
        log: &mut RecipientLog,
        cursor: Option<Sequence>,
    ) -> ReplayBatch {
        log.enforce(&self.policy, Timestamp::now());
        let batch = log.replay_after(cursor);

        if batch.truncated {
            warn!(
                recipient = %recipient,
                cursor = ?cursor,
                oldest_retained = ?batch.oldest_retained,
                latest = batch.latest.0,
                "replay window truncated"
            );
        } else {
            debug!(
                recipient = %recipient,
                cursor = ?cursor,
                events = batch.events.len(),
                "replayed notifications"
            );
        }

        batch
    }

    // --- Slots ---

    /// The recipient's slot, or the head its log would resume from.
    ///
    /// Both are read under the `logs` lock, which is also held while a log
    /// is retired or re-created, so a recipient is never seen as neither.
    fn lookup(&self, recipient: &RecipientId) -> Lookup {
        let mut logs = self.logs.lock();
        match logs.get(recipient) {
            Some(slot) => Lookup::Live(Arc::clone(slot)),
            None => Lookup::Detached(
                self.retired_heads
                    .read()
                    .get(recipient)
                    .copied()
                    .unwrap_or_default(),
            ),
        }
    }

    /// Lock the recipient's log, creating it if needed.
    fn lock_recipient(&self, recipient: &RecipientId) -> RecipientGuard {
        loop {
            let guard = self.slot(recipient).lock_arc();
            // Retired between lookup and lock; the replacement owns the sequence now.
            if !guard.retired {
                return guard;
            }
        }
    }

    fn slot(&self, recipient: &RecipientId) -> RecipientSlot {
        let mut logs = self.logs.lock();
        if let Some(slot) = logs.get(recipient) {
            return Arc::clone(slot);
        }

        let log = match self.retired_heads.write().remove(recipient) {
            Some(head) => RecipientLog::resume(head),
            None => RecipientLog::new(),
        };
        let slot = Arc::new(Mutex::new(log));

        if let Some((evicted_id, evicted)) = logs.push(recipient.clone(), Arc::clone(&slot)) {
            let mut evicted_log = evicted.lock();
            evicted_log.retired = true;
            let head = evicted_log.latest();
            self.retired_heads.write().insert(evicted_id.clone(), head);

            debug!(
                recipient = %evicted_id,
                head = head.0,
                dropped = evicted_log.len(),
                "recipient log evicted under memory pressure"
            );
        }

        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyError;
    use std::thread;

    fn payload(n: u64) -> NotificationPayload {
        NotificationPayload::new_answer(n, n, format!("Q{}", n))
    }

    #[test]
    fn test_append_creates_log_lazily() {
        let log = EventLog::new(RetentionPolicy::default());
        let alice = RecipientId::new("alice");

        assert_eq!(log.recipient_count(), 0);
        assert_eq!(log.latest_sequence(&alice), Sequence(0));

        let batch = log.replay_after(&alice, None);
        assert!(batch.is_empty());
        assert_eq!(log.recipient_count(), 0);

        assert_eq!(log.append(&alice, payload(1)).unwrap(), Sequence(1));
        assert_eq!(log.recipient_count(), 1);
    }

    #[test]
    fn test_sequences_are_per_recipient() {
        let log = EventLog::new(RetentionPolicy::default());
        let alice = RecipientId::new("alice");
        let bob = RecipientId::new("bob");

        assert_eq!(log.append(&alice, payload(1)).unwrap(), Sequence(1));
        assert_eq!(log.append(&alice, payload(2)).unwrap(), Sequence(2));
        assert_eq!(log.append(&bob, payload(3)).unwrap(), Sequence(1));

        assert_eq!(log.latest_sequence(&alice), Sequence(2));
        assert_eq!(log.latest_sequence(&bob), Sequence(1));
    }

    #[test]
    fn test_truncation_after_overflow() {
        let log = EventLog::new(RetentionPolicy::count(4));
        let alice = RecipientId::new("alice");

        for i in 0..5 {
            log.append(&alice, payload(i)).unwrap();
        }

        let batch = log.replay_after(&alice, Some(Sequence(0)));
        assert!(batch.truncated);
        assert_eq!(batch.events.len(), 4);
        assert_eq!(batch.events[0].sequence, Sequence(2));
    }

    #[test]
    fn test_memory_pressure_never_reuses_sequences() {
        let log = EventLog::with_max_recipients(RetentionPolicy::default(), Some(1));
        let alice = RecipientId::new("alice");
        let bob = RecipientId::new("bob");

        log.append(&alice, payload(1)).unwrap();
        log.append(&alice, payload(2)).unwrap();

        // Touching bob pushes alice out.
        log.append(&bob, payload(3)).unwrap();
        assert_eq!(log.recipient_count(), 1);
        assert_eq!(log.latest_sequence(&alice), Sequence(2));

        let batch = log.replay_after(&alice, Some(Sequence(1)));
        assert!(batch.truncated);
        assert!(batch.is_empty());

        assert_eq!(log.append(&alice, payload(4)).unwrap(), Sequence(3));
    }

    #[test]
    fn test_replay_with_runs_under_lock() {
        let log = EventLog::new(RetentionPolicy::default());
        let alice = RecipientId::new("alice");
        log.append(&alice, payload(1)).unwrap();

        let (batch, latest_seen) = log.replay_with(&alice, None, |batch| batch.latest);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(latest_seen, Sequence(1));
    }

    #[test]
    fn test_head_stays_visible_while_logs_churn() {
        let log = Arc::new(EventLog::with_max_recipients(RetentionPolicy::default(), Some(1)));
        let alice = RecipientId::new("alice");
        let bob = RecipientId::new("bob");
        log.append(&alice, payload(0)).unwrap();

        // Alternate recipients so alice's log is retired and re-created
        // over and over.
        let writer = {
            let log = Arc::clone(&log);
            let (alice, bob) = (alice.clone(), bob.clone());
            thread::spawn(move || {
                for i in 0..500 {
                    log.append(&alice, payload(i)).unwrap();
                    log.append(&bob, payload(i)).unwrap();
                }
            })
        };

        let mut last = Sequence(1);
        while !writer.is_finished() {
            let seen = log.latest_sequence(&alice);
            assert!(seen >= last, "head went back from {:?} to {:?}", last, seen);
            last = seen;
        }
        writer.join().unwrap();
        assert_eq!(log.latest_sequence(&alice), Sequence(501));
    }

    #[test]
    fn test_failed_append_with_stores_nothing() {
        let log = EventLog::new(RetentionPolicy::default());
        let alice = RecipientId::new("alice");

        let result = log.append_with(&alice, payload(1), |_| -> Result<()> {
            Err(NotifyError::Serialization("rejected".into()))
        });
        assert!(result.is_err());
        assert_eq!(log.latest_sequence(&alice), Sequence(0));
        assert!(log.replay_after(&alice, None).is_empty());

        assert_eq!(log.append(&alice, payload(2)).unwrap(), Sequence(1));
    }

    #[test]
    fn test_concurrent_appends_have_no_gaps() {
        let log = Arc::new(EventLog::new(RetentionPolicy::count(10_000)));
        let alice = RecipientId::new("alice");

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                let alice = alice.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        log.append(&alice, payload(t * 1000 + i)).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let batch = log.replay_after(&alice, None);
        let seqs: Vec<u64> = batch.events.iter().map(|e| e.sequence.0).collect();
        let expected: Vec<u64> = (1..=2000).collect();
        assert_eq!(seqs, expected);
    }
}
