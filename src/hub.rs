//! Top-level service tying the notification components together.

use crate::directory::{MemberDirectory, RecipientDirectory};
use crate::dispatcher::{Dispatcher, Published};
use crate::error::{NotifyError, Result};
use crate::events::{EventLog, ReplayBatch, RetentionPolicy};
use crate::read_state::{
    InMemoryReadState, NotificationRecord, ReadStateStore, ReadUpdate, DEFAULT_MAX_ROWS,
};
use crate::registry::ConnectionRegistry;
use crate::session::{SessionConfig, StreamSession};
use crate::types::{parse_cursor, NotificationPayload, RecipientId, Sequence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Hub configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Per-recipient replay window.
    pub retention: RetentionPolicy,

    /// Stream timing and buffering.
    pub session: SessionConfig,

    /// Max recipient logs held in memory; least recently used are evicted
    /// (None = unbounded).
    pub max_recipients: Option<usize>,
}

impl HubConfig {
    /// Parse a JSON config document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: HubConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention.max_events == 0 {
            return Err(NotifyError::InvalidConfig(
                "retention.max_events must be at least 1".into(),
            ));
        }
        if self.session.buffer_size == 0 {
            return Err(NotifyError::InvalidConfig(
                "session.buffer_size must be at least 1".into(),
            ));
        }
        if self.session.heartbeat_interval.is_zero() {
            return Err(NotifyError::InvalidConfig(
                "session.heartbeat_interval_ms must be positive".into(),
            ));
        }
        if self.session.idle_timeout <= self.session.heartbeat_interval {
            return Err(NotifyError::InvalidConfig(
                "session.idle_timeout_ms must exceed the heartbeat interval".into(),
            ));
        }
        if self.max_recipients == Some(0) {
            return Err(NotifyError::InvalidConfig(
                "max_recipients must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// The notification hub.
///
/// Owns the event log, the connection registry and the dispatcher. Wraps a
/// member directory and a read-state store supplied by the host. Cheap to
/// share behind an `Arc`; every method takes `&self`.
pub struct NotificationHub {
    config: HubConfig,
    log: Arc<EventLog>,
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn RecipientDirectory>,
    read_state: Arc<dyn ReadStateStore>,
    dispatcher: Dispatcher,
}

impl NotificationHub {
    /// Create a hub over the given directory and read-state store.
    pub fn new(
        config: HubConfig,
        directory: Arc<dyn RecipientDirectory>,
        read_state: Arc<dyn ReadStateStore>,
    ) -> Result<Self> {
        config.validate()?;

        let log = Arc::new(EventLog::with_max_recipients(
            config.retention.clone(),
            config.max_recipients,
        ));
        let registry = Arc::new(ConnectionRegistry::new(config.session.buffer_size));
        let dispatcher = Dispatcher::new(
            Arc::clone(&log),
            Arc::clone(&registry),
            Arc::clone(&directory),
            Arc::clone(&read_state),
        );

        Ok(Self {
            config,
            log,
            registry,
            directory,
            read_state,
            dispatcher,
        })
    }

    /// Create a hub with an in-memory directory and read-state store. The
    /// store keeps rows for at most `max_recipients` members.
    /// Returns the directory so callers can add members.
    pub fn in_memory(config: HubConfig) -> Result<(Self, Arc<MemberDirectory>)> {
        let members = Arc::new(MemberDirectory::new());
        let read_state = InMemoryReadState::bounded(config.max_recipients, DEFAULT_MAX_ROWS);
        let hub = Self::new(config, members.clone(), Arc::new(read_state))?;
        Ok((hub, members))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // --- Producers ---

    /// Notify `recipient`. See [`Dispatcher::publish`].
    pub fn publish(
        &self,
        recipient: &RecipientId,
        payload: NotificationPayload,
    ) -> Result<Published> {
        self.dispatcher.publish(recipient, payload)
    }

    // --- Clients ---

    /// Open a stream for `recipient`, resuming after `cursor`.
    ///
    /// The backlog is captured and the live buffer registered while the
    /// recipient's log is locked, so every event lands in exactly one of
    /// them. Call [`StreamSession::run`] to drive the stream.
    pub fn connect(
        &self,
        recipient: &RecipientId,
        cursor: Option<Sequence>,
    ) -> Result<StreamSession> {
        self.ensure_known(recipient)?;

        let registry = &self.registry;
        let (backlog, handle) = self
            .log
            .replay_with(recipient, cursor, |_| registry.register(recipient));

        debug!(
            recipient = %recipient,
            session = %handle.id,
            backlog = backlog.events.len(),
            "stream registered"
        );

        Ok(StreamSession::new(
            cursor,
            backlog,
            handle,
            Arc::clone(&self.registry),
            self.config.session.clone(),
        ))
    }

    /// Open a stream from a raw resumption token (`Last-Event-ID`).
    pub fn connect_with_token(&self, recipient: &RecipientId, token: &str) -> Result<StreamSession> {
        let cursor = parse_cursor(token)?;
        self.connect(recipient, cursor)
    }

    /// Retained events after `cursor`, without opening a stream.
    pub fn replay_after(
        &self,
        recipient: &RecipientId,
        cursor: Option<Sequence>,
    ) -> Result<ReplayBatch> {
        self.ensure_known(recipient)?;
        Ok(self.log.replay_after(recipient, cursor))
    }

    pub fn latest_sequence(&self, recipient: &RecipientId) -> Sequence {
        self.log.latest_sequence(recipient)
    }

    // --- Read-State ---

    /// Mark a batch of notifications read. The whole batch fails if any
    /// item names a notification the recipient never received.
    pub fn mark_read(&self, recipient: &RecipientId, updates: &[ReadUpdate]) -> Result<()> {
        self.ensure_known(recipient)?;
        if updates.is_empty() {
            return Err(NotifyError::EmptyBatch);
        }

        let latest = self.log.latest_sequence(recipient);
        let mut sequences = BTreeSet::new();
        for update in updates {
            let sequence = update.notification_sequence;
            if sequence == Sequence::ZERO || sequence > latest {
                return Err(NotifyError::NotificationNotFound {
                    recipient: recipient.clone(),
                    sequence,
                });
            }
            sequences.insert(sequence);
        }

        self.read_state.mark_read(recipient, &sequences)
    }

    pub fn notifications(&self, recipient: &RecipientId) -> Result<Vec<NotificationRecord>> {
        self.ensure_known(recipient)?;
        self.read_state.notifications(recipient)
    }

    pub fn unread_count(&self, recipient: &RecipientId) -> Result<usize> {
        self.ensure_known(recipient)?;
        self.read_state.unread_count(recipient)
    }

    // --- Lifecycle ---

    pub fn session_count(&self, recipient: &RecipientId) -> usize {
        self.registry.session_count(recipient)
    }

    pub fn total_sessions(&self) -> usize {
        self.registry.total_sessions()
    }

    /// Close every live stream. Sessions end with `CloseReason::Shutdown`.
    pub fn shutdown(&self) -> usize {
        let closed = self.registry.shutdown();
        info!(closed, "notification hub shut down");
        closed
    }

    fn ensure_known(&self, recipient: &RecipientId) -> Result<()> {
        if self.directory.contains(recipient) {
            Ok(())
        } else {
            Err(NotifyError::RecipientUnknown(recipient.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hub() -> NotificationHub {
        let (hub, members) = NotificationHub::in_memory(HubConfig::default()).unwrap();
        members.insert(RecipientId::new("alice"));
        hub
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(HubConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = HubConfig::default();
        config.retention.max_events = 0;
        assert!(matches!(config.validate(), Err(NotifyError::InvalidConfig(_))));

        let mut config = HubConfig::default();
        config.session.idle_timeout = Duration::from_secs(5);
        assert!(matches!(config.validate(), Err(NotifyError::InvalidConfig(_))));

        let config = HubConfig {
            max_recipients: Some(0),
            ..Default::default()
        };
        assert!(NotificationHub::in_memory(config).is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config = HubConfig::from_json_str(
            r#"{"retention": {"max_events": 10}, "session": {"buffer_size": 4}}"#,
        )
        .unwrap();
        assert_eq!(config.retention.max_events, 10);
        assert_eq!(config.session.buffer_size, 4);
        assert_eq!(config.session.heartbeat_interval, Duration::from_secs(20));

        let err = HubConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, NotifyError::Serialization(_)));
    }

    #[test]
    fn test_connect_unknown_recipient() {
        let hub = hub();
        let result = hub.connect(&RecipientId::new("ghost"), None);
        assert!(matches!(result, Err(NotifyError::RecipientUnknown(_))));
        assert_eq!(hub.total_sessions(), 0);
    }

    #[test]
    fn test_connect_with_bad_token() {
        let hub = hub();
        let result = hub.connect_with_token(&RecipientId::new("alice"), "abc");
        assert!(matches!(result, Err(NotifyError::InvalidCursor(_))));
    }

    #[test]
    fn test_mark_read_validation() {
        let hub = hub();
        let alice = RecipientId::new("alice");
        hub.publish(&alice, NotificationPayload::system("one")).unwrap();
        hub.publish(&alice, NotificationPayload::system("two")).unwrap();

        assert!(matches!(hub.mark_read(&alice, &[]), Err(NotifyError::EmptyBatch)));
        assert!(matches!(
            hub.mark_read(&alice, &[ReadUpdate::new(1), ReadUpdate::new(3)]),
            Err(NotifyError::NotificationNotFound { sequence: Sequence(3), .. })
        ));
        assert_eq!(hub.unread_count(&alice).unwrap(), 2);

        hub.mark_read(&alice, &[ReadUpdate::new(2), ReadUpdate::new(2)])
            .unwrap();
        assert_eq!(hub.unread_count(&alice).unwrap(), 1);
    }

    #[test]
    fn test_shutdown_closes_sessions() {
        let hub = hub();
        let alice = RecipientId::new("alice");
        let _a = hub.connect(&alice, None).unwrap();
        let _b = hub.connect(&alice, None).unwrap();
        assert_eq!(hub.session_count(&alice), 2);

        assert_eq!(hub.shutdown(), 2);
        assert_eq!(hub.total_sessions(), 0);
    }
}
