//! Core types for notification streams.

use crate::error::{NotifyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Opaque identifier of the member who owns a notification stream.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub String);

impl RecipientId {
    pub fn new(id: impl Into<String>) -> Self {
        RecipientId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Recipient({})", self.0)
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecipientId {
    fn from(s: &str) -> Self {
        RecipientId(s.to_string())
    }
}

/// Position in a recipient's event log. Starts at 1; 0 means "nothing yet".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sequence {
    pub const ZERO: Sequence = Sequence(0);

    /// Next sequence, or `None` once the counter is exhausted.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Sequence)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(Sequence(self.0 - 1))
        } else {
            None
        }
    }
}

/// Parse a client resumption token (the `Last-Event-ID` header).
///
/// An empty token means the client has never connected before.
pub fn parse_cursor(token: &str) -> Result<Option<Sequence>> {
    let token = token.trim();
    if token.is_empty() {
        return Ok(None);
    }
    token
        .parse::<u64>()
        .map(|n| Some(Sequence(n)))
        .map_err(|_| NotifyError::InvalidCursor(token.to_string()))
}

/// Microseconds since Unix epoch. Informational only, never an ordering key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    /// Time elapsed between `self` and `later`, zero if `later` is earlier.
    pub fn elapsed_until(self, later: Timestamp) -> Duration {
        Duration::from_micros(later.0.saturating_sub(self.0).max(0) as u64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Kind of notification, used as the SSE event name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    NewAnswer,
    ReportResolved,
    InquiryAnswered,
    System,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::NewAnswer => "NEW_ANSWER",
            EventKind::ReportResolved => "REPORT_RESOLVED",
            EventKind::InquiryAnswered => "INQUIRY_ANSWERED",
            EventKind::System => "SYSTEM",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a notification, one variant per kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationPayload {
    /// Someone answered a question the recipient asked.
    NewAnswer {
        question_id: u64,
        answer_id: u64,
        message: String,
    },

    /// A report the recipient filed was handled by staff.
    ReportResolved { report_id: u64, message: String },

    /// Staff answered an inquiry the recipient opened.
    InquiryAnswered { inquiry_id: u64, message: String },

    /// Free-form platform notice.
    System { message: String },
}

impl NotificationPayload {
    pub fn new_answer(question_id: u64, answer_id: u64, message: impl Into<String>) -> Self {
        NotificationPayload::NewAnswer {
            question_id,
            answer_id,
            message: message.into(),
        }
    }

    pub fn report_resolved(report_id: u64, message: impl Into<String>) -> Self {
        NotificationPayload::ReportResolved {
            report_id,
            message: message.into(),
        }
    }

    pub fn inquiry_answered(inquiry_id: u64, message: impl Into<String>) -> Self {
        NotificationPayload::InquiryAnswered {
            inquiry_id,
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        NotificationPayload::System {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            NotificationPayload::NewAnswer { .. } => EventKind::NewAnswer,
            NotificationPayload::ReportResolved { .. } => EventKind::ReportResolved,
            NotificationPayload::InquiryAnswered { .. } => EventKind::InquiryAnswered,
            NotificationPayload::System { .. } => EventKind::System,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            NotificationPayload::NewAnswer { message, .. }
            | NotificationPayload::ReportResolved { message, .. }
            | NotificationPayload::InquiryAnswered { message, .. }
            | NotificationPayload::System { message } => message,
        }
    }
}

/// A sequenced notification for one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Assigned by the event log; strictly increasing per recipient.
    pub sequence: Sequence,

    pub recipient: RecipientId,

    pub payload: NotificationPayload,

    pub created_at: Timestamp,
}

impl NotificationEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Serde helpers for durations written as integer milliseconds in config files.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}
