//! Wire frames and the transport seam.

use crate::types::{EventKind, NotificationEvent, NotificationPayload, RecipientId, Sequence};
use serde::Serialize;
use std::io::{self, Write};
use std::sync::Arc;
use thiserror::Error;

/// One item written to a client stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// First frame of every stream.
    Connected {
        recipient: RecipientId,
        latest: Sequence,
    },

    /// Part of the requested backlog was evicted; the client's list may be
    /// incomplete and should be reloaded.
    Resync {
        oldest_retained: Option<Sequence>,
        latest: Sequence,
    },

    /// A notification. Its sequence becomes the client's cursor.
    Notification(Arc<NotificationEvent>),

    /// Keep-alive. Carries nothing and never moves the cursor.
    Heartbeat,
}

/// JSON body of a notification frame.
#[derive(Serialize)]
struct NotificationBody<'a> {
    sequence: Sequence,
    kind: EventKind,
    payload: &'a NotificationPayload,
}

#[derive(Serialize)]
struct ConnectedBody<'a> {
    recipient: &'a RecipientId,
    latest: Sequence,
}

#[derive(Serialize)]
struct ResyncBody {
    oldest_retained: Option<Sequence>,
    latest: Sequence,
}

impl Frame {
    /// Cursor value carried by this frame.
    pub fn sequence(&self) -> Option<Sequence> {
        match self {
            Frame::Notification(event) => Some(event.sequence),
            _ => None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Heartbeat)
    }

    /// Render as a `text/event-stream` message.
    pub fn to_sse(&self) -> serde_json::Result<String> {
        let text = match self {
            Frame::Connected { recipient, latest } => {
                let data = serde_json::to_string(&ConnectedBody {
                    recipient,
                    latest: *latest,
                })?;
                format!("event: connected\ndata: {}\n\n", data)
            }
            Frame::Resync {
                oldest_retained,
                latest,
            } => {
                let data = serde_json::to_string(&ResyncBody {
                    oldest_retained: *oldest_retained,
                    latest: *latest,
                })?;
                format!("event: resync\ndata: {}\n\n", data)
            }
            Frame::Notification(event) => {
                let data = serde_json::to_string(&NotificationBody {
                    sequence: event.sequence,
                    kind: event.kind(),
                    payload: &event.payload,
                })?;
                format!("id: {}\nevent: {}\ndata: {}\n\n", event.sequence, event.kind(), data)
            }
            // Comment line: ignored by EventSource, leaves Last-Event-ID alone.
            Frame::Heartbeat => ": keep-alive\n\n".to_string(),
        };
        Ok(text)
    }
}

/// Why a frame could not be written.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Not written; the peer is not draining. Try again later.
    #[error("transport is applying backpressure")]
    Backpressure,

    /// The peer went away.
    #[error("transport closed")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame encoding failed: {0}")]
    Encode(String),
}

/// Outgoing side of a client connection.
pub trait Transport {
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        (**self).send(frame)
    }
}

/// Server-sent events over any byte sink.
pub struct SseTransport<W: Write> {
    writer: W,
}

impl<W: Write> SseTransport<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Transport for SseTransport<W> {
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let text = frame
            .to_sse()
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        self.writer
            .write_all(text.as_bytes())
            .and_then(|()| self.writer.flush())
            .map_err(classify_io_error)
    }
}

fn classify_io_error(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Backpressure,
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => TransportError::Closed,
        _ => TransportError::Io(e),
    }
}
