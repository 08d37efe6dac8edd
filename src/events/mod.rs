//! Per-recipient notification log.
//!
//! Every recipient owns a bounded, monotonically sequenced log of its most
//! recent notifications. Sequences start at 1 and are never reused, even
//! when old entries (or a whole recipient log) are evicted. Replays that
//! reach past the retained window report `truncated` instead of silently
//! skipping the gap.

mod log;
mod recipient;

pub use log::EventLog;
pub use recipient::{RecipientLog, ReplayBatch, RetentionPolicy};
