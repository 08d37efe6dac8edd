//! Recipient lookup.
//!
//! Publishing to, or streaming for, a member that has no account is
//! rejected with [`NotifyError::RecipientUnknown`](crate::NotifyError).
//! Member accounts live elsewhere; this trait is the seam.

use crate::types::RecipientId;
use parking_lot::RwLock;
use std::collections::HashSet;

/// Answers whether a recipient has an account.
pub trait RecipientDirectory: Send + Sync {
    fn contains(&self, recipient: &RecipientId) -> bool;
}

/// In-memory member set.
#[derive(Default)]
pub struct MemberDirectory {
    members: RwLock<HashSet<RecipientId>>,
}

impl MemberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_members<I, R>(members: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        Self {
            members: RwLock::new(members.into_iter().map(Into::into).collect()),
        }
    }

    /// Add a member. Returns false if it was already present.
    pub fn insert(&self, recipient: RecipientId) -> bool {
        self.members.write().insert(recipient)
    }

    /// Remove a member (e.g. withdrawn account).
    pub fn remove(&self, recipient: &RecipientId) -> bool {
        self.members.write().remove(recipient)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

impl RecipientDirectory for MemberDirectory {
    fn contains(&self, recipient: &RecipientId) -> bool {
        self.members.read().contains(recipient)
    }
}
