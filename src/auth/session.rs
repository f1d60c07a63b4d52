//! Client-side view of the signed-in user.
//!
//! The hosted auth provider owns sign-in; front-end adapters push the
//! resulting identity into a [`Session`], and entitlement services observe it.

use std::fmt;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub access_token: String,
}

impl fmt::Debug for SessionUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionUser")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Current identity, broadcast to subscribers whenever the user changes.
pub struct Session {
    tx: watch::Sender<Option<SessionUser>>,
}

impl Session {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Stores the user. Observers are notified only when the identity changes;
    /// a token refresh for the same user is stored silently.
    pub fn sign_in(&self, user: SessionUser) {
        self.tx.send_if_modified(|current| {
            let changed = current.as_ref().map(|u| u.id) != Some(user.id);
            *current = Some(user);
            changed
        });
    }

    pub fn sign_out(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }

    pub fn current(&self) -> Option<SessionUser> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionUser>> {
        self.tx.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
