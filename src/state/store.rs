//! Process-wide owner of the canonical [`AuthState`].
//!
//! DESIGN
//! ======
//! `AuthStore` wraps a tokio `watch` sender. Every write is a single
//! `send_modify`/`send_if_modified` call, so readers never see a torn
//! update. Readers take cloned snapshots or hold a `watch::Receiver`.
//! The store is injected (cloned `Arc`), never reached through a global.
//!
//! ORDERING
//! ========
//! The bootstrapper tags each resolution with a sequence number and writes
//! it through [`AuthStore::apply`]. Resolutions older than the current
//! `revision` are dropped, which makes the store last-notification-wins
//! rather than last-resolved-wins. The plain setters bypass sequencing.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::auth::{AuthState, Role};
use crate::provider::SessionUser;

/// Identity and role resolved from one provider answer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    pub user: Option<SessionUser>,
    pub role: Option<Role>,
}

impl Resolution {
    #[must_use]
    pub fn signed_in(user: SessionUser, role: Role) -> Self {
        Self { user: Some(user), role: Some(role) }
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub struct AuthStore {
    tx: Arc<watch::Sender<AuthState>>,
}

impl AuthStore {
    /// A fresh store in the process-start state (`loading = true`).
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AuthState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn set_user(&self, user: Option<SessionUser>) {
        self.tx.send_modify(|state| state.user = user);
    }

    pub fn set_role(&self, role: Option<Role>) {
        self.tx.send_modify(|state| state.role = role);
    }

    pub fn set_loading(&self, loading: bool) {
        self.tx.send_modify(|state| state.loading = loading);
    }

    /// Drop identity and role. The loading flag is left alone.
    pub fn clear(&self) {
        self.tx.send_modify(|state| {
            state.user = None;
            state.role = None;
        });
    }

    /// Write `resolution` if `seq` is newer than the last applied one.
    pub fn apply(&self, seq: u64, resolution: Resolution) -> bool {
        let applied = self.tx.send_if_modified(|state| {
            if seq <= state.revision {
                return false;
            }
            state.user = resolution.user;
            state.role = resolution.role;
            state.revision = seq;
            true
        });
        if !applied {
            debug!(seq, revision = self.tx.borrow().revision, "discarding stale session resolution");
        }
        applied
    }

    /// Set `loading = true` and return a guard that clears it when dropped.
    pub fn begin_loading(&self) -> LoadingGuard {
        self.set_loading(true);
        LoadingGuard { store: self.clone() }
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthState {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }

    /// Wait until the loading flag is cleared and return that snapshot.
    pub async fn wait_until_loaded(&self) -> AuthState {
        let mut rx = self.subscribe();
        match rx.wait_for(|state| !state.loading).await {
            Ok(state) => state.clone(),
            // The sender lives as long as `self`, so this arm is unreachable in practice.
            Err(_) => self.snapshot(),
        }
    }
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the loading flag on drop, including on cancellation or panic.
#[must_use = "dropping the guard immediately clears the loading flag"]
pub struct LoadingGuard {
    store: AuthStore,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.store.set_loading(false);
    }
}
