//! Auth provider seam: session types, change notifications, provider trait.
//!
//! DESIGN
//! ======
//! The hosted auth service is a black box reached through [`AuthProvider`].
//! Session changes are pushed over a tokio `broadcast` channel owned by the
//! provider ([`SessionEvents`]); each subscriber holds a
//! [`SessionSubscription`] and unsubscribes by dropping it.
//!
//! TRADE-OFFS
//! ==========
//! A lagging subscriber skips the events it missed instead of failing. Only
//! the newest session matters to the store, so dropped intermediate states
//! are harmless.

pub mod supabase;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

#[cfg(test)]
#[path = "http_stub_test.rs"]
pub mod http_stub;

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use uuid::Uuid;

use crate::state::auth::Role;

const DEFAULT_EVENT_CAPACITY: usize = 16;

// =============================================================================
// SESSION
// =============================================================================

/// Free-form metadata the provider stores on the user record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// User embedded in a provider session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

/// Provider-issued session. Tokens are redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<u64>,
    pub user: SessionUser,
}

impl Session {
    /// True when `expires_at` is known and not after `now_secs`.
    #[must_use]
    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now_secs)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to build http client: {0}")]
    HttpClientBuild(String),
    #[error("auth request failed: {0}")]
    Request(String),
    #[error("auth provider returned {status}: {body}")]
    Response { status: u16, body: String },
    #[error("failed to parse auth response: {0}")]
    Parse(String),
    #[error("no session is signed in")]
    NotSignedIn,
    #[error("auth provider unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// CHANGE NOTIFICATIONS
// =============================================================================

/// Why the provider's session changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// One session-change notification. `session` is `None` after sign-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub kind: AuthChangeEvent,
    pub session: Option<Session>,
}

/// Provider-side fan-out of session changes.
#[derive(Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionChange>,
}

impl SessionEvents {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self { tx }
    }

    /// Deliver a change to every live subscriber. Returns how many received it.
    pub fn emit(&self, kind: AuthChangeEvent, session: Option<Session>) -> usize {
        self.tx.send(SessionChange { kind, session }).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription { rx: self.tx.subscribe() }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// A live registration for session changes. Dropping it unsubscribes.
pub struct SessionSubscription {
    rx: broadcast::Receiver<SessionChange>,
}

impl SessionSubscription {
    /// Wait for the next change. Returns `None` once the provider is gone.
    pub async fn next(&mut self) -> Option<SessionChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session subscriber lagged; skipping to newer changes");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Release the registration explicitly.
    pub fn unsubscribe(self) {}
}

// =============================================================================
// PROVIDER TRAIT
// =============================================================================

/// The hosted auth/database service as seen by the session layer.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve the current session, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] when the provider cannot be reached or
    /// answers with something unexpected.
    async fn current_session(&self) -> Result<Option<Session>, ProviderError>;

    /// Register for session-change notifications.
    fn subscribe(&self) -> SessionSubscription;

    /// Look up the role stored on the user's profile record.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] when the lookup fails.
    async fn user_role(&self, user_id: Uuid) -> Result<Option<Role>, ProviderError>;
}

// =============================================================================
// TEST HELPERS
// =============================================================================
