//! Access-token refresh: background task keeping the provider session alive.
//!
//! DESIGN
//! ======
//! Sleeps until `expires_at - margin`, then exchanges the refresh token.
//! The margin never exceeds half the remaining lifetime, so short-lived
//! tokens refresh at their midpoint instead of immediately. Any session
//! change (sign-in, sign-out, a refresh by someone else) restarts the
//! countdown from the new session. Without a refreshable session the task
//! parks until the next change.
//!
//! Consecutive attempts are at least `retry_backoff` apart, whatever the
//! outcome of the previous one. A provider that keeps issuing tokens that
//! are already due (clock skew, lifetimes below the margin) gets one
//! request per back-off window.
//!
//! ERROR HANDLING
//! ==============
//! Transient failures are retried after the back-off while the session is
//! still held. A rejected refresh token signs the session out inside the
//! adapter, which parks this task.

#[cfg(test)]
#[path = "refresh_test.rs"]
mod refresh_test;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_TOKEN_REFRESH_MARGIN_SECS, PortalConfig};
use crate::provider::supabase::{SupabaseAuth, unix_now};
use crate::provider::{AuthProvider, Session};

const DEFAULT_REFRESH_RETRY_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOptions {
    /// How long before expiry to refresh.
    pub margin: Duration,
    /// Minimum spacing between two refresh attempts.
    pub retry_backoff: Duration,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(DEFAULT_TOKEN_REFRESH_MARGIN_SECS),
            retry_backoff: DEFAULT_REFRESH_RETRY_BACKOFF,
        }
    }
}

impl From<&PortalConfig> for RefreshOptions {
    fn from(config: &PortalConfig) -> Self {
        Self { margin: config.refresh_margin, ..Self::default() }
    }
}

/// Spawn the refresh task. Abort the returned handle to stop it.
pub fn spawn_refresh_task(auth: Arc<SupabaseAuth>, options: RefreshOptions) -> JoinHandle<()> {
    let mut changes = auth.subscribe();
    info!(margin = ?options.margin, retry_backoff = ?options.retry_backoff, "token refresh task started");
    tokio::spawn(async move {
        let mut last_attempt: Option<Instant> = None;
        loop {
            let Some(delay) = auth.session().and_then(|s| refresh_delay(&s, unix_now(), options.margin)) else {
                debug!("no refreshable session; waiting for the next session change");
                if changes.next().await.is_none() {
                    break;
                }
                continue;
            };

            let mut deadline = Instant::now() + delay;
            if let Some(at) = last_attempt {
                deadline = deadline.max(at + options.retry_backoff);
            }

            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    last_attempt = Some(Instant::now());
                    match auth.refresh_session().await {
                        Ok(session) => debug!(expires_at = ?session.expires_at, "access token refreshed"),
                        Err(e) => warn!(error = %e, "token refresh failed"),
                    }
                }
                change = changes.next() => {
                    if change.is_none() {
                        break;
                    }
                }
            }
        }
    })
}

/// Time to wait before refreshing `session`, or `None` if it cannot be refreshed.
fn refresh_delay(session: &Session, now_secs: u64, margin: Duration) -> Option<Duration> {
    session.refresh_token.as_ref()?;
    let expires_at = session.expires_at?;
    let remaining = expires_at.saturating_sub(now_secs);
    let lead = margin.as_secs().min(remaining / 2);
    Some(Duration::from_secs(remaining - lead))
}
