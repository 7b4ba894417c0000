//! Session bootstrapper: seeds the store and keeps it in sync with the provider.
//!
//! DESIGN
//! ======
//! One task per process. On spawn it raises the loading flag, registers for
//! session changes, then races the initial `current_session()` fetch
//! against incoming notifications. Every resolution carries a sequence
//! number: the initial fetch is always `1`, notifications are numbered in
//! arrival order from `2`. The store drops anything older than what it
//! already holds, so a slow initial fetch can never overwrite a newer
//! sign-in or sign-out.
//!
//! The loading flag is cleared exactly once, when the initial fetch
//! resolves, fails, or times out. Notifications never touch it.
//!
//! ERROR HANDLING
//! ==============
//! Fetch failures and timeouts are logged and resolved as "signed out". The
//! store fails closed: an unreachable provider never yields an identity.

#[cfg(test)]
#[path = "bootstrap_test.rs"]
mod bootstrap_test;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_SESSION_FETCH_TIMEOUT_MS, PortalConfig};
use crate::provider::{AuthProvider, ProviderError, Session, SessionSubscription, SessionUser};
use crate::state::auth::{AuthState, Role};
use crate::state::store::{AuthStore, LoadingGuard, Resolution};

const INITIAL_FETCH_SEQ: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// Upper bound on the initial session fetch before falling back to signed out.
    pub fetch_timeout: Duration,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self { fetch_timeout: Duration::from_millis(DEFAULT_SESSION_FETCH_TIMEOUT_MS) }
    }
}

impl From<&PortalConfig> for BootstrapOptions {
    fn from(config: &PortalConfig) -> Self {
        Self { fetch_timeout: config.session_fetch_timeout }
    }
}

/// Owner of the running bootstrapper. Dropping it stops the task and
/// releases the provider subscription.
pub struct BootstrapHandle {
    store: AuthStore,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl BootstrapHandle {
    /// Wait for the initial resolution and return the settled snapshot.
    pub async fn ready(&self) -> AuthState {
        self.store.wait_until_loaded().await
    }

    #[must_use]
    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    /// Stop the task and wait for it to release its subscription.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take()
            && tx.send(()).is_err()
        {
            debug!("session bootstrapper already stopped");
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "session bootstrapper ended abnormally");
        }
    }
}

impl Drop for BootstrapHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take()
            && tx.send(()).is_err()
        {
            debug!("session bootstrapper already stopped");
        }
    }
}

/// Start the bootstrapper for `store`.
///
/// The loading flag is raised and the change subscription is registered
/// before this returns, so no notification emitted afterwards is missed.
pub fn spawn_bootstrapper(
    provider: Arc<dyn AuthProvider>,
    store: AuthStore,
    options: BootstrapOptions,
) -> BootstrapHandle {
    let loading = store.begin_loading();
    let changes = provider.subscribe();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    info!(fetch_timeout = ?options.fetch_timeout, "session bootstrapper starting");
    let task = tokio::spawn(run(provider, store.clone(), options, loading, changes, shutdown_rx));

    BootstrapHandle { store, shutdown: Some(shutdown_tx), task }
}

async fn run(
    provider: Arc<dyn AuthProvider>,
    store: AuthStore,
    options: BootstrapOptions,
    loading: LoadingGuard,
    mut changes: SessionSubscription,
    mut shutdown: oneshot::Receiver<()>,
) {
    #[cfg(feature = "dev-role-bypass")]
    let bypass = super::dev_bypass::resolution_from_env();
    #[cfg(not(feature = "dev-role-bypass"))]
    let bypass: Option<Resolution> = None;

    if let Some(resolution) = bypass {
        store.apply(INITIAL_FETCH_SEQ, resolution);
        drop(loading);
        hold_fixed_identity(changes, shutdown).await;
        return;
    }

    let mut loading = Some(loading);
    let mut next_seq = INITIAL_FETCH_SEQ;
    let mut changes_open = true;

    let initial = tokio::time::timeout(options.fetch_timeout, provider.current_session());
    tokio::pin!(initial);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                debug!("session bootstrapper shutting down");
                break;
            }

            result = &mut initial, if loading.is_some() => {
                let resolution = resolve_initial(result, options.fetch_timeout);
                let authenticated = resolution.user.is_some();
                let role = resolution.role;
                let applied = store.apply(INITIAL_FETCH_SEQ, resolution);
                drop(loading.take());
                info!(authenticated, role = ?role, applied, "initial session resolved");
            }

            change = changes.next(), if changes_open => {
                let Some(change) = change else {
                    debug!("provider closed the session change channel");
                    changes_open = false;
                    continue;
                };
                next_seq += 1;
                let applied = store.apply(next_seq, resolve_session(change.session.as_ref()));
                debug!(kind = ?change.kind, seq = next_seq, applied, "session change applied");
            }
        }
    }
}

/// Keep a pinned identity until shutdown. Provider changes are drained and
/// reported but never reach the store.
async fn hold_fixed_identity(mut changes: SessionSubscription, mut shutdown: oneshot::Receiver<()>) {
    let mut changes_open = true;
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                debug!("session bootstrapper shutting down");
                break;
            }

            change = changes.next(), if changes_open => match change {
                Some(change) => {
                    warn!(kind = ?change.kind, "ignoring session change: development role bypass pins the identity");
                }
                None => changes_open = false,
            },
        }
    }
}

fn resolve_initial(result: Result<Result<Option<Session>, ProviderError>, Elapsed>, timeout: Duration) -> Resolution {
    match result {
        Ok(Ok(session)) => resolve_session(session.as_ref()),
        Ok(Err(e)) => {
            warn!(error = %e, "initial session fetch failed; treating as signed out");
            Resolution::signed_out()
        }
        Err(_) => {
            warn!(timeout = ?timeout, "initial session fetch timed out; treating as signed out");
            Resolution::signed_out()
        }
    }
}

/// Identity and role for a provider session; `None` resolves as signed out.
#[must_use]
pub fn resolve_session(session: Option<&Session>) -> Resolution {
    match session {
        Some(session) => Resolution::signed_in(session.user.clone(), role_from_metadata(&session.user)),
        None => Resolution::signed_out(),
    }
}

/// Role recorded in the user's metadata. Absent or unrecognised roles
/// resolve to [`Role::Student`], the least privileged role.
#[must_use]
pub fn role_from_metadata(user: &SessionUser) -> Role {
    match user.user_metadata.role.as_deref() {
        None => Role::Student,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(user_id = %user.id, error = %e, "unrecognised metadata role; defaulting to student");
            Role::Student
        }),
    }
}
