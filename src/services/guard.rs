//! Route guards: one access policy shared by every protected page.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every protected route applies identical redirect behavior: wait while the
//! session is loading, send anonymous visitors to `/login`, and send users
//! with the wrong role to their own dashboard. Pages declare an
//! [`AccessPolicy`] and consume the [`GuardOutcome`]; none re-implement the
//! checks.
//!
//! DESIGN
//! ======
//! [`evaluate`] is a pure function of one snapshot. [`RouteGuard`] wraps it
//! in the per-page state machine `Loading -> {Authorized, Redirecting}` and
//! can be driven from a store subscription. `Redirecting` is terminal, so a
//! guard navigates at most once.

#[cfg(test)]
#[path = "guard_test.rs"]
mod guard_test;

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::provider::AuthProvider;
use crate::state::auth::{AuthState, Role};
use crate::state::store::AuthStore;

pub const LOGIN_ROUTE: &str = "/login";
pub const DASHBOARD_ROUTE: &str = "/dashboard";

// =============================================================================
// POLICY
// =============================================================================

/// Who may see a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Rendered for everyone, even while the session is loading.
    Public,
    /// Any signed-in user, whatever their role.
    Authenticated,
    /// Signed-in users holding one of these roles.
    Roles(Vec<Role>),
}

impl AccessPolicy {
    /// Role-restricted policy. An empty list means any signed-in user.
    #[must_use]
    pub fn roles(roles: &[Role]) -> Self {
        if roles.is_empty() { Self::Authenticated } else { Self::Roles(roles.to_vec()) }
    }

    /// Whether a signed-in user holding `role` passes this policy.
    #[must_use]
    pub fn allows(&self, role: Option<Role>) -> bool {
        match self {
            Self::Public | Self::Authenticated => true,
            Self::Roles(allowed) => role.is_some_and(|r| allowed.contains(&r)),
        }
    }
}

/// Result of evaluating a policy against one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Session not resolved yet: show a waiting state, do not navigate.
    Loading,
    /// Render the protected content.
    Authorized,
    /// Navigate away to the contained route.
    Redirect(String),
}

/// Dashboard a user with `role` lands on; the generic dashboard without one.
#[must_use]
pub fn landing_route(role: Option<Role>) -> String {
    match role {
        Some(role) => format!("{DASHBOARD_ROUTE}/{role}"),
        None => DASHBOARD_ROUTE.to_owned(),
    }
}

/// Apply `policy` to `state`.
#[must_use]
pub fn evaluate(state: &AuthState, policy: &AccessPolicy) -> GuardOutcome {
    if *policy == AccessPolicy::Public {
        return GuardOutcome::Authorized;
    }
    if state.loading {
        return GuardOutcome::Loading;
    }
    if state.user.is_none() {
        return GuardOutcome::Redirect(LOGIN_ROUTE.to_owned());
    }
    if !policy.allows(state.role) {
        return GuardOutcome::Redirect(landing_route(state.role));
    }
    GuardOutcome::Authorized
}

/// [`evaluate`], then confirm the role against the user's profile record.
///
/// Only role-restricted policies trigger the lookup. A failed, timed-out,
/// or empty lookup fails closed to the generic dashboard; a profile role
/// that the policy rejects redirects to that role's dashboard.
pub async fn evaluate_verified(
    provider: &dyn AuthProvider,
    state: &AuthState,
    policy: &AccessPolicy,
    timeout: Duration,
) -> GuardOutcome {
    let outcome = evaluate(state, policy);
    if outcome != GuardOutcome::Authorized || !matches!(policy, AccessPolicy::Roles(_)) {
        return outcome;
    }
    let Some(user_id) = state.user_id() else {
        return GuardOutcome::Redirect(LOGIN_ROUTE.to_owned());
    };

    match tokio::time::timeout(timeout, provider.user_role(user_id)).await {
        Ok(Ok(Some(role))) if policy.allows(Some(role)) => GuardOutcome::Authorized,
        Ok(Ok(Some(role))) => {
            debug!(%user_id, %role, "profile role rejected by route policy");
            GuardOutcome::Redirect(landing_route(Some(role)))
        }
        Ok(Ok(None)) => {
            warn!(%user_id, "no profile role on record; failing closed");
            GuardOutcome::Redirect(DASHBOARD_ROUTE.to_owned())
        }
        Ok(Err(e)) => {
            warn!(%user_id, error = %e, "profile role lookup failed; failing closed");
            GuardOutcome::Redirect(DASHBOARD_ROUTE.to_owned())
        }
        Err(_) => {
            warn!(%user_id, ?timeout, "profile role lookup timed out; failing closed");
            GuardOutcome::Redirect(DASHBOARD_ROUTE.to_owned())
        }
    }
}

// =============================================================================
// PER-PAGE STATE MACHINE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    Loading,
    Authorized,
    Redirecting,
}

/// Receives redirect requests from a guard.
pub trait Navigator {
    fn navigate(&self, target: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str),
{
    fn navigate(&self, target: &str) {
        self(target);
    }
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    policy: AccessPolicy,
    phase: GuardPhase,
}

impl RouteGuard {
    #[must_use]
    pub fn new(policy: AccessPolicy) -> Self {
        Self { policy, phase: GuardPhase::Loading }
    }

    #[must_use]
    pub fn phase(&self) -> GuardPhase {
        self.phase
    }

    /// Feed one snapshot. Returns the redirect target on the transition into
    /// `Redirecting`; once there, further snapshots are ignored.
    pub fn observe(&mut self, state: &AuthState) -> Option<String> {
        if self.phase == GuardPhase::Redirecting {
            return None;
        }
        match evaluate(state, &self.policy) {
            GuardOutcome::Loading => {
                self.phase = GuardPhase::Loading;
                None
            }
            GuardOutcome::Authorized => {
                self.phase = GuardPhase::Authorized;
                None
            }
            GuardOutcome::Redirect(target) => {
                self.phase = GuardPhase::Redirecting;
                Some(target)
            }
        }
    }

    /// Re-evaluate on every store change until the guard redirects or the
    /// store goes away. Returns the final phase.
    pub async fn run<N: Navigator>(mut self, mut rx: watch::Receiver<AuthState>, navigator: N) -> GuardPhase {
        loop {
            let state = rx.borrow_and_update().clone();
            if let Some(target) = self.observe(&state) {
                info!(%target, policy = ?self.policy, "route guard redirecting");
                navigator.navigate(&target);
                return GuardPhase::Redirecting;
            }
            if rx.changed().await.is_err() {
                return self.phase;
            }
        }
    }
}

/// Spawn a guard that follows `store` and calls `navigator` at most once.
pub fn install_route_guard<N>(store: &AuthStore, policy: AccessPolicy, navigator: N) -> JoinHandle<GuardPhase>
where
    N: Navigator + Send + 'static,
{
    let rx = store.subscribe();
    tokio::spawn(RouteGuard::new(policy).run(rx, navigator))
}
