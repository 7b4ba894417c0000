//! Development-only role bypass.
//!
//! Compiled in only with the `dev-role-bypass` feature. When
//! `PORTAL_DEV_ROLE` names a role, the bootstrapper seeds a synthetic
//! identity with that role and never asks the provider. The identity stays
//! pinned for the life of the bootstrapper: provider session changes,
//! sign-out included, are logged and ignored. Nothing here is verified, so
//! release builds must not enable the feature.

#[cfg(test)]
#[path = "dev_bypass_test.rs"]
mod dev_bypass_test;

use tracing::warn;
use uuid::Uuid;

use crate::provider::{SessionUser, UserMetadata};
use crate::state::auth::Role;
use crate::state::store::Resolution;

pub const DEV_ROLE_VAR: &str = "PORTAL_DEV_ROLE";

/// Synthetic resolution from `PORTAL_DEV_ROLE`, if set to a known role.
#[must_use]
pub fn resolution_from_env() -> Option<Resolution> {
    let Ok(raw) = std::env::var(DEV_ROLE_VAR) else {
        return None;
    };
    resolution_for(&raw)
}

/// Synthetic resolution for the role named by `raw`.
#[must_use]
pub fn resolution_for(raw: &str) -> Option<Resolution> {
    let role = match raw.parse::<Role>() {
        Ok(role) => role,
        Err(e) => {
            warn!(error = %e, var = DEV_ROLE_VAR, "ignoring development role bypass");
            return None;
        }
    };
    warn!(%role, "DEVELOPMENT ROLE BYPASS ACTIVE: provider verification skipped");
    let user = SessionUser {
        id: Uuid::nil(),
        email: Some("dev@localhost".to_owned()),
        user_metadata: UserMetadata { role: Some(role.as_str().to_owned()), full_name: Some("Development User".to_owned()) },
    };
    Some(Resolution::signed_in(user, role))
}
