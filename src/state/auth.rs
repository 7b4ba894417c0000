//! Auth-session state for the current portal user.
//!
//! SYSTEM CONTEXT
//! ==============
//! Read by route guards and role-aware views to coordinate login redirects
//! and role-dependent landing pages. Written only by the session
//! bootstrapper through [`crate::state::store::AuthStore`].

#[cfg(test)]
#[path = "auth_test.rs"]
mod auth_test;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::SessionUser;

/// Portal role. Determines which dashboard a user lands on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Faculty,
    Superadmin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Student, Role::Faculty, Role::Superadmin];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Faculty => "faculty",
            Self::Superadmin => "superadmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "faculty" => Ok(Self::Faculty),
            "superadmin" => Ok(Self::Superadmin),
            _ => Err(UnknownRole(s.to_owned())),
        }
    }
}

/// Authentication state tracking the current user, role, and loading status.
///
/// `revision` is the sequence number of the last bootstrapper resolution
/// applied to this state; `0` means nothing has been resolved yet.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuthState {
    pub user: Option<SessionUser>,
    pub role: Option<Role>,
    pub loading: bool,
    pub revision: u64,
}

impl AuthState {
    /// Id of the signed-in user, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.id)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

impl Default for AuthState {
    /// Process-start state: nothing resolved yet, so guards must wait.
    fn default() -> Self {
        Self { user: None, role: None, loading: true, revision: 0 }
    }
}
