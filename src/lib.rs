//! Session and role synchronization for the academic portal.
//!
//! ARCHITECTURE
//! ============
//! Data flows one way: the session bootstrapper reads the hosted auth
//! provider and writes the [`state::store::AuthStore`]; any number of route
//! guards read snapshots from the store and decide whether a page renders,
//! waits, or redirects. Guards never write back.

pub mod config;
pub mod provider;
pub mod routes;
pub mod services;
pub mod state;

pub use config::PortalConfig;
pub use provider::{AuthProvider, ProviderError, Session, SessionUser};
pub use services::bootstrap::{BootstrapHandle, BootstrapOptions, spawn_bootstrapper};
pub use services::guard::{AccessPolicy, GuardOutcome, RouteGuard, evaluate};
pub use state::auth::{AuthState, Role};
pub use state::store::AuthStore;
