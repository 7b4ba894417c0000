//! Session services: bootstrapping, route guarding, and token upkeep.
//!
//! ARCHITECTURE
//! ============
//! Services own the session-layer behavior so pages and the CLI stay thin
//! consumers of the store and the guard outcome.

pub mod bootstrap;
#[cfg(feature = "dev-role-bypass")]
pub mod dev_bypass;
pub mod guard;
pub mod refresh;
