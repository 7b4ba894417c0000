//! Client-side session state: the identity snapshot and its owning store.

pub mod auth;
pub mod store;
