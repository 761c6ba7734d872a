//! Client-side consistency layer: overlay cache, broadcast bus, cascade
//! invalidation and two-phase autosave.
//!
//! # See also
//! - `crate::client` for the store-facing façades these components call.

pub mod autosave;
pub mod bus;
pub mod cascade;
pub mod session;
pub mod session_cache;
