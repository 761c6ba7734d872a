//! Failure-absorbing façades over the backing stores.
//!
//! # Responsibility
//! - Turn typed store errors into the success signals the sync layer folds
//!   into entity state (`bool`, empty page, `None`).
//! - Emit one metadata-only log event per backing-store call.
//!
//! # Invariants
//! - No store error escapes `RegistryClient`; `ContentClient::save` is the
//!   only call that hands an error back, so phase one can stop phase two.

pub mod content_client;
pub mod registry_client;
