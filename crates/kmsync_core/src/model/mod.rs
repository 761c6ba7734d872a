//! Entity and payload model shared by every sync component.
//!
//! # Responsibility
//! - Define the metadata record shape used by registry, cache, bus and views.
//! - Define the content payload held by the content store.
//!
//! # Invariants
//! - Every record is addressed by `RecordKey { kind, id }`.
//! - Records carry content by reference only.

pub mod payload;
pub mod record;
