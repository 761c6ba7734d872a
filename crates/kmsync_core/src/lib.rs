//! Client-side sync and consistency core for a knowledge-management app.
//! Keeps registry metadata, content payloads and open views consistent
//! across one user session.

pub mod client;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod store;
pub mod sync;

pub use client::content_client::ContentClient;
pub use client::registry_client::RegistryClient;
pub use config::{ConfigError, SyncConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::payload::ContentPayload;
pub use model::record::{now_epoch_ms, EntityKind, EntityRecord, RecordKey};
pub use store::{
    ContentLocation, ContentStore, FilterPredicate, ListPage, ListRequest, PageLimits,
    RecordFilter, RegistryStore, SortDirection, SortSpec, SqliteContentStore,
    SqliteRegistryStore, StoreError, StoreResult,
};
pub use sync::autosave::{
    execute_commit, AutosaveScheduler, AutosaveStats, CommitOutcome, CommitReport, CommitTicket,
    DraftPhase, PrunedDraft,
};
pub use sync::bus::{BroadcastAction, BroadcastBus, BroadcastMessage, Subscription};
pub use sync::cascade::{CascadeInvalidator, ReferenceEdge, DEFAULT_REFERENCE_EDGES};
pub use sync::session::SyncSession;
pub use sync::session_cache::{CacheStats, OverlayEntry, SessionCache};

/// Minimal health-check API for host integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
