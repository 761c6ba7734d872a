//! Session façade wiring clients, cache, bus, cascade and autosave.
//!
//! # Responsibility
//! - Serve list/detail reads through the reconciliation cache.
//! - Apply local writes and deletes optimistically, broadcast them, then
//!   persist them.
//! - Drive editors from hydration through two-phase autosave commits.
//!
//! # Invariants
//! - Every local mutation reaches the cache before it is broadcast, so a
//!   subscriber re-reading the cache sees the new state.
//! - Deleting a record closes its editor and tombstones the key before any
//!   network call.
//! - Editors whose content fetch failed stay in `Loading` and never autosave.
//! - A delete removes its markers from open drafts as well as from cached
//!   holders; no other draft field is touched.

use crate::client::content_client::ContentClient;
use crate::client::registry_client::RegistryClient;
use crate::config::SyncConfig;
use crate::db::{open_db_in_memory, DbResult};
use crate::model::payload::ContentPayload;
use crate::model::record::{now_epoch_ms, EntityRecord, RecordKey};
use crate::store::{
    share_connection, ContentStore, ListPage, ListRequest, RegistryStore, SqliteContentStore,
    SqliteRegistryStore,
};
use crate::sync::autosave::{
    execute_commit, AutosaveScheduler, AutosaveStats, CommitReport, CommitTicket, DraftPhase,
};
use crate::sync::bus::BroadcastBus;
use crate::sync::cascade::{CascadeInvalidator, ReferenceEdge, DEFAULT_REFERENCE_EDGES};
use crate::sync::session_cache::{CacheStats, SessionCache};
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// One user session over a registry and a content store.
pub struct SyncSession {
    registry: RegistryClient,
    content: ContentClient,
    cache: SessionCache,
    bus: BroadcastBus,
    cascade: CascadeInvalidator,
    autosave: AutosaveScheduler,
}

impl SyncSession {
    /// Builds a session using [`DEFAULT_REFERENCE_EDGES`].
    ///
    /// `config` is expected to have passed [`SyncConfig::validate`].
    pub fn new(
        config: &SyncConfig,
        registry_store: Arc<dyn RegistryStore>,
        content_store: Arc<dyn ContentStore>,
    ) -> Self {
        Self::with_edges(config, registry_store, content_store, DEFAULT_REFERENCE_EDGES)
    }

    pub fn with_edges(
        config: &SyncConfig,
        registry_store: Arc<dyn RegistryStore>,
        content_store: Arc<dyn ContentStore>,
        edges: &[ReferenceEdge],
    ) -> Self {
        let cache = SessionCache::new();
        let bus = BroadcastBus::new();
        let cascade = CascadeInvalidator::attach(&bus, &cache, edges);
        info!(
            "event=session_start module=sync status=ok debounce_ms={} edges={}",
            config.autosave_debounce_ms,
            edges.len()
        );
        Self {
            registry: RegistryClient::new(registry_store, config.page_limits()),
            content: ContentClient::new(content_store),
            cache,
            bus,
            cascade,
            autosave: AutosaveScheduler::new(config.autosave_debounce_ms),
        }
    }

    /// Session over fresh in-memory SQLite registry and content stores.
    ///
    /// # Errors
    /// - Any [`crate::db::DbError`] raised while opening or migrating.
    pub fn open_in_memory(config: &SyncConfig) -> DbResult<Self> {
        let conn = share_connection(open_db_in_memory()?);
        Ok(Self::new(
            config,
            Arc::new(SqliteRegistryStore::new(Arc::clone(&conn))),
            Arc::new(SqliteContentStore::new(conn)),
        ))
    }

    pub fn bus(&self) -> &BroadcastBus {
        &self.bus
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn content(&self) -> &ContentClient {
        &self.content
    }

    /// Lists one page, reconciled against the session overlay.
    ///
    /// Records written this session that the registry has not indexed yet are
    /// prepended on page 0 only, and only when they match the filter.
    pub fn list(&self, request: &ListRequest) -> ListPage {
        let page = self.registry.list(request);
        let served = page.items.len();
        let first_page = request.page == 0;
        let filter = &request.filter;
        let items = self.cache.reconcile_with(request.kind, page.items, |record| {
            first_page && filter.matches(record)
        });
        let delta = i64::try_from(items.len()).unwrap_or(i64::MAX)
            - i64::try_from(served).unwrap_or(i64::MAX);
        ListPage {
            total: page.total.saturating_add_signed(delta),
            items,
        }
    }

    /// Reads one record for a detail view.
    ///
    /// Keys with an overlay entry are answered from the cache without a
    /// registry read.
    pub fn read(&self, key: &RecordKey) -> Option<EntityRecord> {
        if self.cache.is_tombstoned(key) {
            return None;
        }
        if self.cache.overlay_entry(key).is_some() {
            return self.cache.get(key);
        }
        let server = self.registry.get(key);
        self.cache.resolve(key, server)
    }

    /// Writes a record outside an editor: cache, broadcast, then registry.
    ///
    /// Returns the registry success signal; `false` without side effects for
    /// deleted keys.
    pub fn write(&mut self, record: EntityRecord) -> bool {
        let key = record.key();
        if self.cache.is_tombstoned(&key) {
            warn!(
                "event=session_write module=sync status=ignored reason=tombstoned kind={} id={}",
                key.kind, key.id
            );
            return false;
        }

        self.cache.record_upsert(record.clone());
        self.autosave.apply_external_fields(&record);
        let visible = self.cache.get(&key).unwrap_or(record);
        self.bus.publish_upsert(visible.clone());
        self.registry.upsert(&visible)
    }

    /// Deletes a record for the rest of the session.
    ///
    /// Dependents pruned by the cascade are persisted after the registry
    /// delete. Open drafts lose the deleted markers in place; a clean draft
    /// the cache does not hold is written through like any other holder, a
    /// dirty one carries the prune in its next commit. Returns the registry
    /// delete's success signal.
    pub fn delete(&mut self, key: &RecordKey) -> bool {
        self.autosave.close(key);
        self.cache.record_delete(key);
        self.bus.publish_delete(key.clone());
        let deleted = self.registry.delete(key);

        let mut persisted = HashSet::new();
        for parent in self.cascade.take_pruned() {
            self.persist_pruned(&parent, key);
            persisted.insert(parent.key());
        }

        let drafts = self
            .autosave
            .prune_references(self.cascade.edges(), key, now_epoch_ms());
        for draft in drafts {
            if draft.dirty || persisted.contains(&draft.record.key()) {
                continue;
            }
            self.cache.record_upsert(draft.record.clone());
            self.bus.publish_upsert(draft.record.clone());
            self.persist_pruned(&draft.record, key);
        }
        deleted
    }

    /// Opens an editor and hydrates its content.
    ///
    /// Returns `None` for deleted keys. An editor that is already open keeps
    /// its current state.
    pub fn open_editor(&mut self, record: EntityRecord) -> Option<DraftPhase> {
        let key = record.key();
        if self.cache.is_tombstoned(&key) {
            return None;
        }
        if !self.autosave.open(record) {
            return self.autosave.phase(&key);
        }
        self.hydrate_editor(&key)
    }

    /// Retries hydration for an editor still in `Loading`.
    pub fn hydrate_editor(&mut self, key: &RecordKey) -> Option<DraftPhase> {
        let (content_ref, hint) = {
            let draft = self.autosave.draft(key)?;
            (draft.content_ref.clone(), draft.location_hint.clone())
        };
        if self.autosave.phase(key) != Some(DraftPhase::Loading) {
            return self.autosave.phase(key);
        }

        match content_ref {
            None => {
                self.autosave.hydrate(key, None);
            }
            Some(content_ref) => {
                match self.content.fetch(&content_ref, hint.as_deref()) {
                    Some(payload) => {
                        self.autosave.hydrate(key, Some(payload));
                    }
                    None => warn!(
                        "event=editor_hydrate module=sync status=pending kind={} id={} content_ref={}",
                        key.kind, key.id, content_ref
                    ),
                }
            }
        }
        self.autosave.phase(key)
    }

    pub fn edit_payload(&mut self, key: &RecordKey, payload: ContentPayload, now_ms: i64) -> bool {
        self.autosave.edit_payload(key, payload, now_ms)
    }

    pub fn edit_metadata(
        &mut self,
        key: &RecordKey,
        update: impl FnOnce(&mut EntityRecord),
        now_ms: i64,
    ) -> bool {
        self.autosave.edit_metadata(key, update, now_ms)
    }

    /// Commits every editor whose debounce window has elapsed.
    pub fn run_due(&mut self, now_ms: i64) -> Vec<CommitReport> {
        self.autosave
            .due_commits(now_ms)
            .into_iter()
            .map(|ticket| self.commit(ticket))
            .collect()
    }

    /// Commits one editor immediately, e.g. on navigation away.
    pub fn flush(&mut self, key: &RecordKey, now_ms: i64) -> Option<CommitReport> {
        let ticket = self.autosave.flush(key, now_ms)?;
        Some(self.commit(ticket))
    }

    /// Closes an editor. Returns whether uncommitted edits were discarded.
    pub fn close_editor(&mut self, key: &RecordKey) -> bool {
        self.autosave.close(key)
    }

    pub fn editor_phase(&self, key: &RecordKey) -> Option<DraftPhase> {
        self.autosave.phase(key)
    }

    pub fn editor_draft(&self, key: &RecordKey) -> Option<&EntityRecord> {
        self.autosave.draft(key)
    }

    pub fn next_due_at(&self) -> Option<i64> {
        self.autosave.next_due_at()
    }

    pub fn autosave_stats(&self) -> AutosaveStats {
        self.autosave.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Ends the session: closes editors and drops overlay and tombstones.
    pub fn end(&mut self) {
        let unsaved = self.autosave.close_all();
        let stats = self.autosave.stats();
        self.cache.clear();
        info!(
            "event=session_end module=sync status=ok unsaved_editors={} commits={} suppressed={} failures={} superseded={}",
            unsaved.len(),
            stats.commits,
            stats.suppressed,
            stats.failures,
            stats.superseded
        );
    }

    fn persist_pruned(&self, holder: &EntityRecord, deleted: &RecordKey) {
        if !self.registry.upsert(holder) {
            warn!(
                "event=cascade_persist module=sync status=error kind={} id={} deleted_id={}",
                holder.kind, holder.id, deleted.id
            );
        }
    }

    fn commit(&mut self, ticket: CommitTicket) -> CommitReport {
        let outcome = execute_commit(&ticket, &self.content, &self.registry);
        let report = self.autosave.complete(&ticket, outcome);
        if let CommitReport::Committed(record) = &report {
            let key = record.key();
            self.cache.record_upsert(record.clone());
            if let Some(visible) = self.cache.get(&key) {
                self.bus.publish_upsert(visible);
            }
        }
        report
    }
}
