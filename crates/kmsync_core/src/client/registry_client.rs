//! Paginated CRUD façade over the metadata registry.
//!
//! # Invariants
//! - `list` never returns an error: failures yield an empty page.
//! - `upsert`/`delete` return `false` when the write is not yet durable;
//!   callers keep their optimistic copy authoritative in that case.

use crate::model::record::{EntityRecord, RecordKey};
use crate::store::{ListPage, ListRequest, PageLimits, RegistryStore};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Instant;

/// Registry client shared by list views, the autosave pipeline and the session.
#[derive(Clone)]
pub struct RegistryClient {
    store: Arc<dyn RegistryStore>,
    limits: PageLimits,
}

impl RegistryClient {
    pub fn new(store: Arc<dyn RegistryStore>, limits: PageLimits) -> Self {
        Self { store, limits }
    }

    pub fn page_limits(&self) -> PageLimits {
        self.limits
    }

    /// Lists one page with a normalized page size.
    pub fn list(&self, request: &ListRequest) -> ListPage {
        let started_at = Instant::now();
        let mut normalized = request.clone();
        normalized.page_size = self.limits.normalize(request.page_size);

        match self.store.list(&normalized) {
            Ok(page) => {
                debug!(
                    "event=registry_list module=client status=ok kind={} page={} page_size={} items={} total={} duration_ms={}",
                    normalized.kind,
                    normalized.page,
                    normalized.page_size,
                    page.items.len(),
                    page.total,
                    started_at.elapsed().as_millis()
                );
                page
            }
            Err(err) => {
                warn!(
                    "event=registry_list module=client status=error kind={} page={} duration_ms={} error={}",
                    normalized.kind,
                    normalized.page,
                    started_at.elapsed().as_millis(),
                    err
                );
                ListPage::empty()
            }
        }
    }

    /// Reads one record. Failures are logged and read as absent.
    pub fn get(&self, key: &RecordKey) -> Option<EntityRecord> {
        let started_at = Instant::now();
        match self.store.get(key) {
            Ok(record) => {
                debug!(
                    "event=registry_get module=client status=ok kind={} id={} found={} duration_ms={}",
                    key.kind,
                    key.id,
                    record.is_some(),
                    started_at.elapsed().as_millis()
                );
                record
            }
            Err(err) => {
                warn!(
                    "event=registry_get module=client status=error kind={} id={} duration_ms={} error={}",
                    key.kind,
                    key.id,
                    started_at.elapsed().as_millis(),
                    err
                );
                None
            }
        }
    }

    /// Inserts or replaces one record. Returns whether the write is durable.
    pub fn upsert(&self, record: &EntityRecord) -> bool {
        let started_at = Instant::now();
        match self.store.upsert(record) {
            Ok(()) => {
                debug!(
                    "event=registry_upsert module=client status=ok kind={} id={} duration_ms={}",
                    record.kind,
                    record.id,
                    started_at.elapsed().as_millis()
                );
                true
            }
            Err(err) => {
                warn!(
                    "event=registry_upsert module=client status=error kind={} id={} duration_ms={} error={}",
                    record.kind,
                    record.id,
                    started_at.elapsed().as_millis(),
                    err
                );
                false
            }
        }
    }

    /// Deletes one record. Unknown ids succeed.
    pub fn delete(&self, key: &RecordKey) -> bool {
        let started_at = Instant::now();
        match self.store.delete(key) {
            Ok(()) => {
                debug!(
                    "event=registry_delete module=client status=ok kind={} id={} duration_ms={}",
                    key.kind,
                    key.id,
                    started_at.elapsed().as_millis()
                );
                true
            }
            Err(err) => {
                warn!(
                    "event=registry_delete module=client status=error kind={} id={} duration_ms={} error={}",
                    key.kind,
                    key.id,
                    started_at.elapsed().as_millis(),
                    err
                );
                false
            }
        }
    }
}
