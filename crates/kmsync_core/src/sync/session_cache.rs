//! Session reconciliation cache: overlay + tombstones over registry reads.
//!
//! # Responsibility
//! - Keep the most recent known-good record per key for the session.
//! - Remember deleted keys so stale registry reads cannot resurrect them.
//! - Remember the last reconciled ("resident") version of every record a view
//!   has been served, so dependents can be found without a network read.
//!
//! # Invariants
//! - A tombstoned key never appears in any reconcile output for the session.
//! - An overlay entry always wins over the registry version of its key.
//! - Overlay writes are last-writer-wins by call order, not server order.
//! - All state sits behind one mutex; callers never hold it across I/O.

use crate::model::record::{now_epoch_ms, EntityKind, EntityRecord, RecordKey};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One overlay entry: the record plus when this session wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEntry {
    pub record: EntityRecord,
    /// Unix epoch milliseconds of the `record_upsert` call.
    pub written_at: i64,
    sequence: u64,
}

/// Point-in-time sizes of the cache, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub overlay_entries: usize,
    pub tombstones: usize,
    pub resident_records: usize,
}

#[derive(Default)]
struct CacheState {
    overlay: HashMap<RecordKey, OverlayEntry>,
    tombstones: HashSet<RecordKey>,
    resident: HashMap<RecordKey, EntityRecord>,
    next_sequence: u64,
}

impl CacheState {
    fn visible(&self, key: &RecordKey) -> Option<EntityRecord> {
        if self.tombstones.contains(key) {
            return None;
        }
        match (self.overlay.get(key), self.resident.get(key)) {
            (Some(entry), Some(resident)) => Some(entry.record.merged_over(resident)),
            (Some(entry), None) => Some(entry.record.clone()),
            (None, resident) => resident.cloned(),
        }
    }
}

/// Process-wide, session-scoped overlay store.
///
/// Clones share state. Created at session start, emptied by [`clear`].
///
/// [`clear`]: SessionCache::clear
#[derive(Clone, Default)]
pub struct SessionCache {
    inner: Arc<Mutex<CacheState>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles one registry result for `kind`.
    ///
    /// Tombstoned items are dropped, overlaid items are merged, server order is
    /// kept, and overlay records the server omitted are placed first (most
    /// recent write first).
    pub fn reconcile(&self, kind: EntityKind, server_items: Vec<EntityRecord>) -> Vec<EntityRecord> {
        self.reconcile_with(kind, server_items, |_| true)
    }

    /// Like [`reconcile`](Self::reconcile), but only injects omitted overlay
    /// records accepted by `include_unseen`.
    pub fn reconcile_with(
        &self,
        kind: EntityKind,
        server_items: Vec<EntityRecord>,
        include_unseen: impl Fn(&EntityRecord) -> bool,
    ) -> Vec<EntityRecord> {
        let mut state = self.lock();
        let server_len = server_items.len();
        let mut seen = HashSet::with_capacity(server_len);
        let mut dropped = 0usize;
        let mut merged = Vec::with_capacity(server_len);

        for item in server_items {
            let key = item.key();
            if state.tombstones.contains(&key) {
                dropped += 1;
                continue;
            }
            let record = match state.overlay.get(&key) {
                Some(entry) => entry.record.merged_over(&item),
                None => item,
            };
            state.resident.insert(key.clone(), record.clone());
            seen.insert(key);
            merged.push(record);
        }

        let mut unseen: Vec<&OverlayEntry> = state
            .overlay
            .iter()
            .filter(|(key, _)| key.kind == kind && !seen.contains(*key))
            .map(|(_, entry)| entry)
            .filter(|entry| include_unseen(&entry.record))
            .collect();
        unseen.sort_by(|left, right| right.sequence.cmp(&left.sequence));

        let injected = unseen.len();
        let mut output: Vec<EntityRecord> = unseen
            .into_iter()
            .map(|entry| entry.record.clone())
            .collect();
        output.extend(merged);

        debug!(
            "event=cache_reconcile module=sync status=ok kind={} server_items={} dropped={} injected={} output={}",
            kind,
            server_len,
            dropped,
            injected,
            output.len()
        );
        output
    }

    /// Resolves one registry read for a detail view.
    pub fn resolve(&self, key: &RecordKey, server: Option<EntityRecord>) -> Option<EntityRecord> {
        let mut state = self.lock();
        if state.tombstones.contains(key) {
            return None;
        }
        if let Some(server) = server {
            let record = match state.overlay.get(key) {
                Some(entry) => entry.record.merged_over(&server),
                None => server,
            };
            state.resident.insert(key.clone(), record.clone());
            return Some(record);
        }
        state.visible(key)
    }

    /// Writes or overwrites the overlay entry for `record`.
    ///
    /// Ignored for tombstoned keys: deleted records are never resurrected.
    pub fn record_upsert(&self, record: EntityRecord) {
        let key = record.key();
        let mut state = self.lock();
        if state.tombstones.contains(&key) {
            warn!(
                "event=tombstone_ignored_upsert module=sync status=ignored kind={} id={}",
                key.kind, key.id
            );
            return;
        }

        state.next_sequence += 1;
        let sequence = state.next_sequence;
        if let Some(resident) = state.resident.get_mut(&key) {
            *resident = record.merged_over(resident);
        }
        state.overlay.insert(
            key,
            OverlayEntry {
                record,
                written_at: now_epoch_ms(),
                sequence,
            },
        );
    }

    /// Tombstones `key` for the rest of the session.
    pub fn record_delete(&self, key: &RecordKey) {
        let mut state = self.lock();
        state.overlay.remove(key);
        state.resident.remove(key);
        state.tombstones.insert(key.clone());
    }

    /// Current view of one record without touching the registry.
    pub fn get(&self, key: &RecordKey) -> Option<EntityRecord> {
        self.lock().visible(key)
    }

    pub fn overlay_entry(&self, key: &RecordKey) -> Option<OverlayEntry> {
        self.lock().overlay.get(key).cloned()
    }

    pub fn is_tombstoned(&self, key: &RecordKey) -> bool {
        self.lock().tombstones.contains(key)
    }

    /// Every record of `kind` this session holds, overlay merged over resident.
    pub fn held_records(&self, kind: EntityKind) -> Vec<EntityRecord> {
        let state = self.lock();
        let keys: HashSet<&RecordKey> = state
            .overlay
            .keys()
            .chain(state.resident.keys())
            .filter(|key| key.kind == kind)
            .collect();

        let mut records: Vec<EntityRecord> =
            keys.into_iter().filter_map(|key| state.visible(key)).collect();
        records.sort_by(|left, right| left.id.cmp(&right.id));
        records
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            overlay_entries: state.overlay.len(),
            tombstones: state.tombstones.len(),
            resident_records: state.resident.len(),
        }
    }

    /// Ends the session: drops overlay, tombstones and resident records.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.overlay.clear();
        state.tombstones.clear();
        state.resident.clear();
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
