#![allow(dead_code)]

use kmsync_core::db::open_db_in_memory;
use kmsync_core::store::query::paginate;
use kmsync_core::store::share_connection;
use kmsync_core::{
    BroadcastBus, BroadcastMessage, ContentLocation, ContentPayload, ContentStore, EntityKind,
    EntityRecord, ListPage, ListRequest, RecordKey, RegistryStore, SqliteContentStore,
    SqliteRegistryStore, StoreError, StoreResult, Subscription, SyncConfig, SyncSession,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Ordered log of backing-store calls shared by both recording stores.
pub type CallLog = Arc<Mutex<Vec<String>>>;

fn push(calls: &CallLog, entry: String) {
    calls.lock().unwrap().push(entry);
}

fn injected(operation: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {operation} failure"))
}

/// Registry store that records every call and can fail or lag on demand.
pub struct RecordingRegistry {
    inner: SqliteRegistryStore,
    calls: CallLog,
    fail_upsert: AtomicBool,
    fail_list: AtomicBool,
    unindexed: Mutex<HashSet<RecordKey>>,
}

impl RecordingRegistry {
    pub fn set_fail_upsert(&self, fail: bool) {
        self.fail_upsert.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Keeps `key` out of list results, as a lagging index would.
    pub fn hide_from_list(&self, key: RecordKey) {
        self.unindexed.lock().unwrap().insert(key);
    }

    /// Writes straight to the table without recording a call.
    pub fn seed(&self, record: &EntityRecord) {
        self.inner.upsert(record).unwrap();
    }

    pub fn stored(&self, key: &RecordKey) -> Option<EntityRecord> {
        self.inner.get(key).unwrap()
    }
}

impl RegistryStore for RecordingRegistry {
    fn list(&self, request: &ListRequest) -> StoreResult<ListPage> {
        push(&self.calls, format!("registry.list:{}", request.kind));
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(injected("list"));
        }
        let everything = ListRequest {
            page: 0,
            page_size: 0,
            ..request.clone()
        };
        let hidden = self.unindexed.lock().unwrap();
        let visible: Vec<EntityRecord> = self
            .inner
            .list(&everything)?
            .items
            .into_iter()
            .filter(|record| !hidden.contains(&record.key()))
            .collect();
        Ok(paginate(visible, request))
    }

    fn get(&self, key: &RecordKey) -> StoreResult<Option<EntityRecord>> {
        push(&self.calls, format!("registry.get:{key}"));
        self.inner.get(key)
    }

    fn upsert(&self, record: &EntityRecord) -> StoreResult<()> {
        push(&self.calls, format!("registry.upsert:{}", record.key()));
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(injected("upsert"));
        }
        self.inner.upsert(record)
    }

    fn delete(&self, key: &RecordKey) -> StoreResult<()> {
        push(&self.calls, format!("registry.delete:{key}"));
        self.inner.delete(key)
    }
}

/// Content store that records every call and can fail on demand.
pub struct RecordingContent {
    inner: SqliteContentStore,
    calls: CallLog,
    fail_save: AtomicBool,
    fail_fetch: AtomicBool,
}

impl RecordingContent {
    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Stores a payload without recording a call; returns the minted ref.
    pub fn seed(&self, payload: &ContentPayload) -> String {
        self.inner.save(None, payload, None).unwrap().content_ref
    }

    pub fn stored(&self, content_ref: &str) -> Option<ContentPayload> {
        self.inner.fetch(content_ref, None).unwrap()
    }
}

impl ContentStore for RecordingContent {
    fn fetch(
        &self,
        content_ref: &str,
        location_hint: Option<&str>,
    ) -> StoreResult<Option<ContentPayload>> {
        push(&self.calls, format!("content.fetch:{content_ref}"));
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(injected("fetch"));
        }
        self.inner.fetch(content_ref, location_hint)
    }

    fn save(
        &self,
        content_ref: Option<&str>,
        payload: &ContentPayload,
        location_hint: Option<&str>,
    ) -> StoreResult<ContentLocation> {
        push(
            &self.calls,
            format!("content.save:{}", content_ref.unwrap_or("new")),
        );
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(injected("save"));
        }
        self.inner.save(content_ref, payload, location_hint)
    }
}

/// A session over recording stores sharing one in-memory database.
pub struct Harness {
    pub session: SyncSession,
    pub registry: Arc<RecordingRegistry>,
    pub content: Arc<RecordingContent>,
    pub config: SyncConfig,
    calls: CallLog,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let conn = share_connection(open_db_in_memory().unwrap());
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(RecordingRegistry {
            inner: SqliteRegistryStore::new(Arc::clone(&conn)),
            calls: Arc::clone(&calls),
            fail_upsert: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
            unindexed: Mutex::new(HashSet::new()),
        });
        let content = Arc::new(RecordingContent {
            inner: SqliteContentStore::new(conn),
            calls: Arc::clone(&calls),
            fail_save: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
        });
        let session = SyncSession::new(&config, registry.clone(), content.clone());
        Self {
            session,
            registry,
            content,
            config,
            calls,
        }
    }

    pub fn debounce_ms(&self) -> i64 {
        self.config.autosave_debounce_ms as i64
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

/// Subscribes a recorder to every action on `kind`.
pub fn record_deliveries(
    bus: &BroadcastBus,
    kind: EntityKind,
) -> (Subscription, Arc<Mutex<Vec<BroadcastMessage>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = bus.subscribe(kind, move |message: &BroadcastMessage| {
        sink.lock().unwrap().push(message.clone());
    });
    (subscription, seen)
}
