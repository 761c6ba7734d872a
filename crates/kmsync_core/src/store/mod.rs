//! Backing-store contracts and the local SQLite implementations.
//!
//! # Responsibility
//! - Define the registry and content store collaborator traits.
//! - Keep transport/storage failures typed at this boundary; the clients in
//!   `crate::client` fold them into success signals.
//!
//! # Invariants
//! - `RegistryStore::upsert` is idempotent on `RecordKey`.
//! - `RegistryStore::delete` succeeds for unknown keys.
//! - `ContentStore::save` either returns a stable location or writes nothing
//!   the caller can observe.

use crate::db::DbError;
use crate::model::payload::ContentPayload;
use crate::model::record::{EntityRecord, RecordKey};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod query;
pub mod sqlite_content;
pub mod sqlite_registry;

pub use query::{
    FilterPredicate, ListPage, ListRequest, PageLimits, RecordFilter, SortDirection, SortSpec,
};

pub use sqlite_content::SqliteContentStore;
pub use sqlite_registry::SqliteRegistryStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// One SQLite connection shared by the local registry and content stores.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Wraps a migrated connection for sharing between local stores.
pub fn share_connection(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}

fn lock_connection(conn: &SharedConnection) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
}

/// Failure raised by a registry or content backing store.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// Store could not be reached or refused the call.
    Unavailable(String),
    /// Stored data could not be decoded into the domain model.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Unavailable(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Db(DbError::Json(value))
    }
}

/// Where a saved content payload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLocation {
    pub content_ref: String,
    pub location_hint: Option<String>,
}

/// Metadata registry collaborator: one small row per entity.
///
/// Implementations may be eventually consistent: a `list` right after an
/// `upsert` is allowed to miss it.
pub trait RegistryStore: Send + Sync {
    fn list(&self, request: &ListRequest) -> StoreResult<ListPage>;
    fn get(&self, key: &RecordKey) -> StoreResult<Option<EntityRecord>>;
    fn upsert(&self, record: &EntityRecord) -> StoreResult<()>;
    fn delete(&self, key: &RecordKey) -> StoreResult<()>;
}

/// Content/blob store collaborator addressed by opaque references.
pub trait ContentStore: Send + Sync {
    /// Returns `Ok(None)` when nothing is stored under `content_ref`.
    fn fetch(
        &self,
        content_ref: &str,
        location_hint: Option<&str>,
    ) -> StoreResult<Option<ContentPayload>>;

    /// Creates a new object when `content_ref` is `None`, otherwise
    /// overwrites the object in place.
    fn save(
        &self,
        content_ref: Option<&str>,
        payload: &ContentPayload,
        location_hint: Option<&str>,
    ) -> StoreResult<ContentLocation>;
}
