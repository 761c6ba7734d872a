//! SQLite-backed content store.
//!
//! # Invariants
//! - A minted `content_ref` is a fresh v4 UUID and is never reused.
//! - Saving under an existing ref overwrites the payload in place.
//! - A failed save leaves the previous payload untouched (single statement).

use super::{lock_connection, ContentLocation, ContentStore, SharedConnection, StoreResult};
use crate::model::payload::ContentPayload;
use crate::model::record::now_epoch_ms;
use rusqlite::params;
use rusqlite::OptionalExtension;
use uuid::Uuid;

/// Location hint reported for objects held by this store.
pub const LOCAL_LOCATION_HINT: &str = "local";

/// Local content store implementation over a shared SQLite connection.
pub struct SqliteContentStore {
    conn: SharedConnection,
}

impl SqliteContentStore {
    /// Constructs a store from a migrated connection.
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl ContentStore for SqliteContentStore {
    fn fetch(
        &self,
        content_ref: &str,
        _location_hint: Option<&str>,
    ) -> StoreResult<Option<ContentPayload>> {
        let conn = lock_connection(&self.conn)?;
        let payload_text: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM content_objects WHERE content_ref = ?1;",
                [content_ref],
                |row| row.get(0),
            )
            .optional()?;

        match payload_text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn save(
        &self,
        content_ref: Option<&str>,
        payload: &ContentPayload,
        location_hint: Option<&str>,
    ) -> StoreResult<ContentLocation> {
        let payload_text = serde_json::to_string(payload)?;
        let content_ref = match content_ref {
            Some(existing) => existing.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let location_hint = location_hint.unwrap_or(LOCAL_LOCATION_HINT).to_string();

        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "INSERT INTO content_objects (
                content_ref,
                location_hint,
                payload_json,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (content_ref) DO UPDATE SET
                location_hint = excluded.location_hint,
                payload_json = excluded.payload_json,
                updated_at = excluded.updated_at;",
            params![
                content_ref.as_str(),
                location_hint.as_str(),
                payload_text,
                now_epoch_ms(),
            ],
        )?;

        Ok(ContentLocation {
            content_ref,
            location_hint: Some(location_hint),
        })
    }
}
