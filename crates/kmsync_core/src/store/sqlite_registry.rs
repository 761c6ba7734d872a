//! SQLite-backed metadata registry.
//!
//! # Responsibility
//! - Persist one `registry_records` row per `RecordKey`.
//! - Serve filtered, sorted, paginated lists for one entity kind.
//!
//! # Invariants
//! - `upsert` replaces the whole row for its key.
//! - `delete` of an unknown key is a successful no-op.
//! - Read paths reject undecodable rows instead of masking them.

use super::query::{paginate, ListPage, ListRequest};
use super::{lock_connection, RegistryStore, SharedConnection, StoreError, StoreResult};
use crate::model::record::{EntityKind, EntityRecord, RecordKey};
use rusqlite::{params, Row};
use serde_json::{Map, Value};

const RECORD_SELECT_SQL: &str = "SELECT
    entity_type,
    id,
    updated_at,
    fields_json,
    content_ref,
    location_hint
FROM registry_records";

/// Local registry implementation over a shared SQLite connection.
pub struct SqliteRegistryStore {
    conn: SharedConnection,
}

impl SqliteRegistryStore {
    /// Constructs a store from a migrated connection.
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl RegistryStore for SqliteRegistryStore {
    fn list(&self, request: &ListRequest) -> StoreResult<ListPage> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(&format!("{RECORD_SELECT_SQL} WHERE entity_type = ?1;"))?;
        let mut rows = stmt.query([request.kind.as_str()])?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next()? {
            candidates.push(parse_record_row(row)?);
        }

        Ok(paginate(candidates, request))
    }

    fn get(&self, key: &RecordKey) -> StoreResult<Option<EntityRecord>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "{RECORD_SELECT_SQL}
             WHERE entity_type = ?1
               AND id = ?2;"
        ))?;
        let mut rows = stmt.query(params![key.kind.as_str(), key.id.as_str()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(row)?));
        }

        Ok(None)
    }

    fn upsert(&self, record: &EntityRecord) -> StoreResult<()> {
        let fields_json = serde_json::to_string(&record.fields)?;
        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "INSERT INTO registry_records (
                entity_type,
                id,
                updated_at,
                fields_json,
                content_ref,
                location_hint
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (entity_type, id) DO UPDATE SET
                updated_at = excluded.updated_at,
                fields_json = excluded.fields_json,
                content_ref = excluded.content_ref,
                location_hint = excluded.location_hint;",
            params![
                record.kind.as_str(),
                record.id.as_str(),
                record.updated_at,
                fields_json,
                record.content_ref.as_deref(),
                record.location_hint.as_deref(),
            ],
        )?;

        Ok(())
    }

    fn delete(&self, key: &RecordKey) -> StoreResult<()> {
        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "DELETE FROM registry_records
             WHERE entity_type = ?1
               AND id = ?2;",
            params![key.kind.as_str(), key.id.as_str()],
        )?;

        Ok(())
    }
}

fn parse_record_row(row: &Row<'_>) -> StoreResult<EntityRecord> {
    let type_text: String = row.get("entity_type")?;
    let kind = EntityKind::parse(&type_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid entity type `{type_text}` in registry_records.entity_type"
        ))
    })?;

    let id: String = row.get("id")?;
    let fields_text: String = row.get("fields_json")?;
    let fields = match serde_json::from_str::<Value>(&fields_text)? {
        Value::Object(fields) => fields,
        Value::Null => Map::new(),
        other => {
            return Err(StoreError::InvalidData(format!(
                "registry_records.fields_json for `{id}` is not an object: {other}"
            )));
        }
    };

    Ok(EntityRecord {
        kind,
        id,
        updated_at: row.get("updated_at")?,
        fields,
        content_ref: row.get("content_ref")?,
        location_hint: row.get("location_hint")?,
    })
}
