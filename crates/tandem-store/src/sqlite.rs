//! `SQLite` persistence layer.

use crate::content::SqliteContentStore;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tandem_core::history::{ChangeType, DocumentVersion, FieldChange, VersionRecord};
use tandem_core::store::{
    PendingOperationStore, ResolutionStore, SnapshotStore, VersionVectorStore,
};
use tandem_core::{
    ConflictResolution, Error, Operation, ResourceHandlers, ResourceKey, ResourceType, Result,
    VersionVector,
};
use uuid::Uuid;

/// `SQLite`-backed store for version vectors, the pending log, document
/// versions, and resolutions.
///
/// Content stores handed out by [`SqliteStore::content_store`] share the same
/// connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the database cannot be opened or
    /// initialized.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(unavailable)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn).map_err(unavailable)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Content store for one resource type, backed by this database.
    #[must_use]
    pub fn content_store(&self, resource_type: ResourceType) -> SqliteContentStore {
        SqliteContentStore::new(self.conn.clone(), resource_type)
    }

    /// Content stores for every resource type.
    #[must_use]
    pub fn handlers(&self) -> ResourceHandlers {
        ResourceHandlers::new(
            Arc::new(self.content_store(ResourceType::Task)),
            Arc::new(self.content_store(ResourceType::Project)),
            Arc::new(self.content_store(ResourceType::Comment)),
        )
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }
}

/// Initialize database schema.
fn init_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        r"
        -- Live edit ordering per resource
        CREATE TABLE IF NOT EXISTS version_vectors (
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            last_modified TEXT NOT NULL,
            last_modified_by TEXT NOT NULL,
            PRIMARY KEY (resource_type, resource_id)
        );

        -- Accepted operations awaiting commit
        CREATE TABLE IF NOT EXISTS pending_operations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            op_id TEXT NOT NULL,
            op_bytes BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_pending_resource
            ON pending_operations(resource_type, resource_id);

        -- Immutable document snapshots
        CREATE TABLE IF NOT EXISTS document_versions (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            version_number INTEGER NOT NULL,
            content TEXT NOT NULL,
            summary TEXT,
            author TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(entity_type, entity_id, version_number)
        );

        -- Field-level diff of each snapshot against its predecessor
        CREATE TABLE IF NOT EXISTS version_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version_id TEXT NOT NULL REFERENCES document_versions(id),
            field_name TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT,
            change_type TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_version_changes_version
            ON version_changes(version_id);

        -- Resolution audit trail
        CREATE TABLE IF NOT EXISTS conflict_resolutions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            resolution_bytes BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Resource bodies, one row per (type, id)
        CREATE TABLE IF NOT EXISTS resource_content (
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            content TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (resource_type, resource_id)
        );
        ",
    )
}

impl VersionVectorStore for SqliteStore {
    fn load_vector(&self, resource: &ResourceKey) -> Result<Option<VersionVector>> {
        let row = self
            .conn()
            .query_row(
                r"
                SELECT version, last_modified, last_modified_by FROM version_vectors
                WHERE resource_type = ?1 AND resource_id = ?2
                ",
                (resource.resource_type.as_str(), &resource.resource_id),
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(unavailable)?;

        row.map(|(version, last_modified, last_modified_by)| -> Result<VersionVector> {
            Ok(VersionVector {
                resource: resource.clone(),
                version: to_u64(version)?,
                last_modified: parse_time(&last_modified)?,
                last_modified_by,
            })
        })
        .transpose()
    }

    fn save_vector(&self, vector: &VersionVector) -> Result<()> {
        self.conn()
            .execute(
                r"
                INSERT OR REPLACE INTO version_vectors
                    (resource_type, resource_id, version, last_modified, last_modified_by)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
                (
                    vector.resource.resource_type.as_str(),
                    &vector.resource.resource_id,
                    to_i64(vector.version)?,
                    vector.last_modified.to_rfc3339(),
                    &vector.last_modified_by,
                ),
            )
            .map_err(unavailable)?;
        Ok(())
    }
}

impl PendingOperationStore for SqliteStore {
    fn append_pending(&self, op: &Operation) -> Result<()> {
        let bytes = encode(op)?;
        self.conn()
            .execute(
                r"
                INSERT INTO pending_operations
                    (resource_type, resource_id, op_id, op_bytes, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
                (
                    op.resource.resource_type.as_str(),
                    &op.resource.resource_id,
                    &op.id,
                    bytes,
                    Utc::now().timestamp(),
                ),
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn pending_operations(&self, resource: &ResourceKey) -> Result<Vec<Operation>> {
        let blobs = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare(
                    r"
                    SELECT op_bytes FROM pending_operations
                    WHERE resource_type = ?1 AND resource_id = ?2
                    ORDER BY seq ASC
                    ",
                )
                .map_err(unavailable)?;
            let rows = stmt
                .query_map(
                    (resource.resource_type.as_str(), &resource.resource_id),
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .map_err(unavailable)?;
            rows.collect::<SqliteResult<Vec<_>>>()
                .map_err(unavailable)?
        };

        blobs.iter().map(|bytes| decode(bytes)).collect()
    }

    fn clear_pending(&self, resource: &ResourceKey) -> Result<usize> {
        let removed = self
            .conn()
            .execute(
                r"
                DELETE FROM pending_operations
                WHERE resource_type = ?1 AND resource_id = ?2
                ",
                (resource.resource_type.as_str(), &resource.resource_id),
            )
            .map_err(unavailable)?;
        Ok(removed)
    }
}

/// Columns of one `document_versions` row.
struct VersionRow {
    id: String,
    version_number: i64,
    content: String,
    summary: Option<String>,
    author: String,
    created_at: String,
}

impl VersionRow {
    const COLUMNS: &'static str =
        "id, version_number, content, summary, author, created_at";

    fn from_row(row: &rusqlite::Row<'_>) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            version_number: row.get(1)?,
            content: row.get(2)?,
            summary: row.get(3)?,
            author: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_version(self, entity: &ResourceKey) -> Result<DocumentVersion> {
        Ok(DocumentVersion {
            id: Uuid::parse_str(&self.id).map_err(|e| Error::Codec(e.to_string()))?,
            entity: entity.clone(),
            version_number: to_u64(self.version_number)?,
            content: serde_json::from_str(&self.content)?,
            summary: self.summary,
            author: self.author,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

/// Columns of one `version_changes` row.
struct ChangeRow {
    field_name: String,
    old_value: Option<String>,
    new_value: Option<String>,
    change_type: String,
}

impl ChangeRow {
    fn into_change(self) -> Result<FieldChange> {
        Ok(FieldChange {
            field_name: self.field_name,
            old_value: self.old_value.as_deref().map(serde_json::from_str).transpose()?,
            new_value: self.new_value.as_deref().map(serde_json::from_str).transpose()?,
            change_type: self.change_type.parse::<ChangeType>()?,
        })
    }
}

impl SqliteStore {
    fn query_version(
        &self,
        entity: &ResourceKey,
        filter: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<DocumentVersion>> {
        let sql = format!(
            "SELECT {} FROM document_versions WHERE entity_type = ?1 AND entity_id = ?2 {filter}",
            VersionRow::COLUMNS
        );
        let type_name = entity.resource_type.as_str();
        let mut all: Vec<&dyn rusqlite::ToSql> = vec![&type_name, &entity.resource_id];
        all.extend_from_slice(params);

        let row = self
            .conn()
            .query_row(&sql, all.as_slice(), VersionRow::from_row)
            .optional()
            .map_err(unavailable)?;
        row.map(|r| r.into_version(entity)).transpose()
    }

    fn changes_of(conn: &Connection, version_id: &str) -> Result<Vec<FieldChange>> {
        let mut stmt = conn
            .prepare(
                r"
                SELECT field_name, old_value, new_value, change_type FROM version_changes
                WHERE version_id = ?1
                ORDER BY id ASC
                ",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([version_id], |row| {
                Ok(ChangeRow {
                    field_name: row.get(0)?,
                    old_value: row.get(1)?,
                    new_value: row.get(2)?,
                    change_type: row.get(3)?,
                })
            })
            .map_err(unavailable)?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(unavailable)?;

        rows.into_iter().map(ChangeRow::into_change).collect()
    }
}

impl SnapshotStore for SqliteStore {
    fn latest_version(&self, entity: &ResourceKey) -> Result<Option<DocumentVersion>> {
        self.query_version(entity, "ORDER BY version_number DESC LIMIT 1", &[])
    }

    fn version(
        &self,
        entity: &ResourceKey,
        version_number: u64,
    ) -> Result<Option<DocumentVersion>> {
        let number = to_i64(version_number)?;
        self.query_version(entity, "AND version_number = ?3", &[&number])
    }

    fn insert_version(&self, version: &DocumentVersion, changes: &[FieldChange]) -> Result<()> {
        let content = serde_json::to_string(&version.content)?;
        let changes = changes
            .iter()
            .map(|c| -> Result<_> {
                Ok((
                    c.field_name.as_str(),
                    c.old_value.as_ref().map(serde_json::to_string).transpose()?,
                    c.new_value.as_ref().map(serde_json::to_string).transpose()?,
                    c.change_type.as_str(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.conn();
        let tx = conn.transaction().map_err(unavailable)?;
        let version_id = version.id.to_string();

        tx.execute(
            r"
            INSERT INTO document_versions
                (id, entity_type, entity_id, version_number, content, summary, author, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            (
                &version_id,
                version.entity.resource_type.as_str(),
                &version.entity.resource_id,
                to_i64(version.version_number)?,
                content,
                &version.summary,
                &version.author,
                version.created_at.to_rfc3339(),
            ),
        )
        .map_err(unavailable)?;

        for (field_name, old_value, new_value, change_type) in changes {
            tx.execute(
                r"
                INSERT INTO version_changes
                    (version_id, field_name, old_value, new_value, change_type)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
                (&version_id, field_name, old_value, new_value, change_type),
            )
            .map_err(unavailable)?;
        }

        tx.commit().map_err(unavailable)?;
        Ok(())
    }

    fn version_history(&self, entity: &ResourceKey) -> Result<Vec<VersionRecord>> {
        let conn = self.conn();
        let rows = {
            let mut stmt = conn
                .prepare(&format!(
                    r"
                    SELECT {} FROM document_versions
                    WHERE entity_type = ?1 AND entity_id = ?2
                    ORDER BY version_number DESC
                    ",
                    VersionRow::COLUMNS
                ))
                .map_err(unavailable)?;
            let rows = stmt
                .query_map(
                    (entity.resource_type.as_str(), &entity.resource_id),
                    VersionRow::from_row,
                )
                .map_err(unavailable)?;
            rows.collect::<SqliteResult<Vec<_>>>()
                .map_err(unavailable)?
        };

        rows.into_iter()
            .map(|row| -> Result<VersionRecord> {
                let changes = Self::changes_of(&conn, &row.id)?;
                Ok(VersionRecord {
                    version: row.into_version(entity)?,
                    changes,
                })
            })
            .collect()
    }

    fn retain_latest_versions(&self, entity: &ResourceKey, keep: usize) -> Result<usize> {
        let keep = i64::try_from(keep).map_err(|e| Error::InvalidOperation(e.to_string()))?;
        let params = (entity.resource_type.as_str(), &entity.resource_id, keep);

        let mut conn = self.conn();
        let tx = conn.transaction().map_err(unavailable)?;

        tx.execute(
            r"
            DELETE FROM version_changes WHERE version_id IN (
                SELECT id FROM document_versions
                WHERE entity_type = ?1 AND entity_id = ?2
                ORDER BY version_number DESC
                LIMIT -1 OFFSET ?3
            )
            ",
            params,
        )
        .map_err(unavailable)?;

        let removed = tx
            .execute(
                r"
                DELETE FROM document_versions WHERE id IN (
                    SELECT id FROM document_versions
                    WHERE entity_type = ?1 AND entity_id = ?2
                    ORDER BY version_number DESC
                    LIMIT -1 OFFSET ?3
                )
                ",
                params,
            )
            .map_err(unavailable)?;

        tx.commit().map_err(unavailable)?;
        Ok(removed)
    }
}

impl ResolutionStore for SqliteStore {
    fn record_resolution(&self, resolution: &ConflictResolution) -> Result<()> {
        let bytes = encode(resolution)?;
        self.conn()
            .execute(
                r"
                INSERT OR REPLACE INTO conflict_resolutions
                    (id, resource_type, resource_id, resolution_bytes, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
                (
                    resolution.id.to_string(),
                    resolution.resource.resource_type.as_str(),
                    &resolution.resource.resource_id,
                    bytes,
                    resolution.timestamp.timestamp(),
                ),
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn resolutions(&self, resource: &ResourceKey) -> Result<Vec<ConflictResolution>> {
        let blobs = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare(
                    r"
                    SELECT resolution_bytes FROM conflict_resolutions
                    WHERE resource_type = ?1 AND resource_id = ?2
                    ORDER BY seq ASC
                    ",
                )
                .map_err(unavailable)?;
            let rows = stmt
                .query_map(
                    (resource.resource_type.as_str(), &resource.resource_id),
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .map_err(unavailable)?;
            rows.collect::<SqliteResult<Vec<_>>>()
                .map_err(unavailable)?
        };

        blobs.iter().map(|bytes| decode(bytes)).collect()
    }
}

pub(crate) fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn unavailable(err: rusqlite::Error) -> Error {
    Error::StoreUnavailable(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| Error::Codec(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| Error::Codec(e.to_string()))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Codec(format!("bad timestamp '{value}': {e}")))
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|e| Error::InvalidOperation(e.to_string()))
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|e| Error::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_core::{ConflictType, ResolutionStrategy, Timestamp};

    fn vector(version: u64) -> VersionVector {
        VersionVector {
            resource: ResourceKey::task("t-1"),
            version,
            last_modified: Utc::now(),
            last_modified_by: "alice".to_string(),
        }
    }

    fn document(number: u64, content: serde_json::Value) -> DocumentVersion {
        DocumentVersion {
            id: Uuid::new_v4(),
            entity: ResourceKey::project("p-1"),
            version_number: number,
            content: content.as_object().cloned().unwrap_or_default(),
            summary: Some(format!("v{number}")),
            author: "alice".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn version_vector_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let key = ResourceKey::task("t-1");
        assert!(store.load_vector(&key).unwrap().is_none());

        store.save_vector(&vector(1)).unwrap();
        store.save_vector(&vector(2)).unwrap();

        let loaded = store.load_vector(&key).unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.last_modified_by, "alice");
    }

    #[test]
    fn pending_log_keeps_append_order() {
        let store = SqliteStore::in_memory().unwrap();
        let key = ResourceKey::task("t-1");
        let ops: Vec<Operation> = (0..3)
            .map(|i| {
                Operation::insert(key.clone(), "alice", i, "x", Timestamp::from_millis(100 - i as u64))
            })
            .collect();
        for op in &ops {
            store.append_pending(op).unwrap();
        }
        store
            .append_pending(&Operation::update(
                ResourceKey::comment("t-1"),
                "bob",
                "other",
                Timestamp::from_millis(1),
            ))
            .unwrap();

        assert_eq!(store.pending_operations(&key).unwrap(), ops);
        assert_eq!(store.clear_pending(&key).unwrap(), 3);
        assert!(store.pending_operations(&key).unwrap().is_empty());
        assert_eq!(
            store
                .pending_operations(&ResourceKey::comment("t-1"))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn versions_and_changes_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let entity = ResourceKey::project("p-1");
        let first = document(1, json!({"name": "Alpha"}));
        let second = document(2, json!({"name": "Beta"}));

        store
            .insert_version(
                &first,
                &[FieldChange {
                    field_name: "name".into(),
                    old_value: None,
                    new_value: Some(json!("Alpha")),
                    change_type: ChangeType::Added,
                }],
            )
            .unwrap();
        store
            .insert_version(
                &second,
                &[FieldChange {
                    field_name: "name".into(),
                    old_value: Some(json!("Alpha")),
                    new_value: Some(json!("Beta")),
                    change_type: ChangeType::Modified,
                }],
            )
            .unwrap();

        assert_eq!(store.latest_version(&entity).unwrap(), Some(second.clone()));
        assert_eq!(store.version(&entity, 1).unwrap(), Some(first));
        assert!(store.version(&entity, 9).unwrap().is_none());

        let history = store.version_history(&entity).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, second);
        assert_eq!(history[0].changes[0].change_type, ChangeType::Modified);
        assert_eq!(history[1].changes[0].new_value, Some(json!("Alpha")));
    }

    #[test]
    fn duplicate_version_number_writes_nothing() {
        let store = SqliteStore::in_memory().unwrap();
        let entity = ResourceKey::project("p-1");
        store.insert_version(&document(1, json!({"a": 1})), &[]).unwrap();

        let change = FieldChange {
            field_name: "a".into(),
            old_value: Some(json!(1)),
            new_value: Some(json!(2)),
            change_type: ChangeType::Modified,
        };
        let err = store
            .insert_version(&document(1, json!({"a": 2})), &[change])
            .unwrap_err();

        assert!(matches!(err, Error::StoreUnavailable(_)));
        let history = store.version_history(&entity).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].changes.is_empty());
    }

    #[test]
    fn retain_drops_oldest() {
        let store = SqliteStore::in_memory().unwrap();
        let entity = ResourceKey::project("p-1");
        for n in 1..=4 {
            store
                .insert_version(&document(n, json!({"n": n})), &[])
                .unwrap();
        }

        assert_eq!(store.retain_latest_versions(&entity, 2).unwrap(), 2);
        let numbers: Vec<u64> = store
            .version_history(&entity)
            .unwrap()
            .iter()
            .map(|r| r.version.version_number)
            .collect();
        assert_eq!(numbers, vec![4, 3]);
        assert_eq!(store.retain_latest_versions(&entity, 2).unwrap(), 0);
    }

    #[test]
    fn resolutions_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let key = ResourceKey::task("t-1");
        let a = Operation::update(key.clone(), "alice", "A", Timestamp::from_millis(10));
        let b = Operation::update(key.clone(), "bob", "B", Timestamp::from_millis(20));

        let mut resolution = ConflictResolution::new(
            key.clone(),
            ConflictType::ConcurrentEdit,
            vec![a, b.clone()],
            ResolutionStrategy::LastWriteWins,
        );
        resolution.resolved_operation = Some(b);
        store.record_resolution(&resolution).unwrap();

        assert_eq!(store.resolutions(&key).unwrap(), vec![resolution]);
        assert!(store
            .resolutions(&ResourceKey::task("other"))
            .unwrap()
            .is_empty());
    }
}
