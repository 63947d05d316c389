//! `SQLite`-backed resource content, one store per resource type.

use crate::sqlite::{lock, unavailable};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use tandem_core::{ContentStore, ResourceType, Result};

/// Content of one resource type in the shared database.
pub struct SqliteContentStore {
    conn: Arc<Mutex<Connection>>,
    resource_type: ResourceType,
}

impl SqliteContentStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, resource_type: ResourceType) -> Self {
        Self {
            conn,
            resource_type,
        }
    }

    /// Resource type served by this store.
    #[must_use]
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }
}

impl ContentStore for SqliteContentStore {
    fn load_content(&self, resource_id: &str) -> Result<Option<String>> {
        lock(&self.conn)
            .query_row(
                r"
                SELECT content FROM resource_content
                WHERE resource_type = ?1 AND resource_id = ?2
                ",
                (self.resource_type.as_str(), resource_id),
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)
    }

    fn update_resource_content(&self, resource_id: &str, content: &str) -> Result<()> {
        lock(&self.conn)
            .execute(
                r"
                INSERT INTO resource_content (resource_type, resource_id, content, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(resource_type, resource_id)
                DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at
                ",
                (
                    self.resource_type.as_str(),
                    resource_id,
                    content,
                    Utc::now().timestamp(),
                ),
            )
            .map_err(unavailable)?;

        tracing::trace!(
            resource_type = %self.resource_type,
            resource_id,
            "Stored resource content"
        );
        Ok(())
    }
}
