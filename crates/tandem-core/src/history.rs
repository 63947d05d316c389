//! Document version history: snapshots, field-level diffs, and rollback.
//!
//! Each save appends an immutable [`DocumentVersion`] holding the full content
//! map of the entity. Versions are numbered 1, 2, 3, ... per entity. This
//! chain is separate from the live [`crate::VersionVector`]: the vector orders
//! edits, the chain records durable save points.
//!
//! Rollback never rewrites history; it appends a new version whose content
//! equals the target version's.

use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::operation::ResourceKey;
use crate::store::SnapshotStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque field map saved in each snapshot.
pub type Content = serde_json::Map<String, Value>;

/// One immutable saved state of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVersion {
    /// Version identifier
    pub id: Uuid,
    /// Entity this snapshot belongs to
    pub entity: ResourceKey,
    /// Monotonic number per entity, starting at 1
    pub version_number: u64,
    /// Full content at save time
    pub content: Content,
    /// Human-readable description of the change
    pub summary: Option<String>,
    /// Author of the save
    pub author: String,
    /// When the version was created
    pub created_at: DateTime<Utc>,
}

/// Kind of field-level difference between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Field absent before, present after
    Added,
    /// Field present in both with different values
    Modified,
    /// Field present before, absent after
    Deleted,
}

impl ChangeType {
    /// Wire name of the change type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Added => "added",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "added" => Ok(Self::Added),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            other => Err(Error::Codec(format!("unknown change type '{other}'"))),
        }
    }
}

/// One field-level difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Field name in the content map
    pub field_name: String,
    /// Value before, if the field existed
    pub old_value: Option<Value>,
    /// Value after, if the field exists
    pub new_value: Option<Value>,
    /// Kind of change
    pub change_type: ChangeType,
}

/// A stored version together with its diff against the previous version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// The snapshot
    pub version: DocumentVersion,
    /// Changes relative to the previous version (all `added` for version 1)
    pub changes: Vec<FieldChange>,
}

/// Field-level differences from `from` to `to`, ordered by field name.
///
/// Values are compared by their JSON serialization.
#[must_use]
pub fn diff_content(from: &Content, to: &Content) -> Vec<FieldChange> {
    let fields: BTreeSet<&String> = from.keys().chain(to.keys()).collect();

    fields
        .into_iter()
        .filter_map(|field| {
            let old = from.get(field);
            let new = to.get(field);
            let change_type = match (old, new) {
                (None, Some(_)) => ChangeType::Added,
                (Some(_), None) => ChangeType::Deleted,
                (Some(old), Some(new)) if serialized(old) != serialized(new) => {
                    ChangeType::Modified
                }
                _ => return None,
            };
            Some(FieldChange {
                field_name: field.clone(),
                old_value: old.cloned(),
                new_value: new.cloned(),
                change_type,
            })
        })
        .collect()
}

fn serialized(value: &Value) -> String {
    value.to_string()
}

/// Append-only version history over a [`SnapshotStore`].
pub struct VersionHistory {
    store: Arc<dyn SnapshotStore>,
    locks: KeyedLocks,
}

impl VersionHistory {
    /// Create a history engine over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// Append a new version of `entity` with `content`.
    ///
    /// The version number is the previous maximum plus one. The version and
    /// its diff against the previous version are written together or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the snapshot store fails.
    pub fn create_version(
        &self,
        entity: &ResourceKey,
        content: Content,
        summary: Option<&str>,
        user_id: &str,
    ) -> Result<DocumentVersion> {
        self.locks.with(entity, || {
            let previous = self.store.latest_version(entity)?;
            let version_number = previous.as_ref().map_or(1, |v| v.version_number + 1);
            let changes = diff_content(
                previous.as_ref().map_or(&Content::new(), |v| &v.content),
                &content,
            );

            let version = DocumentVersion {
                id: Uuid::new_v4(),
                entity: entity.clone(),
                version_number,
                content,
                summary: summary.map(str::to_string),
                author: user_id.to_string(),
                created_at: Utc::now(),
            };
            self.store.insert_version(&version, &changes)?;

            tracing::debug!(
                entity = %entity,
                version_number,
                changes = changes.len(),
                "Created document version"
            );
            Ok(version)
        })
    }

    /// All versions of `entity` with their diffs, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the snapshot store fails.
    pub fn get_version_history(&self, entity: &ResourceKey) -> Result<Vec<VersionRecord>> {
        self.store.version_history(entity)
    }

    /// A specific version of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the version does not exist.
    pub fn get_version(&self, entity: &ResourceKey, version_number: u64) -> Result<DocumentVersion> {
        self.store
            .version(entity, version_number)?
            .ok_or_else(|| Error::NotFound(format!("{entity} version {version_number}")))
    }

    /// The newest version of `entity`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the snapshot store fails.
    pub fn latest_version(&self, entity: &ResourceKey) -> Result<Option<DocumentVersion>> {
        self.store.latest_version(entity)
    }

    /// Field-level differences between two versions of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if either version does not exist.
    pub fn compare_versions(
        &self,
        entity: &ResourceKey,
        from_version: u64,
        to_version: u64,
    ) -> Result<Vec<FieldChange>> {
        let from = self.get_version(entity, from_version)?;
        let to = self.get_version(entity, to_version)?;
        Ok(diff_content(&from.content, &to.content))
    }

    /// Restore the content of `target_version` as a new version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the target version does not exist.
    pub fn rollback_to_version(
        &self,
        entity: &ResourceKey,
        target_version: u64,
        user_id: &str,
        summary: Option<&str>,
    ) -> Result<DocumentVersion> {
        let target = self.get_version(entity, target_version)?;
        let summary = summary.map_or_else(
            || format!("Rolled back to version {target_version}"),
            str::to_string,
        );

        let version = self.create_version(entity, target.content, Some(&summary), user_id)?;
        tracing::info!(
            entity = %entity,
            target_version,
            new_version = version.version_number,
            user_id,
            "Rolled back document"
        );
        Ok(version)
    }

    /// Delete all but the `keep_count` newest versions of `entity`.
    ///
    /// Returns the number of versions removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the snapshot store fails.
    pub fn cleanup_old_versions(&self, entity: &ResourceKey, keep_count: usize) -> Result<usize> {
        let removed = self
            .locks
            .with(entity, || self.store.retain_latest_versions(entity, keep_count))?;
        if removed > 0 {
            tracing::info!(entity = %entity, removed, keep_count, "Cleaned up old versions");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn content(value: Value) -> Content {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn history() -> VersionHistory {
        VersionHistory::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn diff_classifies_changes() {
        let from = content(json!({"title": "A", "status": "open", "owner": "amy"}));
        let to = content(json!({"title": "B", "status": "open", "due": "2025-01-01"}));

        let changes = diff_content(&from, &to);
        let summary: Vec<(&str, ChangeType)> = changes
            .iter()
            .map(|c| (c.field_name.as_str(), c.change_type))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("due", ChangeType::Added),
                ("owner", ChangeType::Deleted),
                ("title", ChangeType::Modified),
            ]
        );
        assert_eq!(changes[2].old_value, Some(json!("A")));
        assert_eq!(changes[2].new_value, Some(json!("B")));
    }

    #[test]
    fn versions_number_from_one() {
        let history = history();
        let entity = ResourceKey::task("t-1");

        let numbers: Vec<u64> = (0..3)
            .map(|i| {
                history
                    .create_version(&entity, content(json!({"n": i})), None, "alice")
                    .unwrap()
                    .version_number
            })
            .collect();

        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn history_is_newest_first_with_changes() {
        let history = history();
        let entity = ResourceKey::project("p-1");

        history
            .create_version(&entity, content(json!({"name": "Alpha"})), Some("create"), "a")
            .unwrap();
        history
            .create_version(&entity, content(json!({"name": "Beta"})), Some("rename"), "b")
            .unwrap();

        let records = history.get_version_history(&entity).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].version.version_number, 2);
        assert_eq!(records[0].changes[0].change_type, ChangeType::Modified);
        assert_eq!(records[1].changes[0].change_type, ChangeType::Added);
    }

    #[test]
    fn compare_version_with_itself_is_empty() {
        let history = history();
        let entity = ResourceKey::task("t-1");
        history
            .create_version(&entity, content(json!({"a": 1, "b": [1, 2]})), None, "a")
            .unwrap();

        assert!(history.compare_versions(&entity, 1, 1).unwrap().is_empty());
    }

    #[test]
    fn compare_missing_version_is_not_found() {
        let history = history();
        let entity = ResourceKey::task("t-1");
        history
            .create_version(&entity, content(json!({"a": 1})), None, "a")
            .unwrap();

        assert!(matches!(
            history.compare_versions(&entity, 1, 7),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn rollback_appends_forward_version() {
        let history = history();
        let entity = ResourceKey::task("t-1");
        let original = content(json!({"title": "first"}));

        history
            .create_version(&entity, original.clone(), None, "alice")
            .unwrap();
        history
            .create_version(&entity, content(json!({"title": "second"})), None, "bob")
            .unwrap();

        let restored = history.rollback_to_version(&entity, 1, "carol", None).unwrap();
        assert_eq!(restored.version_number, 3);

        let records = history.get_version_history(&entity).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].version.content, original);
        assert_eq!(
            records[0].version.summary.as_deref(),
            Some("Rolled back to version 1")
        );
        assert_eq!(records[0].version.author, "carol");
    }

    #[test]
    fn rollback_to_missing_version_writes_nothing() {
        let history = history();
        let entity = ResourceKey::task("t-1");
        history
            .create_version(&entity, content(json!({"a": 1})), None, "a")
            .unwrap();

        assert!(matches!(
            history.rollback_to_version(&entity, 5, "a", None),
            Err(Error::NotFound(_))
        ));
        assert_eq!(history.get_version_history(&entity).unwrap().len(), 1);
    }

    #[test]
    fn cleanup_keeps_newest() {
        let history = history();
        let entity = ResourceKey::comment("c-1");
        for i in 0..3 {
            history
                .create_version(&entity, content(json!({"body": i})), None, "a")
                .unwrap();
        }

        let removed = history.cleanup_old_versions(&entity, 1).unwrap();
        assert_eq!(removed, 2);

        let records = history.get_version_history(&entity).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version.version_number, 3);

        let next = history
            .create_version(&entity, content(json!({"body": 9})), None, "a")
            .unwrap();
        assert_eq!(next.version_number, 4);
    }
}
