//! Store interfaces injected into the engines, plus in-memory implementations.
//!
//! Durable implementations live in the `tandem-store` crate. All stores are
//! keyed by [`ResourceKey`]; callers serialize work per key (see
//! [`crate::locks::KeyedLocks`]), so implementations only need to be
//! internally consistent for single calls.

use crate::conflict::ConflictResolution;
use crate::error::{Error, Result};
use crate::history::{DocumentVersion, FieldChange, VersionRecord};
use crate::operation::{Operation, ResourceKey};
use crate::version::VersionVector;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Persistence of per-resource version vectors.
pub trait VersionVectorStore: Send + Sync {
    /// Load the vector of `resource`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be read.
    fn load_vector(&self, resource: &ResourceKey) -> Result<Option<VersionVector>>;

    /// Insert or replace a vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be written.
    fn save_vector(&self, vector: &VersionVector) -> Result<()>;
}

/// Append-only log of accepted operations, cleared explicitly by the caller.
pub trait PendingOperationStore: Send + Sync {
    /// Append an accepted operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be written.
    fn append_pending(&self, op: &Operation) -> Result<()>;

    /// Pending operations of `resource` in append order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be read.
    fn pending_operations(&self, resource: &ResourceKey) -> Result<Vec<Operation>>;

    /// Drop all pending operations of `resource`, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be written.
    fn clear_pending(&self, resource: &ResourceKey) -> Result<usize>;
}

/// Append-only storage of document versions and their diffs.
pub trait SnapshotStore: Send + Sync {
    /// The version with the highest number for `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be read.
    fn latest_version(&self, entity: &ResourceKey) -> Result<Option<DocumentVersion>>;

    /// Point lookup by version number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be read.
    fn version(&self, entity: &ResourceKey, version_number: u64)
        -> Result<Option<DocumentVersion>>;

    /// Store a new version and its diff atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the write fails or the version
    /// number is already taken; nothing is written in that case.
    fn insert_version(&self, version: &DocumentVersion, changes: &[FieldChange]) -> Result<()>;

    /// All versions of `entity` with their diffs, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be read.
    fn version_history(&self, entity: &ResourceKey) -> Result<Vec<VersionRecord>>;

    /// Delete all but the `keep` newest versions (and their diffs).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be written.
    fn retain_latest_versions(&self, entity: &ResourceKey, keep: usize) -> Result<usize>;
}

/// Audit trail of settled conflict resolutions.
pub trait ResolutionStore: Send + Sync {
    /// Record a resolution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be written.
    fn record_resolution(&self, resolution: &ConflictResolution) -> Result<()>;

    /// Resolutions recorded for `resource`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be read.
    fn resolutions(&self, resource: &ResourceKey) -> Result<Vec<ConflictResolution>>;
}

/// Persistence of the actual resource content (tasks, projects, comments).
///
/// One implementation is registered per resource type.
pub trait ContentStore: Send + Sync {
    /// Current content of a resource, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be read.
    fn load_content(&self, resource_id: &str) -> Result<Option<String>>;

    /// Replace the content of a resource, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be written.
    fn update_resource_content(&self, resource_id: &str, content: &str) -> Result<()>;
}

/// Authorization check consulted by the conflict detector.
pub trait EditPermissions: Send + Sync {
    /// Whether `user_id` may edit `resource`.
    ///
    /// # Errors
    ///
    /// Returns an error if the permission source cannot be reached.
    fn can_edit(&self, user_id: &str, resource: &ResourceKey) -> Result<bool>;
}

#[derive(Debug, Default)]
struct MemoryState {
    vectors: HashMap<ResourceKey, VersionVector>,
    pending: HashMap<ResourceKey, Vec<Operation>>,
    versions: HashMap<ResourceKey, Vec<VersionRecord>>,
    resolutions: HashMap<ResourceKey, Vec<ConflictResolution>>,
}

/// In-memory implementation of every engine store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VersionVectorStore for MemoryStore {
    fn load_vector(&self, resource: &ResourceKey) -> Result<Option<VersionVector>> {
        Ok(self.state().vectors.get(resource).cloned())
    }

    fn save_vector(&self, vector: &VersionVector) -> Result<()> {
        self.state()
            .vectors
            .insert(vector.resource.clone(), vector.clone());
        Ok(())
    }
}

impl PendingOperationStore for MemoryStore {
    fn append_pending(&self, op: &Operation) -> Result<()> {
        self.state()
            .pending
            .entry(op.resource.clone())
            .or_default()
            .push(op.clone());
        Ok(())
    }

    fn pending_operations(&self, resource: &ResourceKey) -> Result<Vec<Operation>> {
        Ok(self
            .state()
            .pending
            .get(resource)
            .cloned()
            .unwrap_or_default())
    }

    fn clear_pending(&self, resource: &ResourceKey) -> Result<usize> {
        Ok(self.state().pending.remove(resource).map_or(0, |ops| ops.len()))
    }
}

impl SnapshotStore for MemoryStore {
    fn latest_version(&self, entity: &ResourceKey) -> Result<Option<DocumentVersion>> {
        Ok(self
            .state()
            .versions
            .get(entity)
            .and_then(|records| records.last())
            .map(|record| record.version.clone()))
    }

    fn version(
        &self,
        entity: &ResourceKey,
        version_number: u64,
    ) -> Result<Option<DocumentVersion>> {
        Ok(self.state().versions.get(entity).and_then(|records| {
            records
                .iter()
                .find(|r| r.version.version_number == version_number)
                .map(|r| r.version.clone())
        }))
    }

    fn insert_version(&self, version: &DocumentVersion, changes: &[FieldChange]) -> Result<()> {
        let mut state = self.state();
        let records = state.versions.entry(version.entity.clone()).or_default();
        if records
            .last()
            .is_some_and(|last| last.version.version_number >= version.version_number)
        {
            return Err(Error::StoreUnavailable(format!(
                "{} version {} already exists",
                version.entity, version.version_number
            )));
        }
        records.push(VersionRecord {
            version: version.clone(),
            changes: changes.to_vec(),
        });
        Ok(())
    }

    fn version_history(&self, entity: &ResourceKey) -> Result<Vec<VersionRecord>> {
        Ok(self
            .state()
            .versions
            .get(entity)
            .map(|records| records.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    fn retain_latest_versions(&self, entity: &ResourceKey, keep: usize) -> Result<usize> {
        let mut state = self.state();
        let Some(records) = state.versions.get_mut(entity) else {
            return Ok(0);
        };
        let excess = records.len().saturating_sub(keep);
        records.drain(..excess);
        Ok(excess)
    }
}

impl ResolutionStore for MemoryStore {
    fn record_resolution(&self, resolution: &ConflictResolution) -> Result<()> {
        self.state()
            .resolutions
            .entry(resolution.resource.clone())
            .or_default()
            .push(resolution.clone());
        Ok(())
    }

    fn resolutions(&self, resource: &ResourceKey) -> Result<Vec<ConflictResolution>> {
        Ok(self
            .state()
            .resolutions
            .get(resource)
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory content of one resource type.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    contents: Mutex<HashMap<String, String>>,
}

impl MemoryContentStore {
    /// Create an empty content store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: seed a resource with initial content.
    #[must_use]
    pub fn with_resource(self, resource_id: impl Into<String>, content: impl Into<String>) -> Self {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource_id.into(), content.into());
        self
    }
}

impl ContentStore for MemoryContentStore {
    fn load_content(&self, resource_id: &str) -> Result<Option<String>> {
        Ok(self
            .contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource_id)
            .cloned())
    }

    fn update_resource_content(&self, resource_id: &str, content: &str) -> Result<()> {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource_id.to_string(), content.to_string());
        Ok(())
    }
}
