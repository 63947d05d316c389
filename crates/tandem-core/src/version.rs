//! Per-resource version vectors.
//!
//! A version vector is a monotonic counter plus last-editor metadata kept for
//! every `(resource_type, resource_id)`. The tracker advances it by exactly one
//! per accepted operation; the conflict detector reads it to spot stale edits.

use crate::error::Result;
use crate::operation::ResourceKey;
use crate::store::VersionVectorStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Live edit ordering state of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    /// Resource this vector belongs to
    pub resource: ResourceKey,
    /// Monotonic version, starting at 1 after the first accepted edit
    pub version: u64,
    /// Wall-clock time of the last accepted edit
    pub last_modified: DateTime<Utc>,
    /// Author of the last accepted edit
    pub last_modified_by: String,
}

/// Reads and advances version vectors through a [`VersionVectorStore`].
#[derive(Clone)]
pub struct VersionTracker {
    store: Arc<dyn VersionVectorStore>,
}

impl VersionTracker {
    /// Create a tracker over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn VersionVectorStore>) -> Self {
        Self { store }
    }

    /// Current version vector of a resource, if it was ever edited.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreUnavailable`] if the store cannot be read.
    pub fn current_version(&self, resource: &ResourceKey) -> Result<Option<VersionVector>> {
        self.store.load_vector(resource)
    }

    /// Record one accepted edit by `user_id`.
    ///
    /// Increments the version by exactly one (or starts at 1) and stamps the
    /// editor and time. Call once per accepted operation: a second call for
    /// the same edit makes later edits based on the real version look stale.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreUnavailable`] if the store cannot be read
    /// or written.
    pub fn advance(&self, resource: &ResourceKey, user_id: &str) -> Result<VersionVector> {
        let previous = self.store.load_vector(resource)?;
        let version = previous.as_ref().map_or(1, |v| v.version + 1);

        let vector = VersionVector {
            resource: resource.clone(),
            version,
            last_modified: Utc::now(),
            last_modified_by: user_id.to_string(),
        };
        self.store.save_vector(&vector)?;

        tracing::debug!(
            resource = %resource,
            version,
            user_id,
            "Advanced version vector"
        );
        Ok(vector)
    }
}
