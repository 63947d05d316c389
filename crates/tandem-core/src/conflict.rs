//! Conflict classification for submitted operations.
//!
//! Detection runs in a fixed order:
//! 1. permission check (only when an [`EditPermissions`] is configured)
//! 2. staleness: the operation's base version is behind the version vector
//! 3. concurrency: another user's pending operation on the same resource lies
//!    within the conflict window
//!
//! Detection is total. Store failures are logged and treated as "no conflict"
//! so collaborative editing stays available.

use crate::operation::{Operation, ResourceKey};
use crate::store::{EditPermissions, PendingOperationStore};
use crate::version::VersionTracker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Default conflict window in milliseconds.
pub const DEFAULT_CONFLICT_WINDOW_MS: u64 = 1000;

/// Why two or more operations conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Different users edited the same resource within the conflict window
    ConcurrentEdit,
    /// The operation was computed against an outdated version
    VersionMismatch,
    /// The author is not allowed to edit the resource
    PermissionConflict,
}

impl ConflictType {
    /// Wire name of the conflict type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::ConcurrentEdit => "concurrent_edit",
            ConflictType::VersionMismatch => "version_mismatch",
            ConflictType::PermissionConflict => "permission_conflict",
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a set of conflicting operations is reduced to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Latest timestamp wins, ties broken by operation id
    LastWriteWins,
    /// Rebase operations onto each other in timestamp order
    OperationalTransform,
    /// Line-merge all contents into a synthetic operation
    Merge,
    /// No automatic winner; the caller asks the user
    UserChoice,
}

impl ResolutionStrategy {
    /// Wire name of the strategy.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LastWriteWins => "last_write_wins",
            ResolutionStrategy::OperationalTransform => "operational_transform",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::UserChoice => "user_choice",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_write_wins" => Ok(Self::LastWriteWins),
            "operational_transform" => Ok(Self::OperationalTransform),
            "merge" => Ok(Self::Merge),
            "user_choice" => Ok(Self::UserChoice),
            other => Err(format!("unknown resolution strategy '{other}'")),
        }
    }
}

/// Record of how a set of conflicting operations was (or is to be) resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// Resolution identifier
    pub id: Uuid,
    /// Resource the conflict is on
    pub resource: ResourceKey,
    /// Classification of the conflict
    pub conflict_type: ConflictType,
    /// Input operations
    pub operations: Vec<Operation>,
    /// Winning or merged operation, once resolved
    pub resolved_operation: Option<Operation>,
    /// Strategy used
    pub strategy: ResolutionStrategy,
    /// When the record was created
    pub timestamp: DateTime<Utc>,
    /// Distinct authors of the input operations, sorted
    pub involved_users: Vec<String>,
}

impl ConflictResolution {
    /// Create an unresolved record for `operations` on `resource`.
    #[must_use]
    pub fn new(
        resource: ResourceKey,
        conflict_type: ConflictType,
        operations: Vec<Operation>,
        strategy: ResolutionStrategy,
    ) -> Self {
        let involved_users = operations
            .iter()
            .map(|op| op.user_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Self {
            id: Uuid::new_v4(),
            resource,
            conflict_type,
            operations,
            resolved_operation: None,
            strategy,
            timestamp: Utc::now(),
            involved_users,
        }
    }

    /// Whether a resolved operation has been recorded.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved_operation.is_some()
    }
}

/// Outcome of running detection on one submitted operation.
///
/// Lives only for the duration of one submit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDetectionResult {
    /// Whether any conflict was found
    pub has_conflict: bool,
    /// Kind of conflict, when one was found
    pub conflict_type: Option<ConflictType>,
    /// Operations involved, the submitted one last
    pub conflicting_operations: Vec<Operation>,
    /// Suggested (unresolved) resolution
    pub suggested_resolution: Option<ConflictResolution>,
}

impl ConflictDetectionResult {
    /// A result reporting no conflict.
    #[must_use]
    pub fn none() -> Self {
        Self {
            has_conflict: false,
            conflict_type: None,
            conflicting_operations: Vec::new(),
            suggested_resolution: None,
        }
    }

    fn conflict(
        resource: &ResourceKey,
        conflict_type: ConflictType,
        operations: Vec<Operation>,
        strategy: ResolutionStrategy,
    ) -> Self {
        let suggestion =
            ConflictResolution::new(resource.clone(), conflict_type, operations.clone(), strategy);
        Self {
            has_conflict: true,
            conflict_type: Some(conflict_type),
            conflicting_operations: operations,
            suggested_resolution: Some(suggestion),
        }
    }
}

/// Classifies submitted operations against version vectors and the pending log.
#[derive(Clone)]
pub struct ConflictDetector {
    versions: VersionTracker,
    pending: Arc<dyn PendingOperationStore>,
    permissions: Option<Arc<dyn EditPermissions>>,
    window_ms: u64,
}

impl ConflictDetector {
    /// Create a detector with the given conflict window.
    #[must_use]
    pub fn new(
        versions: VersionTracker,
        pending: Arc<dyn PendingOperationStore>,
        window_ms: u64,
    ) -> Self {
        Self {
            versions,
            pending,
            permissions: None,
            window_ms,
        }
    }

    /// Builder: consult `permissions` before the other checks.
    #[must_use]
    pub fn with_permissions(mut self, permissions: Arc<dyn EditPermissions>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Classify `op` against current state. Never fails.
    #[must_use]
    pub fn detect_conflicts(&self, op: &Operation) -> ConflictDetectionResult {
        let resource = &op.resource;

        if let Some(permissions) = &self.permissions {
            match permissions.can_edit(&op.user_id, resource) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(
                        resource = %resource,
                        user_id = %op.user_id,
                        "Edit denied by permissions"
                    );
                    return ConflictDetectionResult::conflict(
                        resource,
                        ConflictType::PermissionConflict,
                        vec![op.clone()],
                        ResolutionStrategy::UserChoice,
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        resource = %resource,
                        "Permission lookup failed, allowing edit"
                    );
                }
            }
        }

        match self.versions.current_version(resource) {
            Ok(Some(current)) if op.version < current.version => {
                tracing::debug!(
                    resource = %resource,
                    op_id = %op.id,
                    based_on = op.version,
                    current = current.version,
                    "Stale operation"
                );
                return ConflictDetectionResult::conflict(
                    resource,
                    ConflictType::VersionMismatch,
                    vec![op.clone()],
                    ResolutionStrategy::OperationalTransform,
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    resource = %resource,
                    "Version lookup failed, skipping staleness check"
                );
            }
        }

        let pending = match self.pending.pending_operations(resource) {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    resource = %resource,
                    "Pending log lookup failed, treating as no conflict"
                );
                return ConflictDetectionResult::none();
            }
        };

        let mut concurrent: Vec<Operation> = pending
            .into_iter()
            .filter(|other| {
                other.id != op.id
                    && other.user_id != op.user_id
                    && other.timestamp.distance_ms(&op.timestamp) < self.window_ms
            })
            .collect();

        if concurrent.is_empty() {
            return ConflictDetectionResult::none();
        }

        tracing::debug!(
            resource = %resource,
            op_id = %op.id,
            concurrent = concurrent.len(),
            "Concurrent edit detected"
        );
        concurrent.push(op.clone());
        ConflictDetectionResult::conflict(
            resource,
            ConflictType::ConcurrentEdit,
            concurrent,
            ResolutionStrategy::OperationalTransform,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::hlc::Timestamp;
    use crate::store::{MemoryStore, VersionVectorStore};
    use crate::version::VersionVector;

    fn detector(store: &Arc<MemoryStore>) -> ConflictDetector {
        let versions = VersionTracker::new(store.clone());
        ConflictDetector::new(versions, store.clone(), DEFAULT_CONFLICT_WINDOW_MS)
    }

    fn update(user: &str, content: &str, ms: u64, version: u64) -> Operation {
        Operation::update(
            ResourceKey::task("t-1"),
            user,
            content,
            Timestamp::from_millis(ms),
        )
        .based_on(version)
    }

    #[test]
    fn empty_state_never_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let result = detector(&store).detect_conflicts(&update("alice", "x", 1_000, 0));

        assert_eq!(result, ConflictDetectionResult::none());
    }

    #[test]
    fn concurrent_updates_from_two_users() {
        let store = Arc::new(MemoryStore::new());
        let a = update("alice", "Hello", 10_000, 1);
        let b = update("bob", "World", 10_400, 1);
        store.append_pending(&a).unwrap();

        let result = detector(&store).detect_conflicts(&b);

        assert!(result.has_conflict);
        assert_eq!(result.conflict_type, Some(ConflictType::ConcurrentEdit));
        assert_eq!(result.conflicting_operations, vec![a, b]);
        let suggestion = result.suggested_resolution.unwrap();
        assert_eq!(suggestion.strategy, ResolutionStrategy::OperationalTransform);
        assert_eq!(suggestion.involved_users, vec!["alice", "bob"]);
    }

    #[test]
    fn same_user_is_not_concurrent() {
        let store = Arc::new(MemoryStore::new());
        store.append_pending(&update("alice", "a", 10_000, 1)).unwrap();

        let result = detector(&store).detect_conflicts(&update("alice", "b", 10_100, 1));
        assert!(!result.has_conflict);
    }

    #[test]
    fn outside_window_is_not_concurrent() {
        let store = Arc::new(MemoryStore::new());
        store.append_pending(&update("alice", "a", 10_000, 1)).unwrap();

        let result = detector(&store).detect_conflicts(&update("bob", "b", 11_000, 1));
        assert!(!result.has_conflict);
    }

    #[test]
    fn stale_version_reports_mismatch() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_vector(&VersionVector {
                resource: ResourceKey::task("t-1"),
                version: 4,
                last_modified: Utc::now(),
                last_modified_by: "alice".to_string(),
            })
            .unwrap();

        let stale = update("bob", "b", 10_000, 2);
        let result = detector(&store).detect_conflicts(&stale);

        assert_eq!(result.conflict_type, Some(ConflictType::VersionMismatch));
        assert_eq!(result.conflicting_operations, vec![stale]);
        assert_eq!(
            result.suggested_resolution.unwrap().strategy,
            ResolutionStrategy::OperationalTransform
        );
    }

    struct Unreachable;

    impl PendingOperationStore for Unreachable {
        fn append_pending(&self, _op: &Operation) -> Result<()> {
            Err(Error::StoreUnavailable("down".into()))
        }
        fn pending_operations(&self, _resource: &ResourceKey) -> Result<Vec<Operation>> {
            Err(Error::StoreUnavailable("down".into()))
        }
        fn clear_pending(&self, _resource: &ResourceKey) -> Result<usize> {
            Err(Error::StoreUnavailable("down".into()))
        }
    }

    impl VersionVectorStore for Unreachable {
        fn load_vector(&self, _resource: &ResourceKey) -> Result<Option<VersionVector>> {
            Err(Error::StoreUnavailable("down".into()))
        }
        fn save_vector(&self, _vector: &VersionVector) -> Result<()> {
            Err(Error::StoreUnavailable("down".into()))
        }
    }

    #[test]
    fn store_failures_fail_open() {
        let down = Arc::new(Unreachable);
        let detector = ConflictDetector::new(VersionTracker::new(down.clone()), down, 1000);

        let result = detector.detect_conflicts(&update("bob", "b", 10_000, 0));
        assert!(!result.has_conflict);
    }

    struct DenyAll;

    impl EditPermissions for DenyAll {
        fn can_edit(&self, _user_id: &str, _resource: &ResourceKey) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn denied_edit_is_permission_conflict() {
        let store = Arc::new(MemoryStore::new());
        let detector = detector(&store).with_permissions(Arc::new(DenyAll));

        let result = detector.detect_conflicts(&update("mallory", "x", 1, 0));
        assert_eq!(result.conflict_type, Some(ConflictType::PermissionConflict));
        assert_eq!(
            result.suggested_resolution.unwrap().strategy,
            ResolutionStrategy::UserChoice
        );
    }
}
