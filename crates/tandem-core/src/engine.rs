//! Collaboration engine: the single entry point for live edits.
//!
//! `submit_edit` runs detect -> resolve -> apply -> advance for one edit while
//! holding the critical section of the edited resource:
//!
//! 1. The conflict detector classifies the operation.
//! 2. On conflict, the inputs are the applied operations involved, in log
//!    order, plus the edit. For a stale operation those are the pending
//!    operations it has not seen.
//! 3. The edit is rebased over the applied inputs one by one, or replaced by
//!    the strategy's winner, and applied to the resource content.
//! 4. The operation is appended to the pending log and the version vector
//!    advances by exactly one. If either step fails the previous content is
//!    written back.
//!
//! A winner that is already in the pending log supersedes the edit: nothing is
//! applied and the version does not move.

use crate::conflict::{ConflictDetector, ConflictResolution, ConflictType, ResolutionStrategy};
use crate::error::{Error, Result};
use crate::hlc::Hlc;
use crate::locks::KeyedLocks;
use crate::operation::{Operation, OperationKind, ResourceKey};
use crate::policy::EnginePolicy;
use crate::resolve::Resolver;
use crate::resource::ResourceHandlers;
use crate::store::{
    EditPermissions, MemoryStore, PendingOperationStore, ResolutionStore, VersionVectorStore,
};
use crate::version::{VersionTracker, VersionVector};
use std::sync::{Arc, Mutex, PoisonError};

/// Stores the engine reads and writes.
#[derive(Clone)]
pub struct EngineStores {
    /// Version vectors
    pub versions: Arc<dyn VersionVectorStore>,
    /// Pending operation log
    pub pending: Arc<dyn PendingOperationStore>,
    /// Resolution audit trail
    pub resolutions: Arc<dyn ResolutionStore>,
}

impl EngineStores {
    /// Use one backend for every store.
    #[must_use]
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: VersionVectorStore + PendingOperationStore + ResolutionStore + 'static,
    {
        Self {
            versions: store.clone(),
            pending: store.clone(),
            resolutions: store,
        }
    }

    /// Fresh in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::shared(Arc::new(MemoryStore::new()))
    }
}

/// A content edit submitted by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    /// Resource being edited
    pub resource: ResourceKey,
    /// Author
    pub user_id: String,
    /// New content
    pub content: String,
    /// Position of the edit
    pub position: usize,
    /// Version the author saw; the current version when `None`
    pub base_version: Option<u64>,
}

impl EditRequest {
    /// An edit replacing the content of `resource`.
    #[must_use]
    pub fn new(
        resource: ResourceKey,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            user_id: user_id.into(),
            content: content.into(),
            position: 0,
            base_version: None,
        }
    }

    /// Builder: set the position.
    #[must_use]
    pub fn at(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    /// Builder: set the version the author saw.
    #[must_use]
    pub fn based_on(mut self, version: u64) -> Self {
        self.base_version = Some(version);
        self
    }
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    /// The operation that was applied, or the one that superseded the edit
    pub operation: Operation,
    /// Resource content after the submission
    pub content: String,
    /// Version vector after the submission
    pub version: Option<VersionVector>,
    /// How a conflict was resolved, if there was one
    pub resolution: Option<ConflictResolution>,
    /// Whether the edit changed the resource
    pub applied: bool,
}

impl EditOutcome {
    /// Operations that conflicted with the edit (empty without a conflict).
    #[must_use]
    pub fn conflicts(&self) -> &[Operation] {
        self.resolution
            .as_ref()
            .map(|r| r.operations.as_slice())
            .unwrap_or_default()
    }
}

/// Detects, resolves, and applies concurrent edits.
pub struct CollaborationEngine {
    policy: EnginePolicy,
    clock: Mutex<Hlc>,
    tracker: VersionTracker,
    detector: ConflictDetector,
    resolver: Resolver,
    pending: Arc<dyn PendingOperationStore>,
    resolutions: Arc<dyn ResolutionStore>,
    resources: ResourceHandlers,
    locks: KeyedLocks,
}

impl CollaborationEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(stores: EngineStores, resources: ResourceHandlers, policy: EnginePolicy) -> Self {
        let tracker = VersionTracker::new(stores.versions);
        let detector = ConflictDetector::new(
            tracker.clone(),
            stores.pending.clone(),
            policy.conflict_window_ms,
        );

        Self {
            policy,
            clock: Mutex::new(Hlc::new()),
            tracker,
            detector,
            resolver: Resolver::new(policy.transformer()),
            pending: stores.pending,
            resolutions: stores.resolutions,
            resources,
            locks: KeyedLocks::new(),
        }
    }

    /// Builder: consult `permissions` during detection.
    #[must_use]
    pub fn with_permissions(mut self, permissions: Arc<dyn EditPermissions>) -> Self {
        self.detector = self.detector.with_permissions(permissions);
        self
    }

    /// Submit a content edit.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the resource does not exist
    /// - [`Error::Stale`] if the edit is outdated and cannot be rebased
    /// - [`Error::Unresolvable`] if the conflict needs a user choice
    /// - [`Error::StoreUnavailable`] if resolution or apply cannot persist
    pub fn submit_edit(&self, request: EditRequest) -> Result<EditOutcome> {
        let base_version = match request.base_version {
            Some(version) => version,
            None => self
                .tracker
                .current_version(&request.resource)?
                .map_or(0, |v| v.version),
        };

        let op = Operation::update(request.resource, request.user_id, request.content, self.tick())
            .at(request.position)
            .based_on(base_version);
        self.submit_operation(op)
    }

    /// Submit a caller-built operation.
    ///
    /// # Errors
    ///
    /// Same as [`Self::submit_edit`], plus [`Error::InvalidOperation`] for a
    /// malformed operation or one that does not fit the current content.
    pub fn submit_operation(&self, op: Operation) -> Result<EditOutcome> {
        op.validate()?;
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(op.timestamp);

        let resource = op.resource.clone();
        self.locks.with(&resource, || self.submit_locked(op))
    }

    /// Pending operations of `resource`, in the order they were applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the pending log cannot be read.
    pub fn get_operation_history(&self, resource: &ResourceKey) -> Result<Vec<Operation>> {
        self.pending.pending_operations(resource)
    }

    /// Clear the pending log of `resource`, e.g. after a commit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the pending log cannot be written.
    pub fn clear_pending(&self, resource: &ResourceKey) -> Result<usize> {
        self.locks
            .with(resource, || self.pending.clear_pending(resource))
    }

    /// Current version vector of `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the version store cannot be read.
    pub fn current_version(&self, resource: &ResourceKey) -> Result<Option<VersionVector>> {
        self.tracker.current_version(resource)
    }

    /// Recorded conflict resolutions of `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the resolution store cannot be read.
    pub fn resolutions(&self, resource: &ResourceKey) -> Result<Vec<ConflictResolution>> {
        self.resolutions.resolutions(resource)
    }

    fn tick(&self) -> crate::hlc::Timestamp {
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick()
    }

    fn submit_locked(&self, op: Operation) -> Result<EditOutcome> {
        let detection = self.detector.detect_conflicts(&op);
        let resource = op.resource.clone();

        let handler = self.resources.handler(resource.resource_type);
        let current = handler
            .load_content(&resource.resource_id)?
            .ok_or_else(|| Error::NotFound(resource.to_string()))?;

        let (winner, resolution) = match detection.suggested_resolution {
            Some(suggestion) if detection.has_conflict => {
                let settled = self.resolve_conflict(&op, suggestion)?;
                let winner = settled
                    .resolved_operation
                    .clone()
                    .unwrap_or_else(|| op.clone());
                (winner, Some(settled))
            }
            _ => (op.clone(), None),
        };

        let applied = self.pending.pending_operations(&resource)?;
        if applied.contains(&winner) {
            tracing::info!(
                resource = %resource,
                op_id = %op.id,
                winner = %winner.id,
                "Edit superseded by an applied operation"
            );
            return Ok(EditOutcome {
                operation: winner,
                content: current,
                version: self.tracker.current_version(&resource)?,
                resolution,
                applied: false,
            });
        }

        let mut winner = winner;
        winner.version = self
            .tracker
            .current_version(&resource)?
            .map_or(0, |v| v.version);

        let content = winner.apply_to(&current)?;
        handler.update_resource_content(&resource.resource_id, &content)?;
        let version = match self.commit(&winner, &op.user_id) {
            Ok(version) => version,
            Err(err) => {
                let restored = handler.update_resource_content(&resource.resource_id, &current);
                if let Err(restore) = restored {
                    tracing::warn!(
                        error = %restore,
                        resource = %resource,
                        "Failed to restore content after a failed commit"
                    );
                }
                return Err(err);
            }
        };

        tracing::debug!(
            resource = %resource,
            op_id = %winner.id,
            kind = %winner.kind,
            version = version.version,
            conflict = resolution.is_some(),
            "Applied operation"
        );

        Ok(EditOutcome {
            operation: winner,
            content,
            version: Some(version),
            resolution,
            applied: true,
        })
    }

    /// Log `op` as applied and advance the version.
    ///
    /// If the advance fails the operation stays in the pending log; the
    /// version is never advanced without a logged operation.
    fn commit(&self, op: &Operation, user_id: &str) -> Result<VersionVector> {
        self.pending.append_pending(op)?;
        self.tracker.advance(&op.resource, user_id)
    }

    fn resolve_conflict(
        &self,
        op: &Operation,
        suggestion: ConflictResolution,
    ) -> Result<ConflictResolution> {
        let mut resolution = if suggestion.conflict_type == ConflictType::VersionMismatch {
            self.rebase_inputs(op, suggestion)?
        } else {
            suggestion
        };
        resolution.strategy = self.policy.strategy_for(resolution.strategy);

        // Inputs are the applied operations in log order, then `op`.
        let applied = resolution
            .operations
            .split_last()
            .map(|(_, applied)| applied.to_vec())
            .unwrap_or_default();

        let resolved = match resolution.strategy {
            ResolutionStrategy::UserChoice => {
                self.resolutions.record_resolution(&resolution)?;
                return Err(Error::Unresolvable(Box::new(resolution)));
            }
            ResolutionStrategy::LastWriteWins => {
                let winner = self.resolver.resolve(&resolution)?;
                if winner.id == op.id {
                    self.rebase(op, &applied, false)
                } else {
                    winner
                }
            }
            ResolutionStrategy::Merge => self.resolver.resolve(&resolution)?,
            ResolutionStrategy::OperationalTransform => self.rebase(op, &applied, true),
        };

        tracing::info!(
            resolution_id = %resolution.id,
            resource = %resolution.resource,
            conflict_type = %resolution.conflict_type,
            strategy = %resolution.strategy,
            inputs = resolution.operations.len(),
            resolved_op = %resolved.id,
            "Resolved conflict"
        );
        resolution.resolved_operation = Some(resolved);

        self.resolutions.record_resolution(&resolution)?;
        Ok(resolution)
    }

    /// Rewrite `op` so it applies on top of `applied`, taken in log order.
    ///
    /// Positions shift only over operations `op` was not based on. Two updates
    /// merge their contents when `merge_updates` is set; otherwise `op` keeps
    /// its own content.
    fn rebase(&self, op: &Operation, applied: &[Operation], merge_updates: bool) -> Operation {
        let transformer = self.policy.transformer();
        applied.iter().fold(op.clone(), |running, prior| {
            if running.kind == OperationKind::Update && prior.kind == OperationKind::Update {
                if !merge_updates {
                    return running;
                }
                let content = transformer.merge_rule.apply(
                    prior.content.as_deref().unwrap_or_default(),
                    running.content.as_deref().unwrap_or_default(),
                );
                return Operation {
                    content: Some(content),
                    ..running
                };
            }
            if prior.version >= op.version {
                transformer.transform(&running, prior)
            } else {
                running
            }
        })
    }

    /// Inputs for a stale operation: the applied operations it has not seen,
    /// in log order, then itself.
    fn rebase_inputs(
        &self,
        op: &Operation,
        suggestion: ConflictResolution,
    ) -> Result<ConflictResolution> {
        let mut unseen: Vec<Operation> = self
            .pending
            .pending_operations(&op.resource)?
            .into_iter()
            .filter(|applied| applied.id != op.id && applied.version >= op.version)
            .collect();

        if unseen.is_empty() {
            let current = self
                .tracker
                .current_version(&op.resource)?
                .map_or(op.version, |v| v.version);
            return Err(Error::Stale {
                resource: op.resource.clone(),
                based_on: op.version,
                current,
            });
        }

        unseen.push(op.clone());
        Ok(ConflictResolution::new(
            op.resource.clone(),
            ConflictType::VersionMismatch,
            unseen,
            suggestion.strategy,
        ))
    }
}
