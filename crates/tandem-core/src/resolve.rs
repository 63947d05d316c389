//! Resolution strategies: reduce a set of conflicting operations to one.

use crate::conflict::{ConflictResolution, ResolutionStrategy};
use crate::error::{Error, Result};
use crate::hlc::Timestamp;
use crate::operation::{Operation, OperationKind};
use crate::transform::Transformer;
use uuid::Uuid;

/// Applies a [`ResolutionStrategy`] to a [`ConflictResolution`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    transformer: Transformer,
}

impl Resolver {
    /// Create a resolver using `transformer` for rebasing and content merges.
    #[must_use]
    pub fn new(transformer: Transformer) -> Self {
        Self { transformer }
    }

    /// Produce the single operation selected by `resolution.strategy`.
    ///
    /// `UserChoice` returns the first operation untouched; it is a signal to
    /// the caller, not a decision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if the resolution has no operations.
    pub fn resolve(&self, resolution: &ConflictResolution) -> Result<Operation> {
        let ops = &resolution.operations;
        let first = ops.first().ok_or_else(|| {
            Error::InvalidOperation(format!("resolution {} has no operations", resolution.id))
        })?;

        let resolved = match resolution.strategy {
            ResolutionStrategy::LastWriteWins => last_write_wins(first, ops),
            ResolutionStrategy::OperationalTransform => self.transform_chain(first, ops),
            ResolutionStrategy::Merge => self.merge(first, ops),
            ResolutionStrategy::UserChoice => first.clone(),
        };
        Ok(resolved)
    }

    /// Rebase operations onto each other in timestamp order.
    ///
    /// Each later operation is transformed against the running result. Two
    /// updates are combined by merging their contents; otherwise the rebased
    /// later operation becomes the running result.
    fn transform_chain(&self, first: &Operation, ops: &[Operation]) -> Operation {
        let mut ordered: Vec<&Operation> = ops.iter().collect();
        ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let mut iter = ordered.into_iter();
        let earliest = iter.next().unwrap_or(first);

        iter.fold(earliest.clone(), |running, next| {
            let rebased = self.transformer.transform(next, &running);
            self.combine(&running, rebased)
        })
    }

    fn combine(&self, running: &Operation, rebased: Operation) -> Operation {
        if running.kind == OperationKind::Update && rebased.kind == OperationKind::Update {
            let content = self.transformer.merge_rule.apply(
                running.content.as_deref().unwrap_or_default(),
                rebased.content.as_deref().unwrap_or_default(),
            );
            return Operation {
                content: Some(content),
                ..rebased
            };
        }
        rebased
    }

    /// Fold all contents through the merge rule into a fresh synthetic update.
    fn merge(&self, first: &Operation, ops: &[Operation]) -> Operation {
        let seed = first.content.clone().unwrap_or_default();
        let merged = ops.iter().skip(1).fold(seed, |acc, next| {
            self.transformer
                .merge_rule
                .apply(&acc, next.content.as_deref().unwrap_or_default())
        });

        let latest = ops.iter().max_by_key(|op| op.timestamp).unwrap_or(first);
        let timestamp = Timestamp::now().max(latest.timestamp);

        Operation {
            id: Uuid::new_v4().to_string(),
            kind: OperationKind::Update,
            position: first.position,
            content: Some(merged),
            length: None,
            user_id: latest.user_id.clone(),
            timestamp,
            resource: first.resource.clone(),
            version: ops.iter().map(|op| op.version).max().unwrap_or_default(),
        }
    }
}

/// Latest timestamp wins; equal timestamps go to the lexically greatest id.
fn last_write_wins(first: &Operation, ops: &[Operation]) -> Operation {
    ops.iter()
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
        .unwrap_or(first)
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictType;
    use crate::operation::ResourceKey;

    fn key() -> ResourceKey {
        ResourceKey::task("t-1")
    }

    fn ts(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn resolution(ops: Vec<Operation>, strategy: ResolutionStrategy) -> ConflictResolution {
        ConflictResolution::new(key(), ConflictType::ConcurrentEdit, ops, strategy)
    }

    #[test]
    fn last_write_wins_picks_latest() {
        let a = Operation::update(key(), "alice", "A", ts(10)).with_id("a");
        let b = Operation::update(key(), "bob", "B", ts(20)).with_id("b");

        let r = resolution(vec![b.clone(), a], ResolutionStrategy::LastWriteWins);
        assert_eq!(Resolver::default().resolve(&r).unwrap(), b);
    }

    #[test]
    fn last_write_wins_tie_is_deterministic() {
        let a = Operation::update(key(), "alice", "A", ts(10)).with_id("op-a");
        let b = Operation::update(key(), "bob", "B", ts(10)).with_id("op-b");

        let resolver = Resolver::default();
        let forward = resolution(vec![a.clone(), b.clone()], ResolutionStrategy::LastWriteWins);
        let backward = resolution(vec![b.clone(), a], ResolutionStrategy::LastWriteWins);

        assert_eq!(resolver.resolve(&forward).unwrap(), b);
        assert_eq!(resolver.resolve(&backward).unwrap(), b);
        assert_eq!(
            resolver.resolve(&forward).unwrap(),
            resolver.resolve(&forward).unwrap()
        );
    }

    #[test]
    fn transform_chain_merges_updates() {
        let a = Operation::update(key(), "alice", "Hello", ts(10));
        let b = Operation::update(key(), "bob", "World", ts(20));

        let r = resolution(vec![b.clone(), a], ResolutionStrategy::OperationalTransform);
        let resolved = Resolver::default().resolve(&r).unwrap();

        assert_eq!(resolved.id, b.id);
        assert_eq!(resolved.content.as_deref(), Some("Hello\nWorld"));
    }

    #[test]
    fn transform_chain_rebases_insert() {
        let earlier = Operation::insert(key(), "bob", 1, "X", ts(10));
        let later = Operation::insert(key(), "alice", 2, "AB", ts(20));

        let r = resolution(vec![later.clone(), earlier], ResolutionStrategy::OperationalTransform);
        let resolved = Resolver::default().resolve(&r).unwrap();

        assert_eq!(resolved.id, later.id);
        assert_eq!(resolved.position, 3);
    }

    #[test]
    fn merge_builds_synthetic_operation() {
        let a = Operation::update(key(), "alice", "line1\nline2", ts(10));
        let b = Operation::update(key(), "bob", "line2\nline3", ts(20));

        let r = resolution(vec![a.clone(), b.clone()], ResolutionStrategy::Merge);
        let merged = Resolver::default().resolve(&r).unwrap();

        assert_eq!(merged.content.as_deref(), Some("line1\nline2\nline3"));
        assert_ne!(merged.id, a.id);
        assert_ne!(merged.id, b.id);
        assert!(merged.timestamp >= b.timestamp);
    }

    #[test]
    fn user_choice_returns_first_untouched() {
        let a = Operation::update(key(), "alice", "A", ts(10));
        let b = Operation::update(key(), "bob", "B", ts(20));

        let r = resolution(vec![a.clone(), b], ResolutionStrategy::UserChoice);
        assert_eq!(Resolver::default().resolve(&r).unwrap(), a);
    }

    #[test]
    fn empty_resolution_is_rejected() {
        let r = resolution(Vec::new(), ResolutionStrategy::Merge);
        assert!(matches!(
            Resolver::default().resolve(&r),
            Err(Error::InvalidOperation(_))
        ));
    }
}
