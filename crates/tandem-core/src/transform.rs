//! Operational transformation of concurrent edits.
//!
//! `transform(a, b)` rewrites `a` so that it keeps its intent when applied
//! after `b`. The result is a copy of `a` (same id) with adjusted position,
//! length, or content. The function is pure.
//!
//! # Rules
//!
//! | `a` | `b` | Adjustment |
//! |-----|-----|------------|
//! | insert | insert | `b.position <= a.position`: shift `a` forward by `b`'s content length |
//! | insert | delete | `b.position < a.position`: shift `a` back by `b.length` |
//! | delete | insert | `b.position <= a.position`: shift `a` forward by `b`'s content length |
//! | delete | delete | `b.position < a.position`: shift back; equal: length = max of both |
//! | update | update | equal position and `b` newer: contents merged |
//! | other | | unchanged |
//!
//! Backward shifts never move `a` before `b.position`, so transformed
//! positions stay non-negative and inside the text `b` left behind.

use crate::merge::MergeRule;
use crate::operation::{Operation, OperationKind};
use serde::{Deserialize, Serialize};

/// Which side wins when two operations touch the same position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// The operation transformed against (already committed) wins ties
    #[default]
    Committed,
    /// The operation being transformed wins ties
    Incoming,
}

/// Transformation settings shared by every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transformer {
    /// Tie-breaking side
    pub priority: Priority,
    /// Rule used for update-vs-update content merges
    pub merge_rule: MergeRule,
}

impl Transformer {
    /// Create a transformer.
    #[must_use]
    pub fn new(priority: Priority, merge_rule: MergeRule) -> Self {
        Self {
            priority,
            merge_rule,
        }
    }

    /// Rewrite `op` as if `against` had been applied first.
    ///
    /// Operations on different resources are returned unchanged.
    #[must_use]
    pub fn transform(&self, op: &Operation, against: &Operation) -> Operation {
        let mut out = op.clone();
        if op.resource != against.resource {
            return out;
        }

        let committed_wins = self.priority == Priority::Committed;
        // Position tie goes to `against` only when it has priority.
        let precedes = |b: usize, a: usize| if committed_wins { b <= a } else { b < a };

        match (op.kind, against.kind) {
            (OperationKind::Insert | OperationKind::Delete, OperationKind::Insert) => {
                if precedes(against.position, op.position) {
                    out.position = op.position + against.content_len();
                }
            }
            (OperationKind::Insert, OperationKind::Delete) => {
                if against.position < op.position {
                    out.position = shift_back(op.position, against);
                }
            }
            (OperationKind::Delete, OperationKind::Delete) => {
                if against.position < op.position {
                    out.position = shift_back(op.position, against);
                } else if against.position == op.position {
                    out.length = Some(op.delete_len().max(against.delete_len()));
                }
            }
            (OperationKind::Update, OperationKind::Update) => {
                if against.position == op.position
                    && committed_wins
                    && against.timestamp > op.timestamp
                {
                    out.content = Some(self.merge_rule.apply(
                        op.content.as_deref().unwrap_or_default(),
                        against.content.as_deref().unwrap_or_default(),
                    ));
                }
            }
            _ => {}
        }

        if out != *op {
            tracing::debug!(
                op_id = %op.id,
                against_id = %against.id,
                kind = %op.kind,
                from = op.position,
                to = out.position,
                "Transformed operation"
            );
        }
        out
    }
}

/// Transform `op` against the committed operation `against` with default
/// settings (committed side wins ties, line-union merge).
#[must_use]
pub fn transform(op: &Operation, against: &Operation) -> Operation {
    Transformer::default().transform(op, against)
}

/// Move `position` back over the range deleted by `against`, never past its start.
fn shift_back(position: usize, against: &Operation) -> usize {
    let removed_before = against.delete_len().min(position - against.position);
    position - removed_before
}
