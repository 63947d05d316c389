//! Tunable policy for the collaboration engine.

use crate::conflict::{ResolutionStrategy, DEFAULT_CONFLICT_WINDOW_MS};
use crate::merge::MergeRule;
use crate::transform::{Priority, Transformer};
use serde::{Deserialize, Serialize};

/// Heuristics governing detection and resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginePolicy {
    /// Two users' operations closer than this are concurrent
    pub conflict_window_ms: u64,
    /// How concurrent contents are combined
    pub merge_rule: MergeRule,
    /// Tie-breaking side for transformation
    pub priority: Priority,
    /// Strategy used instead of the detector's suggestion, if set
    pub strategy_override: Option<ResolutionStrategy>,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            conflict_window_ms: DEFAULT_CONFLICT_WINDOW_MS,
            merge_rule: MergeRule::LineUnion,
            priority: Priority::Committed,
            strategy_override: None,
        }
    }
}

impl EnginePolicy {
    /// Transformer configured from this policy.
    #[must_use]
    pub fn transformer(&self) -> Transformer {
        Transformer::new(self.priority, self.merge_rule)
    }

    /// Strategy to apply given the detector's suggestion.
    #[must_use]
    pub fn strategy_for(&self, suggested: ResolutionStrategy) -> ResolutionStrategy {
        // Permission conflicts always need a person.
        if suggested == ResolutionStrategy::UserChoice {
            return suggested;
        }
        self.strategy_override.unwrap_or(suggested)
    }
}
