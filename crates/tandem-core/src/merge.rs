//! Content merge rules for concurrent text edits.
//!
//! # Merge Rules
//!
//! | Rule | Result |
//! |------|--------|
//! | `LineUnion` | Lines of both sides, first-seen order, duplicates dropped |
//! | `KeepLatest` | The later side wins entirely |
//!
//! `LineUnion` is line-based and lossy for structural text. It is meant for
//! short human-authored fields such as task titles and comments.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How two concurrent contents are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRule {
    /// Union of newline-delimited lines, first-seen order preserved
    #[default]
    LineUnion,
    /// The later content replaces the earlier one
    KeepLatest,
}

impl MergeRule {
    /// Merge `earlier` and `later` according to this rule.
    #[must_use]
    pub fn apply(&self, earlier: &str, later: &str) -> String {
        match self {
            MergeRule::LineUnion => merge_lines(earlier, later),
            MergeRule::KeepLatest => later.to_string(),
        }
    }
}

impl std::str::FromStr for MergeRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "line_union" => Ok(Self::LineUnion),
            "keep_latest" => Ok(Self::KeepLatest),
            other => Err(format!("unknown merge rule '{other}'")),
        }
    }
}

/// Union the lines of `earlier` and `later`, keeping first-seen order and
/// dropping duplicate lines.
#[must_use]
pub fn merge_lines(earlier: &str, later: &str) -> String {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for line in earlier.lines().chain(later.lines()) {
        if seen.insert(line) {
            merged.push(line);
        }
    }

    merged.join("\n")
}
