//! CLI configuration.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tandem_core::{EnginePolicy, MergeRule, ResolutionStrategy};

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// `SQLite` database path
    pub db_path: PathBuf,

    /// Detection and resolution policy
    pub policy: EnginePolicy,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./tandem.db"),
            policy: EnginePolicy::default(),
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TANDEM_DB_PATH`: `SQLite` database path
    /// - `TANDEM_CONFLICT_WINDOW_MS`: concurrency window in milliseconds
    /// - `TANDEM_MERGE_RULE`: "line_union" or "keep_latest"
    /// - `TANDEM_STRATEGY`: strategy forced for automatic resolutions
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_path) = std::env::var("TANDEM_DB_PATH") {
            config.db_path = PathBuf::from(db_path);
        }

        if let Ok(window) = std::env::var("TANDEM_CONFLICT_WINDOW_MS") {
            config.policy.conflict_window_ms = window
                .parse::<u64>()
                .context("Invalid TANDEM_CONFLICT_WINDOW_MS")?;
        }

        if let Ok(rule) = std::env::var("TANDEM_MERGE_RULE") {
            config.policy.merge_rule = rule
                .parse::<MergeRule>()
                .map_err(|e: String| anyhow!(e))
                .context("Invalid TANDEM_MERGE_RULE")?;
        }

        if let Ok(strategy) = std::env::var("TANDEM_STRATEGY") {
            config.policy.strategy_override = Some(
                strategy
                    .parse::<ResolutionStrategy>()
                    .map_err(|e: String| anyhow!(e))
                    .context("Invalid TANDEM_STRATEGY")?,
            );
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CliConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./tandem.db"));
        assert_eq!(config.policy.conflict_window_ms, 1000);
        assert_eq!(config.policy.merge_rule, MergeRule::LineUnion);
    }
}
