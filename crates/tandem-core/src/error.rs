//! Error types for tandem-core.

use crate::conflict::ConflictResolution;
use crate::operation::ResourceKey;

/// Result type alias using tandem-core's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the collaboration and version history engines.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A referenced resource or version does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The edit was computed against an outdated version and could not be rebased
    #[error("stale edit on {resource}: based on version {based_on}, current is {current}")]
    Stale {
        /// Resource the edit targeted
        resource: ResourceKey,
        /// Version the edit was computed against
        based_on: u64,
        /// Current version of the resource
        current: u64,
    },

    /// Automatic resolution was not possible; the caller must pick a winner
    #[error("conflict on {} requires a user choice", .0.resource)]
    Unresolvable(Box<ConflictResolution>),

    /// The underlying persistence layer could not be reached
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The operation is malformed or cannot be applied to the current content
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A stored record could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
