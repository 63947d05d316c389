//! # Tandem Core
//!
//! Concurrent-edit conflict resolution and version history for collaborative
//! task, project, and comment editing.
//!
//! This crate provides:
//! - Operation model with character-offset application
//! - Operational transformation of inserts, deletes, and updates
//! - Conflict detection (permission, staleness, concurrency window)
//! - Resolution strategies: last-write-wins, transform, merge, user choice
//! - Per-resource version vectors and an engine tying detection to apply
//! - Snapshot version history with diffs, rollback, and cleanup
//!
//! Persistence is injected through the traits in [`store`]; in-memory
//! implementations ship here, SQLite ones in `tandem-store`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod conflict;
pub mod engine;
pub mod error;
pub mod history;
pub mod hlc;
pub mod locks;
pub mod merge;
pub mod operation;
pub mod policy;
pub mod resolve;
pub mod resource;
pub mod store;
pub mod transform;
pub mod version;

pub use conflict::{
    ConflictDetectionResult, ConflictDetector, ConflictResolution, ConflictType,
    ResolutionStrategy,
};
pub use engine::{CollaborationEngine, EditOutcome, EditRequest, EngineStores};
pub use error::{Error, Result};
pub use history::{ChangeType, Content, DocumentVersion, FieldChange, VersionHistory, VersionRecord};
pub use hlc::{Hlc, Timestamp};
pub use merge::MergeRule;
pub use operation::{Operation, OperationKind, ResourceKey, ResourceType};
pub use policy::EnginePolicy;
pub use resolve::Resolver;
pub use resource::ResourceHandlers;
pub use store::{
    ContentStore, EditPermissions, MemoryContentStore, MemoryStore, PendingOperationStore,
    ResolutionStore, SnapshotStore, VersionVectorStore,
};
pub use transform::{transform, Priority, Transformer};
pub use version::{VersionTracker, VersionVector};
