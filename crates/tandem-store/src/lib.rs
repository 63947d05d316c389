//! # Tandem Store
//!
//! `SQLite` implementations of the Tandem store traits.
//!
//! One database file holds version vectors, the pending operation log,
//! document versions with their diffs, the resolution audit trail, and the
//! content of tasks, projects, and comments.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod content;
pub mod sqlite;

pub use content::SqliteContentStore;
pub use sqlite::SqliteStore;
