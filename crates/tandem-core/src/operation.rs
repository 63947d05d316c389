//! Operation model: the atomic unit of change on a task, project, or comment.

use crate::error::{Error, Result};
use crate::hlc::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of resource an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A task
    Task,
    /// A project
    Project,
    /// A comment on a task or project
    Comment,
}

impl ResourceType {
    /// Wire name of the resource type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Task => "task",
            ResourceType::Project => "project",
            ResourceType::Comment => "comment",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "task" => Ok(Self::Task),
            "project" => Ok(Self::Project),
            "comment" => Ok(Self::Comment),
            other => Err(Error::InvalidOperation(format!(
                "unknown resource type '{other}'"
            ))),
        }
    }
}

/// Identifies exactly one resource: `(resource_type, resource_id)`.
///
/// Version vectors, pending operation logs, and document version chains are
/// all keyed by this value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Kind of resource
    pub resource_type: ResourceType,
    /// Resource identifier within its type
    pub resource_id: String,
}

impl ResourceKey {
    /// Create a new resource key.
    #[must_use]
    pub fn new(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    /// Key for a task.
    #[must_use]
    pub fn task(resource_id: impl Into<String>) -> Self {
        Self::new(ResourceType::Task, resource_id)
    }

    /// Key for a project.
    #[must_use]
    pub fn project(resource_id: impl Into<String>) -> Self {
        Self::new(ResourceType::Project, resource_id)
    }

    /// Key for a comment.
    #[must_use]
    pub fn comment(resource_id: impl Into<String>) -> Self {
        Self::new(ResourceType::Comment, resource_id)
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource_id)
    }
}

/// The kind of edit an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Insert `content` at `position`
    Insert,
    /// Delete `length` characters starting at `position`
    Delete,
    /// Replace the resource content with `content`
    Update,
    /// Move the resource to `position` within its parent collection
    Move,
}

impl OperationKind {
    /// Wire name of the operation kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Delete => "delete",
            OperationKind::Update => "update",
            OperationKind::Move => "move",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single edit authored by one user against one resource.
///
/// Positions and lengths count characters, not bytes. `version` is the
/// version vector value the author saw when computing the edit and is what
/// staleness detection compares against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique operation identifier
    pub id: String,
    /// Kind of edit
    pub kind: OperationKind,
    /// Character offset; meaning depends on `kind`
    pub position: usize,
    /// Text payload for insert and update
    pub content: Option<String>,
    /// Number of characters removed by a delete
    pub length: Option<usize>,
    /// Author of the edit
    pub user_id: String,
    /// Logical + wall-clock timestamp of the edit
    pub timestamp: Timestamp,
    /// Target resource
    pub resource: ResourceKey,
    /// Version the edit was computed against
    pub version: u64,
}

impl Operation {
    /// Create an operation with a fresh id at position 0 and version 0.
    #[must_use]
    pub fn new(
        kind: OperationKind,
        resource: ResourceKey,
        user_id: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            position: 0,
            content: None,
            length: None,
            user_id: user_id.into(),
            timestamp,
            resource,
            version: 0,
        }
    }

    /// Insert `content` at `position`.
    #[must_use]
    pub fn insert(
        resource: ResourceKey,
        user_id: impl Into<String>,
        position: usize,
        content: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(OperationKind::Insert, resource, user_id, timestamp)
            .at(position)
            .with_content(content)
    }

    /// Delete `length` characters at `position`.
    #[must_use]
    pub fn delete(
        resource: ResourceKey,
        user_id: impl Into<String>,
        position: usize,
        length: usize,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(OperationKind::Delete, resource, user_id, timestamp)
            .at(position)
            .with_length(length)
    }

    /// Replace the content of the resource.
    #[must_use]
    pub fn update(
        resource: ResourceKey,
        user_id: impl Into<String>,
        content: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(OperationKind::Update, resource, user_id, timestamp).with_content(content)
    }

    /// Builder: set the id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: set the position.
    #[must_use]
    pub fn at(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    /// Builder: set the content payload.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Builder: set the delete length.
    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Builder: set the version the edit was computed against.
    #[must_use]
    pub fn based_on(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Length of the content payload in characters (0 when absent).
    #[must_use]
    pub fn content_len(&self) -> usize {
        self.content.as_deref().map_or(0, |c| c.chars().count())
    }

    /// Delete length (0 when absent).
    #[must_use]
    pub fn delete_len(&self) -> usize {
        self.length.unwrap_or(0)
    }

    /// Check the fields required by the operation kind are present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] when an insert or update lacks
    /// content, or a delete lacks a length.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            OperationKind::Insert | OperationKind::Update if self.content.is_none() => Err(
                Error::InvalidOperation(format!("{} {} has no content", self.kind, self.id)),
            ),
            OperationKind::Delete if self.length.is_none() => Err(Error::InvalidOperation(
                format!("delete {} has no length", self.id),
            )),
            _ => Ok(()),
        }
    }

    /// Apply this operation to the current text of its resource.
    ///
    /// Deletes running past the end are clamped; move leaves text unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if the operation is malformed or its
    /// position lies beyond the end of `text`.
    pub fn apply_to(&self, text: &str) -> Result<String> {
        self.validate()?;
        let char_count = text.chars().count();

        match self.kind {
            OperationKind::Insert => {
                if self.position > char_count {
                    return Err(Error::InvalidOperation(format!(
                        "insert position {} beyond length {char_count}",
                        self.position
                    )));
                }
                let at = byte_offset(text, self.position);
                let mut out = String::with_capacity(text.len() + self.content_len());
                out.push_str(&text[..at]);
                out.push_str(self.content.as_deref().unwrap_or_default());
                out.push_str(&text[at..]);
                Ok(out)
            }
            OperationKind::Delete => {
                if self.position > char_count {
                    return Err(Error::InvalidOperation(format!(
                        "delete position {} beyond length {char_count}",
                        self.position
                    )));
                }
                let end = self.position.saturating_add(self.delete_len()).min(char_count);
                let start_byte = byte_offset(text, self.position);
                let end_byte = byte_offset(text, end);
                let mut out = String::with_capacity(text.len());
                out.push_str(&text[..start_byte]);
                out.push_str(&text[end_byte..]);
                Ok(out)
            }
            OperationKind::Update => Ok(self.content.clone().unwrap_or_default()),
            OperationKind::Move => Ok(text.to_string()),
        }
    }
}

/// Byte offset of the `chars`-th character, or `text.len()` past the end.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(offset, _)| offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn resource_key_display() {
        assert_eq!(ResourceKey::task("t-1").to_string(), "task:t-1");
        assert_eq!(ResourceKey::comment("c-9").to_string(), "comment:c-9");
    }

    #[test]
    fn resource_type_parse() {
        assert_eq!("project".parse::<ResourceType>().unwrap(), ResourceType::Project);
        assert!("workspace".parse::<ResourceType>().is_err());
    }

    #[test]
    fn insert_applies_at_char_offset() {
        let op = Operation::insert(ResourceKey::task("t"), "alice", 2, "X", ts(1));
        assert_eq!(op.apply_to("héllo").unwrap(), "héXllo");
        assert_eq!(op.apply_to("ab").unwrap(), "abX");
    }

    #[test]
    fn insert_past_end_is_invalid() {
        let op = Operation::insert(ResourceKey::task("t"), "alice", 9, "X", ts(1));
        assert!(matches!(op.apply_to("abc"), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn delete_clamps_to_end() {
        let op = Operation::delete(ResourceKey::task("t"), "alice", 3, 10, ts(1));
        assert_eq!(op.apply_to("abcdef").unwrap(), "abc");
    }

    #[test]
    fn update_replaces_and_move_keeps_text() {
        let key = ResourceKey::project("p");
        let update = Operation::update(key.clone(), "bob", "new title", ts(1));
        assert_eq!(update.apply_to("old title").unwrap(), "new title");

        let mv = Operation::new(OperationKind::Move, key, "bob", ts(2)).at(4);
        assert_eq!(mv.apply_to("unchanged").unwrap(), "unchanged");
    }

    #[test]
    fn validate_requires_payload() {
        let key = ResourceKey::task("t");
        let bad_delete = Operation::new(OperationKind::Delete, key.clone(), "a", ts(1));
        let bad_insert = Operation::new(OperationKind::Insert, key, "a", ts(1));

        assert!(bad_delete.validate().is_err());
        assert!(bad_insert.validate().is_err());
    }

    #[test]
    fn operation_serializes_with_snake_case_kind() {
        let op = Operation::update(ResourceKey::task("t"), "a", "x", ts(5)).with_id("op-1");
        let json = serde_json::to_value(&op).unwrap();

        assert_eq!(json["kind"], "update");
        assert_eq!(json["resource"]["resource_type"], "task");
    }
}
