//! Dispatch of content reads and writes to one handler per resource type.

use crate::operation::ResourceType;
use crate::store::ContentStore;
use std::sync::Arc;

/// Content stores for tasks, projects, and comments.
#[derive(Clone)]
pub struct ResourceHandlers {
    tasks: Arc<dyn ContentStore>,
    projects: Arc<dyn ContentStore>,
    comments: Arc<dyn ContentStore>,
}

impl ResourceHandlers {
    /// Register one content store per resource type.
    #[must_use]
    pub fn new(
        tasks: Arc<dyn ContentStore>,
        projects: Arc<dyn ContentStore>,
        comments: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            tasks,
            projects,
            comments,
        }
    }

    /// The content store handling `resource_type`.
    #[must_use]
    pub fn handler(&self, resource_type: ResourceType) -> &dyn ContentStore {
        match resource_type {
            ResourceType::Task => self.tasks.as_ref(),
            ResourceType::Project => self.projects.as_ref(),
            ResourceType::Comment => self.comments.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryContentStore;

    #[test]
    fn dispatches_by_type() {
        let tasks = Arc::new(MemoryContentStore::new().with_resource("1", "task body"));
        let projects = Arc::new(MemoryContentStore::new().with_resource("1", "project body"));
        let handlers = ResourceHandlers::new(tasks, projects, Arc::new(MemoryContentStore::new()));

        let task = handlers.handler(ResourceType::Task).load_content("1").unwrap();
        let project = handlers
            .handler(ResourceType::Project)
            .load_content("1")
            .unwrap();
        let comment = handlers
            .handler(ResourceType::Comment)
            .load_content("1")
            .unwrap();

        assert_eq!(task.as_deref(), Some("task body"));
        assert_eq!(project.as_deref(), Some("project body"));
        assert!(comment.is_none());
    }
}
