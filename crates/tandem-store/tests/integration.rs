use serde_json::{json, Value};
use std::sync::Arc;
use tandem_core::{
    CollaborationEngine, ConflictType, Content, ContentStore, EditRequest, EnginePolicy,
    EngineStores, ResourceKey, ResourceType, VersionHistory,
};
use tandem_store::SqliteStore;
use tempfile::TempDir;

fn engine(store: &SqliteStore) -> CollaborationEngine {
    CollaborationEngine::new(
        EngineStores::shared(Arc::new(store.clone())),
        store.handlers(),
        EnginePolicy::default(),
    )
}

fn content(value: Value) -> Content {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn engine_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tandem.db");
    let key = ResourceKey::task("t-1");

    {
        let store = SqliteStore::open(&path).unwrap();
        store
            .content_store(ResourceType::Task)
            .update_resource_content("t-1", "")
            .unwrap();

        let engine = engine(&store);
        engine
            .submit_edit(EditRequest::new(key.clone(), "alice", "Hello").based_on(0))
            .unwrap();
        let outcome = engine
            .submit_edit(EditRequest::new(key.clone(), "bob", "World").based_on(1))
            .unwrap();

        assert_eq!(outcome.content, "Hello\nWorld");
        assert_eq!(
            outcome.resolution.unwrap().conflict_type,
            ConflictType::ConcurrentEdit
        );
    }

    let store = SqliteStore::open(&path).unwrap();
    let engine = engine(&store);

    let version = engine.current_version(&key).unwrap().unwrap();
    assert_eq!(version.version, 2);
    assert_eq!(version.last_modified_by, "bob");
    assert_eq!(engine.get_operation_history(&key).unwrap().len(), 2);
    assert_eq!(engine.resolutions(&key).unwrap().len(), 1);
    assert_eq!(
        store
            .content_store(ResourceType::Task)
            .load_content("t-1")
            .unwrap()
            .as_deref(),
        Some("Hello\nWorld")
    );

    assert_eq!(engine.clear_pending(&key).unwrap(), 2);
    assert!(engine.get_operation_history(&key).unwrap().is_empty());
}

#[test]
fn version_history_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tandem.db");
    let entity = ResourceKey::project("p-1");

    {
        let history = VersionHistory::new(Arc::new(SqliteStore::open(&path).unwrap()));
        history
            .create_version(&entity, content(json!({"name": "Alpha", "status": "open"})), Some("create"), "alice")
            .unwrap();
        history
            .create_version(&entity, content(json!({"name": "Beta", "status": "open"})), None, "bob")
            .unwrap();
        history
            .rollback_to_version(&entity, 1, "carol", None)
            .unwrap();
    }

    let history = VersionHistory::new(Arc::new(SqliteStore::open(&path).unwrap()));
    let records = history.get_version_history(&entity).unwrap();
    let numbers: Vec<u64> = records.iter().map(|r| r.version.version_number).collect();
    assert_eq!(numbers, vec![3, 2, 1]);
    assert_eq!(records[0].version.content, records[2].version.content);
    assert_eq!(
        records[0].version.summary.as_deref(),
        Some("Rolled back to version 1")
    );

    let changes = history.compare_versions(&entity, 1, 2).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].field_name, "name");

    assert_eq!(history.cleanup_old_versions(&entity, 1).unwrap(), 2);
    let next = history
        .create_version(&entity, content(json!({"name": "Gamma"})), None, "alice")
        .unwrap();
    assert_eq!(next.version_number, 4);
}
