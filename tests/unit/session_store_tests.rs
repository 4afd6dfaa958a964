//! Unit tests for the in-memory session store.

use std::sync::Arc;

use homespun_orchestrator::models::session::{Session, SessionMode};
use homespun_orchestrator::orchestrator::session_store::SessionStore;

fn session(entity: &str, project: &str) -> Session {
    Session::new(
        entity.into(),
        project.into(),
        format!("/work/{entity}"),
        "sonnet".into(),
        SessionMode::Build,
    )
}

#[tokio::test]
async fn insert_then_get_returns_same_record() {
    let store = SessionStore::new();
    let s = session("issue-1", "proj-1");
    let id = s.id.clone();

    let handle = store.insert(s);
    handle.lock().await.model = "opus".into();

    let fetched = store.get(&id).expect("session present");
    assert_eq!(fetched.lock().await.model, "opus");
    assert!(store.get(&id).is_some());
    assert_eq!(store.session_count(), 1);
}

#[tokio::test]
async fn indexes_group_by_entity_and_project() {
    let store = SessionStore::new();
    store.insert(session("issue-1", "proj-1"));
    store.insert(session("issue-1", "proj-1"));
    store.insert(session("issue-2", "proj-1"));
    store.insert(session("issue-3", "proj-2"));

    assert_eq!(store.by_entity("issue-1").len(), 2);
    assert_eq!(store.by_project("proj-1").len(), 3);
    assert_eq!(store.by_project("proj-2").len(), 1);
    assert!(store.by_entity("missing").is_empty());
}

#[tokio::test]
async fn remove_cleans_indexes() {
    let store = SessionStore::new();
    let s = session("issue-1", "proj-1");
    let id = s.id.clone();
    store.insert(s);

    assert!(store.remove(&id).await.is_some());
    assert!(store.get(&id).is_none());
    assert!(store.by_entity("issue-1").is_empty());
    assert!(store.by_project("proj-1").is_empty());
    assert_eq!(store.session_count(), 0);
}

#[tokio::test]
async fn removing_unknown_id_is_none() {
    let store = SessionStore::new();
    assert!(store.remove("nope").await.is_none());
}

#[tokio::test]
async fn concurrent_inserts_and_removes_stay_consistent() {
    let store = Arc::new(SessionStore::new());
    let mut tasks = Vec::new();
    for i in 0..32 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            let s = session(&format!("issue-{}", i % 4), "proj-1");
            let id = s.id.clone();
            store.insert(s);
            if i % 2 == 0 {
                store.remove(&id).await;
            }
        }));
    }
    for task in tasks {
        task.await.expect("task panicked");
    }

    assert_eq!(store.session_count(), 16);
    assert_eq!(store.by_project("proj-1").len(), 16);
}
