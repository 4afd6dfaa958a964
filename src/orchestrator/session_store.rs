//! In-memory session registry.
//!
//! Sessions are keyed by id in a sharded [`DashMap`], so lookups and
//! mutations on different sessions never contend on a global lock. Each
//! record sits behind its own async mutex; the secondary indexes (by
//! owning entity and by project) hold ids only.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::session::Session;

/// Shared handle to one session record.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Concurrency-safe session registry with entity and project indexes.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
    by_entity: DashMap<String, HashSet<String>>,
    by_project: DashMap<String, HashSet<String>>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, replacing any record with the same id.
    pub fn insert(&self, session: Session) -> SessionHandle {
        let id = session.id.clone();
        let entity_id = session.entity_id.clone();
        let project_id = session.project_id.clone();
        let handle = Arc::new(Mutex::new(session));

        self.sessions.insert(id.clone(), Arc::clone(&handle));
        self.by_entity
            .entry(entity_id)
            .or_default()
            .insert(id.clone());
        self.by_project
            .entry(project_id)
            .or_default()
            .insert(id.clone());

        debug!(session_id = %id, "session registered");
        handle
    }

    /// Look up a session by id.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a session; returns the handle if it was present.
    pub async fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        let (_, handle) = self.sessions.remove(session_id)?;
        let (entity_id, project_id) = {
            let session = handle.lock().await;
            (session.entity_id.clone(), session.project_id.clone())
        };
        remove_from_index(&self.by_entity, &entity_id, session_id);
        remove_from_index(&self.by_project, &project_id, session_id);
        debug!(session_id, "session removed");
        Some(handle)
    }

    /// Sessions owned by an entity.
    #[must_use]
    pub fn by_entity(&self, entity_id: &str) -> Vec<SessionHandle> {
        self.lookup(&self.by_entity, entity_id)
    }

    /// Sessions belonging to a project.
    #[must_use]
    pub fn by_project(&self, project_id: &str) -> Vec<SessionHandle> {
        self.lookup(&self.by_project, project_id)
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn lookup(&self, index: &DashMap<String, HashSet<String>>, key: &str) -> Vec<SessionHandle> {
        let ids: Vec<String> = index
            .get(key)
            .map(|entry| entry.value().iter().cloned().collect())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }
}

fn remove_from_index(index: &DashMap<String, HashSet<String>>, key: &str, session_id: &str) {
    let now_empty = index.get_mut(key).is_some_and(|mut ids| {
        ids.remove(session_id);
        ids.is_empty()
    });
    if now_empty {
        index.remove_if(key, |_, ids| ids.is_empty());
    }
}
