//! Session Registry - the authoritative map of active sessions
//!
//! Each session sits behind its own async mutex. Callers take a snapshot of
//! handles and lock sessions one at a time, so no operation ever holds a
//! lock over the whole registry.

use council_types::{CollaborationSession, CouncilError, CouncilResult, SessionId, SessionView};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared, individually locked session
pub type SessionHandle = Arc<Mutex<CollaborationSession>>;

struct Entry {
    /// Insertion order, used to visit sessions oldest first
    order: u64,
    handle: SessionHandle,
}

/// Registry of active sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Entry>,
    next_order: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created session
    pub fn insert(&self, session: CollaborationSession) -> SessionHandle {
        let id = session.id.clone();
        let handle = Arc::new(Mutex::new(session));
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            id,
            Entry {
                order,
                handle: handle.clone(),
            },
        );
        handle
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.handle.clone())
    }

    pub fn require(&self, id: &SessionId) -> CouncilResult<SessionHandle> {
        self.get(id)
            .ok_or_else(|| CouncilError::SessionNotFound(id.clone()))
    }

    /// Snapshot of all handles in creation order, oldest first
    pub fn handles(&self) -> Vec<(SessionId, SessionHandle)> {
        let mut handles: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (entry.order, entry.key().clone(), entry.handle.clone()))
            .collect();
        handles.sort_by_key(|(order, _, _)| *order);
        handles
            .into_iter()
            .map(|(_, id, handle)| (id, handle))
            .collect()
    }

    pub async fn view(&self, id: &SessionId) -> CouncilResult<SessionView> {
        let handle = self.require(id)?;
        let session = handle.lock().await;
        Ok(session.view())
    }

    pub async fn views(&self) -> Vec<SessionView> {
        let mut views = Vec::new();
        for (_, handle) in self.handles() {
            views.push(handle.lock().await.view());
        }
        views
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Only the archival sweep removes sessions
    pub(crate) fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, entry)| entry.handle)
    }
}
