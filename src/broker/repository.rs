use std::sync::Arc;

use dashmap::DashMap;

use crate::broker::session_state::SessionState;

/// Client id to [`SessionState`] map shared by every connection.
///
/// Sharded, so dispatch can iterate while other connections insert or
/// remove entries.
#[derive(Debug, Default)]
pub struct SessionRepository {
    sessions: DashMap<String, Arc<SessionState>>,
}

impl SessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<SessionState>> {
        self.sessions.get(client_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Stores `state` under its client id, returning the entry it replaced.
    pub fn insert(&self, state: Arc<SessionState>) -> Option<Arc<SessionState>> {
        self.sessions.insert(state.client_id().to_string(), state)
    }

    /// Removes the entry for `state`'s client id only if it is still `state`.
    pub fn remove_if_same(&self, state: &Arc<SessionState>) -> bool {
        self.sessions
            .remove_if(state.client_id(), |_, current| Arc::ptr_eq(current, state))
            .is_some()
    }

    /// Visits every stored state. `f` must not touch the repository.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<SessionState>)) {
        for entry in self.sessions.iter() {
            f(entry.value());
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
