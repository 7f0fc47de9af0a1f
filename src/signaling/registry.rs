use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::session::Session;
use super::types::{ConnectionId, SignalingError};
use crate::media::MediaBackend;

/// Active sessions keyed by connection.
///
/// Backed by a sharded map: operations on different connections only
/// contend when their keys share a shard, and no operation awaits while
/// holding a shard lock. Removal hands the session back to the caller,
/// which is responsible for calling [`Session::release`] on it.
pub struct SessionRegistry {
    backend: Arc<dyn MediaBackend>,
    sessions: DashMap<ConnectionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            sessions: DashMap::new(),
        }
    }

    /// Store a fresh session, failing if the connection already has one
    pub fn create_and_store(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Arc<Session>, SignalingError> {
        match self.sessions.entry(*connection_id) {
            Entry::Occupied(_) => Err(SignalingError::DuplicateSession(*connection_id)),
            Entry::Vacant(slot) => {
                let session = Arc::new(Session::new(*connection_id, self.backend.clone()));
                slot.insert(session.clone());
                debug!(connection = %connection_id, "Session stored");
                Ok(session)
            }
        }
    }

    /// Store a fresh session, returning the one it displaced
    pub fn replace(&self, connection_id: &ConnectionId) -> (Arc<Session>, Option<Arc<Session>>) {
        let session = Arc::new(Session::new(*connection_id, self.backend.clone()));
        let previous = self.sessions.insert(*connection_id, session.clone());
        if previous.is_some() {
            info!(connection = %connection_id, "Session replaced");
        }
        (session, previous)
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<Session>> {
        self.sessions.get(connection_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, connection_id: &ConnectionId) -> Option<Arc<Session>> {
        self.sessions
            .remove(connection_id)
            .map(|(_, session)| session)
    }

    /// Whether the connection's entry is still `session`
    pub fn is_current(&self, connection_id: &ConnectionId, session: &Arc<Session>) -> bool {
        self.sessions
            .get(connection_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), session))
    }

    /// Remove the entry only if it still holds `session`.
    ///
    /// Used on failure paths so that a newer session stored by a later
    /// `start` is never evicted by the failure of an older one.
    pub fn remove_if_current(&self, connection_id: &ConnectionId, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(connection_id, |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Remove every session, for shutdown
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let ids: Vec<ConnectionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
