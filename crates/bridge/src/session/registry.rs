//! Concurrency-safe store of open sessions keyed by client connection.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::types::{ConnectionId, Session, SessionError, SessionSummary};

/// Open sessions, at most one per client connection.
///
/// Every mutation is a single map operation, so no caller can observe a
/// half-registered or half-removed session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session under its connection id.
    ///
    /// Fails if the connection already has a session.
    pub fn put(&self, session: Arc<Session>) -> Result<(), SessionError> {
        match self.sessions.entry(session.connection_id().clone()) {
            Entry::Occupied(entry) => Err(SessionError::AlreadyActive(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(())
            }
        }
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Removes and returns the connection's session. Removing an absent id is a no-op.
    pub fn remove(&self, connection_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .remove(connection_id)
            .map(|(_, session)| session)
    }

    /// Removes the connection's session only if it is `session_id`.
    ///
    /// Used by a session's own task so a late cleanup can never evict a
    /// newer session on the same connection.
    pub fn remove_session(&self, connection_id: &str, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .remove_if(connection_id, |_, session| session.id() == session_id)
            .map(|(_, session)| session)
    }

    /// Summaries of all sessions, oldest first.
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions.sort_by_key(|session| session.created_at());
        sessions.iter().map(|session| session.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Removes and returns every session.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let keys: Vec<ConnectionId> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::tests::test_session;

    #[test]
    fn test_put_get_remove() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());

        registry.put(Arc::new(test_session("s1", "c1"))).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("c1").unwrap().id(), "s1");
        assert!(registry.get("c2").is_none());

        let removed = registry.remove("c1").unwrap();
        assert_eq!(removed.id(), "s1");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_put_rejects_second_session_on_connection() {
        let registry = SessionRegistry::new();
        registry.put(Arc::new(test_session("s1", "c1"))).unwrap();

        let err = registry
            .put(Arc::new(test_session("s2", "c1")))
            .unwrap_err();
        assert_eq!(err, SessionError::AlreadyActive("c1".to_string()));
        assert_eq!(registry.get("c1").unwrap().id(), "s1");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.put(Arc::new(test_session("s1", "c1"))).unwrap();

        assert!(registry.remove("c1").is_some());
        assert!(registry.remove("c1").is_none());
        assert!(registry.remove("never-existed").is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_remove_session_checks_id() {
        let registry = SessionRegistry::new();
        registry.put(Arc::new(test_session("s2", "c1"))).unwrap();

        assert!(registry.remove_session("c1", "s1").is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.remove_session("c1", "s2").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_lists_all_sessions() {
        let registry = SessionRegistry::new();
        registry.put(Arc::new(test_session("s1", "c1"))).unwrap();
        registry.put(Arc::new(test_session("s2", "c2"))).unwrap();

        let mut ids: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|summary| summary.session_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = SessionRegistry::new();
        registry.put(Arc::new(test_session("s1", "c1"))).unwrap();
        registry.put(Arc::new(test_session("s2", "c2"))).unwrap();

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_put_and_remove() {
        let registry = Arc::new(SessionRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let conn = format!("c{}", i);
                    for round in 0..100 {
                        let id = format!("s{}-{}", i, round);
                        registry.put(Arc::new(test_session(&id, &conn))).unwrap();
                        assert!(registry.remove(&conn).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
