//! Session registry

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use super::Session;
use crate::error::NodeError;

/// Anything the registry can key by identity
pub trait SessionIdentity {
    /// Registry key; for a [`Session`] this is the app's access key
    fn id(&self) -> &str;
}

/// Live sessions indexed by identity
///
/// At most one session per identity. Entries are only removed by the
/// owning session's teardown (through [`SessionManager::remove_if_same`]) or
/// by an explicit [`SessionManager::del`].
pub struct SessionManager<S = Session> {
    sessions: DashMap<String, Arc<S>>,
}

impl<S: SessionIdentity> SessionManager<S> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register `session`, failing if its identity is already taken
    pub fn put(&self, session: Arc<S>) -> Result<(), NodeError> {
        match self.sessions.entry(session.id().to_string()) {
            Entry::Occupied(entry) => Err(NodeError::SessionAlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(())
            }
        }
    }

    /// Get a session by identity
    pub fn get(&self, id: &str) -> Option<Arc<S>> {
        self.sessions.get(id).map(|r| Arc::clone(&r))
    }

    /// Remove whatever session is registered under `id`
    pub fn del(&self, id: &str) -> Option<Arc<S>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Remove `session` only if it is still the registered entry for its
    /// identity
    pub fn remove_if_same(&self, session: &Arc<S>) -> bool {
        self.sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// List all sessions
    pub fn list(&self) -> Vec<Arc<S>> {
        self.sessions.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Identities of all sessions
    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<S: SessionIdentity> Default for SessionManager<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(String);

    impl SessionIdentity for Named {
        fn id(&self) -> &str {
            &self.0
        }
    }

    fn named(id: &str) -> Arc<Named> {
        Arc::new(Named(id.to_string()))
    }

    #[test]
    fn test_put_rejects_duplicate() {
        let manager = SessionManager::new();
        manager.put(named("agent-1")).unwrap();

        let err = manager.put(named("agent-1")).unwrap_err();
        assert!(matches!(err, NodeError::SessionAlreadyExists(ref id) if id == "agent-1"));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_put_after_del() {
        let manager = SessionManager::new();
        manager.put(named("agent-1")).unwrap();
        assert!(manager.del("agent-1").is_some());
        assert!(manager.is_empty());
        manager.put(named("agent-1")).unwrap();
        assert!(manager.get("agent-1").is_some());
    }

    #[test]
    fn test_remove_if_same_ignores_replacement() {
        let manager = SessionManager::new();
        let first = named("agent-1");
        manager.put(Arc::clone(&first)).unwrap();
        manager.del("agent-1");

        let second = named("agent-1");
        manager.put(Arc::clone(&second)).unwrap();

        assert!(!manager.remove_if_same(&first));
        assert!(Arc::ptr_eq(&manager.get("agent-1").unwrap(), &second));
        assert!(manager.remove_if_same(&second));
        assert!(manager.get("agent-1").is_none());
    }

    #[test]
    fn test_list_and_ids() {
        let manager = SessionManager::new();
        manager.put(named("a")).unwrap();
        manager.put(named("b")).unwrap();

        let mut ids = manager.ids();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(manager.list().len(), 2);
    }

    #[test]
    fn test_concurrent_put_single_winner() {
        let manager = Arc::new(SessionManager::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.put(named("contended")).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(manager.len(), 1);
    }
}
