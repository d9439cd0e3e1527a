//! Presence tracking for Parley.
//!
//! The registry maps each user to the set of their open sessions and turns
//! session churn into online/offline edges. A user with three tabs open is
//! announced online once, and offline only when the last tab closes.

use crate::session::{SessionId, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::{debug, info};

/// A change in whether a user has zero or at least one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PresenceTransition {
    Online(UserId),
    Offline(UserId),
}

impl PresenceTransition {
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            PresenceTransition::Online(id) | PresenceTransition::Offline(id) => id,
        }
    }
}

/// Process-wide table of online users.
///
/// An entry exists iff its session set is non-empty. Every operation runs
/// under the user's shard lock, so operations on the same user are
/// linearizable.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: DashMap<UserId, HashSet<SessionId>>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for a user.
    ///
    /// Returns `Online` only if this is the user's first session.
    pub fn add_session(&self, user_id: &str, session_id: SessionId) -> Option<PresenceTransition> {
        self.add_session_with(user_id, session_id, |_| {})
    }

    /// Like [`add_session`](Self::add_session), running `on_transition` before
    /// the user's entry is released.
    ///
    /// The callback must not call back into the registry.
    pub fn add_session_with<F>(
        &self,
        user_id: &str,
        session_id: SessionId,
        on_transition: F,
    ) -> Option<PresenceTransition>
    where
        F: FnOnce(&PresenceTransition),
    {
        let mut sessions = self.entries.entry(user_id.to_string()).or_default();
        let first = sessions.is_empty();

        if !sessions.insert(session_id) {
            debug!(user = %user_id, session = %session_id, "Presence: session already registered");
            return None;
        }

        if !first {
            debug!(
                user = %user_id,
                session = %session_id,
                sessions = sessions.len(),
                "Presence: additional session"
            );
            return None;
        }

        let transition = PresenceTransition::Online(user_id.to_string());
        on_transition(&transition);
        info!(user = %user_id, session = %session_id, "Presence: user online");
        Some(transition)
    }

    /// Deregister a session.
    ///
    /// Returns `Offline` if this was the user's last session. Unknown users
    /// and sessions are ignored, so duplicate disconnects are harmless.
    pub fn remove_session(
        &self,
        user_id: &str,
        session_id: SessionId,
    ) -> Option<PresenceTransition> {
        self.remove_session_with(user_id, session_id, |_| {})
    }

    /// Like [`remove_session`](Self::remove_session), running `on_transition`
    /// before the user's entry is released.
    ///
    /// The callback must not call back into the registry.
    pub fn remove_session_with<F>(
        &self,
        user_id: &str,
        session_id: SessionId,
        on_transition: F,
    ) -> Option<PresenceTransition>
    where
        F: FnOnce(&PresenceTransition),
    {
        let Entry::Occupied(mut entry) = self.entries.entry(user_id.to_string()) else {
            return None;
        };

        if !entry.get_mut().remove(&session_id) {
            return None;
        }

        if !entry.get().is_empty() {
            debug!(
                user = %user_id,
                session = %session_id,
                sessions = entry.get().len(),
                "Presence: session closed, user still online"
            );
            return None;
        }

        let transition = PresenceTransition::Offline(user_id.to_string());
        on_transition(&transition);
        entry.remove();
        info!(user = %user_id, session = %session_id, "Presence: user offline");
        Some(transition)
    }

    /// Check whether a user has at least one session.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    /// Number of open sessions for a user.
    #[must_use]
    pub fn session_count(&self, user_id: &str) -> usize {
        self.entries.get(user_id).map(|s| s.len()).unwrap_or(0)
    }

    /// IDs of all online users.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> PresenceStats {
        PresenceStats {
            online_users: self.entries.len(),
            active_sessions: self.entries.iter().map(|e| e.len()).sum(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceStats {
    /// Users with at least one session.
    pub online_users: usize,
    /// Sessions across all users.
    pub active_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_session_goes_online() {
        let registry = PresenceRegistry::new();
        let session = SessionId::generate();

        assert_eq!(
            registry.add_session("alice", session),
            Some(PresenceTransition::Online("alice".into()))
        );
        assert!(registry.is_online("alice"));
    }

    #[test]
    fn test_multiple_sessions_collapse() {
        let registry = PresenceRegistry::new();
        let tab1 = SessionId::generate();
        let tab2 = SessionId::generate();

        assert!(registry.add_session("alice", tab1).is_some());
        assert!(registry.add_session("alice", tab2).is_none());
        assert_eq!(registry.session_count("alice"), 2);

        assert!(registry.remove_session("alice", tab1).is_none());
        assert!(registry.is_online("alice"));

        assert_eq!(
            registry.remove_session("alice", tab2),
            Some(PresenceTransition::Offline("alice".into()))
        );
        assert!(!registry.is_online("alice"));
        assert_eq!(registry.stats().online_users, 0);
    }

    #[test]
    fn test_duplicate_remove_is_noop() {
        let registry = PresenceRegistry::new();
        let session = SessionId::generate();

        registry.add_session("bob", session);
        assert!(registry.remove_session("bob", session).is_some());
        assert!(registry.remove_session("bob", session).is_none());
        assert!(registry.remove_session("nobody", session).is_none());
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let registry = PresenceRegistry::new();
        let session = SessionId::generate();

        assert!(registry.add_session("carol", session).is_some());
        assert!(registry.add_session("carol", session).is_none());
        assert_eq!(registry.session_count("carol"), 1);
    }

    #[test]
    fn test_transitions_balance_over_sequence() {
        let registry = PresenceRegistry::new();
        let sessions: Vec<SessionId> = (0..4).map(|_| SessionId::generate()).collect();
        let mut online = 0;
        let mut offline = 0;

        // add 0, add 1, remove 0, remove 1, add 2, remove 2, remove 2, add 3, remove 3
        let script = [
            (true, 0),
            (true, 1),
            (false, 0),
            (false, 1),
            (true, 2),
            (false, 2),
            (false, 2),
            (true, 3),
            (false, 3),
        ];

        for (add, idx) in script {
            let transition = if add {
                registry.add_session("dave", sessions[idx])
            } else {
                registry.remove_session("dave", sessions[idx])
            };
            match transition {
                Some(PresenceTransition::Online(_)) => {
                    assert_eq!(online, offline);
                    online += 1;
                }
                Some(PresenceTransition::Offline(_)) => {
                    offline += 1;
                    assert_eq!(online, offline);
                }
                None => {}
            }
            assert_eq!(registry.is_online("dave"), registry.session_count("dave") > 0);
        }

        assert_eq!(online, 3);
        assert_eq!(offline, 3);
    }

    #[test]
    fn test_callback_runs_only_on_transition() {
        let registry = PresenceRegistry::new();
        let tab1 = SessionId::generate();
        let tab2 = SessionId::generate();
        let mut seen = Vec::new();

        registry.add_session_with("erin", tab1, |t| seen.push(t.clone()));
        registry.add_session_with("erin", tab2, |t| seen.push(t.clone()));
        registry.remove_session_with("erin", tab1, |t| seen.push(t.clone()));
        registry.remove_session_with("erin", tab2, |t| seen.push(t.clone()));

        assert_eq!(
            seen,
            vec![
                PresenceTransition::Online("erin".into()),
                PresenceTransition::Offline("erin".into()),
            ]
        );
    }
}
