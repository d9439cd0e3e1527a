//! Typing indicators.
//!
//! Typing signals are relayed to every other session and never stored. The
//! user in the event always comes from the session binding.

use crate::event::BroadcastEvent;
use crate::hub::BroadcastHub;
use crate::session::Session;
use std::sync::Arc;
use tracing::trace;

/// Stateless relay of typing start/stop signals.
#[derive(Clone)]
pub struct TypingCoordinator {
    hub: Arc<BroadcastHub>,
}

impl TypingCoordinator {
    #[must_use]
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self { hub }
    }

    /// Announce that the session's user started typing.
    ///
    /// Returns the number of sessions notified.
    pub fn start(&self, session: &Session) -> usize {
        trace!(session = %session.id, user = %session.user.id, "Typing started");
        self.hub.announce(
            BroadcastEvent::TypingStarted {
                user_id: session.user.id.clone(),
                username: session.user.username.clone(),
            },
            Some(&session.id),
        )
    }

    /// Announce that the session's user stopped typing.
    pub fn stop(&self, session: &Session) -> usize {
        trace!(session = %session.id, user = %session.user.id, "Typing stopped");
        self.hub.announce(
            BroadcastEvent::TypingStopped {
                user_id: session.user.id.clone(),
                username: session.user.username.clone(),
            },
            Some(&session.id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UserIdentity;

    #[test]
    fn test_start_skips_origin_session() {
        let hub = Arc::new(BroadcastHub::new());
        let typing = TypingCoordinator::new(hub.clone());

        let alice_tab1 = Session::new(UserIdentity::new("u-1", "alice", true));
        let alice_tab2 = Session::new(UserIdentity::new("u-1", "alice", true));
        let bob = Session::new(UserIdentity::new("u-2", "bob", true));
        let mut rx_tab1 = hub.register(&alice_tab1);
        let mut rx_tab2 = hub.register(&alice_tab2);
        let mut rx_bob = hub.register(&bob);

        assert_eq!(typing.start(&alice_tab1), 2);

        assert!(rx_tab1.try_recv().is_err());
        let expected = BroadcastEvent::TypingStarted {
            user_id: "u-1".into(),
            username: "alice".into(),
        };
        assert_eq!(*rx_tab2.try_recv().unwrap(), expected);
        assert_eq!(*rx_bob.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_stop_without_start() {
        let hub = Arc::new(BroadcastHub::new());
        let typing = TypingCoordinator::new(hub.clone());
        let alice = Session::new(UserIdentity::new("u-1", "alice", true));
        let bob = Session::new(UserIdentity::new("u-2", "bob", true));
        let _rx_alice = hub.register(&alice);
        let mut rx_bob = hub.register(&bob);

        assert_eq!(typing.stop(&alice), 1);
        assert!(matches!(
            &*rx_bob.try_recv().unwrap(),
            BroadcastEvent::TypingStopped { user_id, .. } if user_id == "u-1"
        ));
    }
}
