//! Session admission and teardown.
//!
//! A connection moves `Connecting → Authenticating → Admitted → Closed`.
//! [`Gateway::admit`] covers the first three steps and hands back an
//! [`AdmittedSession`]; closing or dropping it performs the last one exactly
//! once.

use crate::auth::{AuthError, ConnectionAuthenticator};
use crate::event::BroadcastEvent;
use crate::hub::{BroadcastHub, Outbound};
use crate::presence::PresenceRegistry;
use crate::session::{Session, UserIdentity};
use parley_protocol::ChatUser;
use std::sync::Arc;
use tracing::{debug, warn};

/// Entry point for push-channel connections.
#[derive(Clone)]
pub struct Gateway {
    authenticator: ConnectionAuthenticator,
    registry: Arc<PresenceRegistry>,
    hub: Arc<BroadcastHub>,
}

impl Gateway {
    #[must_use]
    pub fn new(
        authenticator: ConnectionAuthenticator,
        registry: Arc<PresenceRegistry>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            authenticator,
            registry,
            hub,
        }
    }

    #[must_use]
    pub fn authenticator(&self) -> &ConnectionAuthenticator {
        &self.authenticator
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Admit a connection presenting `credential`.
    ///
    /// On success the session is attached to the hub, registered with the
    /// presence registry, and `user_online` is announced if this is the
    /// user's first session.
    ///
    /// # Errors
    ///
    /// Returns the authentication failure. No state is created in that case.
    pub async fn admit(&self, credential: Option<&str>) -> Result<AdmittedSession, AuthError> {
        let user = self.authenticator.authenticate(credential).await.map_err(|e| {
            warn!(reason = e.reason(), error = %e, "Connection refused");
            e
        })?;
        Ok(self.open(user))
    }

    fn open(&self, user: UserIdentity) -> AdmittedSession {
        let session = Session::new(user);
        // Attach first so the user's own session sees its online event.
        let outbound = self.hub.register(&session);

        let hub = &self.hub;
        self.registry
            .add_session_with(&session.user.id, session.id, |transition| {
                hub.announce(BroadcastEvent::from_transition(transition, &session.user), None);
            });

        debug!(session = %session.id, user = %session.user.id, "Session admitted");

        AdmittedSession {
            lease: SessionLease {
                session: session.clone(),
                registry: Arc::clone(&self.registry),
                hub: Arc::clone(&self.hub),
                released: false,
            },
            session,
            outbound,
        }
    }

    /// Users currently online, with display names.
    ///
    /// Users the store no longer knows are skipped.
    pub async fn online_users(&self) -> Vec<ChatUser> {
        let mut users = Vec::new();
        for user_id in self.registry.online_users() {
            match self.authenticator.users().find_by_id(&user_id).await {
                Ok(Some(user)) => users.push(user.to_chat_user()),
                Ok(None) => {}
                Err(e) => warn!(user = %user_id, error = %e, "Online user lookup failed"),
            }
        }
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }
}

/// An admitted session and its outbound event stream.
///
/// Dropping it deregisters the session, so teardown happens even when the
/// connection task is cancelled.
pub struct AdmittedSession {
    session: Session,
    outbound: Outbound,
    lease: SessionLease,
}

impl AdmittedSession {
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Next event for this session, in announce order.
    ///
    /// Returns `None` once the session has been closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        self.outbound.recv().await
    }

    /// Next already-queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        self.outbound.try_recv().ok()
    }

    /// Close the session explicitly.
    pub fn close(mut self) {
        self.lease.release();
    }
}

struct SessionLease {
    session: Session,
    registry: Arc<PresenceRegistry>,
    hub: Arc<BroadcastHub>,
    released: bool,
}

impl SessionLease {
    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }

        // Detach first so the closing session is not sent its own offline event.
        self.hub.unregister(&self.session.id);

        let hub = &self.hub;
        let user = &self.session.user;
        self.registry
            .remove_session_with(&user.id, self.session.id, |transition| {
                hub.announce(BroadcastEvent::from_transition(transition, user), None);
            });

        debug!(session = %self.session.id, user = %user.id, "Session closed");
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.release();
    }
}
