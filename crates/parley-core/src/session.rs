//! Session and identity types.

use chrono::{DateTime, Utc};
use parley_protocol::ChatUser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A user identifier, opaque to the core.
pub type UserId = String;

/// Identity snapshot of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    /// Display name.
    pub username: String,
    pub is_verified: bool,
}

impl UserIdentity {
    #[must_use]
    pub fn new(id: impl Into<UserId>, username: impl Into<String>, is_verified: bool) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            is_verified,
        }
    }

    /// Public view used inside wire frames.
    #[must_use]
    pub fn to_chat_user(&self) -> ChatUser {
        ChatUser::new(self.id.clone(), self.username.clone())
    }
}

/// Unique identifier for one push-channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess_{}", self.0.simple())
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// One admitted push-channel connection.
///
/// The user binding is fixed when the session is created and never changes.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub user: Arc<UserIdentity>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn new(user: UserIdentity) -> Self {
        Self {
            id: SessionId::generate(),
            user: Arc::new(user),
            connected_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}
