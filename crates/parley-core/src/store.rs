//! Storage collaborators.
//!
//! The core only needs to look users up and to persist and list messages.
//! In-memory implementations back the development server and the tests.

use crate::session::{UserId, UserIdentity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write.
    #[error("Store rejected write: {0}")]
    Rejected(String),
}

/// Read access to user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look a user up by ID.
    async fn find_by_id(&self, id: &str) -> Result<Option<UserIdentity>, StoreError>;
}

/// A message row as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub text: String,
    pub sender_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message. Returning `Ok` means the row is durable.
    async fn persist(&self, text: &str, sender_id: &str) -> Result<StoredMessage, StoreError>;

    /// The latest `limit` messages, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError>;
}

/// User store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: DashMap<UserId, UserIdentity>,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub fn insert(&self, user: UserIdentity) {
        debug!(user = %user.id, verified = user.is_verified, "User store: upsert");
        self.users.insert(user.id.clone(), user);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<UserIdentity> for InMemoryUserStore {
    fn from_iter<I: IntoIterator<Item = UserIdentity>>(iter: I) -> Self {
        let store = Self::new();
        for user in iter {
            store.insert(user);
        }
        store
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }
}

/// Append-only message log held in memory.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<StoredMessage>>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted messages.
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn persist(&self, text: &str, sender_id: &str) -> Result<StoredMessage, StoreError> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            sender_id: sender_id.to_string(),
            created_at: Utc::now(),
        };
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = self.messages.read().await;
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}
