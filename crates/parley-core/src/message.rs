//! Chat messages.
//!
//! A message is validated, written to the store, and only then announced.
//! The announcement is fire-and-forget: it never rolls back or delays the
//! write that preceded it.

use crate::event::BroadcastEvent;
use crate::hub::BroadcastHub;
use crate::session::UserIdentity;
use crate::store::{MessageStore, StoreError, StoredMessage, UserStore};
use chrono::{DateTime, Utc};
use parley_protocol::{ChatUser, ServerFrame};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Maximum message length in characters, after trimming.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Upper bound on how many messages a history query returns.
pub const MAX_HISTORY: usize = 50;

/// Display name used when a sender no longer resolves.
const UNKNOWN_SENDER: &str = "unknown";

/// A persisted chat message hydrated with its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: ChatUser,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn hydrate(stored: StoredMessage, username: String) -> Self {
        Self {
            sender: ChatUser::new(stored.sender_id, username),
            id: stored.id,
            text: stored.text,
            created_at: stored.created_at,
        }
    }

    /// Wire representation of this message.
    #[must_use]
    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::ChatMessage {
            id: self.id.clone(),
            text: self.text.clone(),
            sender: self.sender.clone(),
            created_at: self.created_at,
        }
    }
}

/// Message creation errors.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The text failed validation. Nothing was written.
    #[error("{0}")]
    Validation(String),

    /// The store failed. Nothing was announced; the caller may retry.
    #[error("Failed to persist message: {0}")]
    Persistence(#[source] StoreError),
}

/// Validate raw message text, returning the trimmed text to persist.
///
/// # Errors
///
/// Returns `MessageError::Validation` if the trimmed text is empty or longer
/// than [`MAX_MESSAGE_CHARS`].
pub fn validate_text(raw: &str) -> Result<&str, MessageError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(MessageError::Validation(
            "Message content cannot be empty.".to_string(),
        ));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(MessageError::Validation("Message is too long.".to_string()));
    }
    Ok(text)
}

/// Creates and lists chat messages.
#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    users: Arc<dyn UserStore>,
    hub: Arc<BroadcastHub>,
}

impl MessageService {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        users: Arc<dyn UserStore>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self { store, users, hub }
    }

    /// Validate, persist and announce a message from an authenticated sender.
    ///
    /// # Errors
    ///
    /// Returns `Validation` without touching the store, or `Persistence` if
    /// the write failed. In both cases nothing is announced.
    pub async fn create_message(
        &self,
        sender: &UserIdentity,
        raw_text: &str,
    ) -> Result<Message, MessageError> {
        let text = validate_text(raw_text).map_err(|e| {
            debug!(user = %sender.id, error = %e, "Message rejected");
            e
        })?;

        let stored = self.store.persist(text, &sender.id).await.map_err(|e| {
            error!(user = %sender.id, error = %e, "Message persistence failed");
            MessageError::Persistence(e)
        })?;

        let message = Message::hydrate(stored, sender.username.clone());
        let recipients = self
            .hub
            .announce(BroadcastEvent::MessageCreated(message.clone()), None);

        debug!(
            message = %message.id,
            user = %sender.id,
            recipients = recipients,
            "Message created"
        );
        Ok(message)
    }

    /// The latest persisted messages, oldest first, capped at [`MAX_HISTORY`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn recent_messages(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let stored = self.store.recent(limit.min(MAX_HISTORY)).await?;
        let mut names: HashMap<String, String> = HashMap::new();
        let mut messages = Vec::with_capacity(stored.len());

        for row in stored {
            if !names.contains_key(&row.sender_id) {
                let name = match self.users.find_by_id(&row.sender_id).await? {
                    Some(user) => user.username,
                    None => {
                        warn!(user = %row.sender_id, "Message sender not found");
                        UNKNOWN_SENDER.to_string()
                    }
                };
                names.insert(row.sender_id.clone(), name);
            }
            let username = names[&row.sender_id].clone();
            messages.push(Message::hydrate(row, username));
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::store::{InMemoryMessageStore, InMemoryUserStore};
    use async_trait::async_trait;

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn persist(&self, _: &str, _: &str) -> Result<StoredMessage, StoreError> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }

        async fn recent(&self, _: usize) -> Result<Vec<StoredMessage>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn alice() -> UserIdentity {
        UserIdentity::new("u-1", "alice", true)
    }

    fn service(store: Arc<dyn MessageStore>) -> (MessageService, Arc<BroadcastHub>) {
        let hub = Arc::new(BroadcastHub::new());
        let users: InMemoryUserStore = [alice()].into_iter().collect();
        (MessageService::new(store, Arc::new(users), hub.clone()), hub)
    }

    #[test]
    fn test_validation_bounds() {
        assert!(validate_text("").is_err());
        assert!(validate_text("   \n\t").is_err());
        assert!(validate_text(&"a".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
        assert_eq!(validate_text("  hi  ").unwrap(), "hi");
        assert!(validate_text(&"é".repeat(MAX_MESSAGE_CHARS)).is_ok());
    }

    #[tokio::test]
    async fn test_create_persists_then_announces() {
        let store = Arc::new(InMemoryMessageStore::new());
        let (service, hub) = service(store.clone());
        let observer = Session::new(UserIdentity::new("u-9", "zed", true));
        let mut rx = hub.register(&observer);

        let message = service.create_message(&alice(), "hello").await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(message.sender, ChatUser::new("u-1", "alice"));

        let event = rx.try_recv().unwrap();
        assert_eq!(*event, BroadcastEvent::MessageCreated(message.clone()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_text_writes_nothing() {
        let store = Arc::new(InMemoryMessageStore::new());
        let (service, hub) = service(store.clone());
        let observer = Session::new(alice());
        let mut rx = hub.register(&observer);

        for text in [String::new(), "x".repeat(501)] {
            assert!(matches!(
                service.create_message(&alice(), &text).await,
                Err(MessageError::Validation(_))
            ));
        }

        assert_eq!(store.len().await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_persistence_failure_announces_nothing() {
        let (service, hub) = service(Arc::new(FailingStore));
        let observer = Session::new(alice());
        let mut rx = hub.register(&observer);

        assert!(matches!(
            service.create_message(&alice(), "hello").await,
            Err(MessageError::Persistence(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recent_messages_hydrates_senders() {
        let store = Arc::new(InMemoryMessageStore::new());
        let (service, _hub) = service(store.clone());

        service.create_message(&alice(), "first").await.unwrap();
        store.persist("orphan", "u-404").await.unwrap();

        let history = service.recent_messages(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender.username, "alice");
        assert_eq!(history[1].sender.username, UNKNOWN_SENDER);
    }
}
