//! # parley-core
//!
//! Presence and broadcast core of the Parley chat backend.
//!
//! This crate provides the building blocks with real concurrency concerns:
//!
//! - **Gateway** - Admits authenticated connections and tears them down
//! - **PresenceRegistry** - Tracks which users have at least one open session
//! - **BroadcastHub** - Fans events out to per-session outbound queues
//! - **MessageService** - Persists a message, then announces it
//! - **TypingCoordinator** - Relays typing signals to everyone but the sender
//!
//! Storage and credential verification are reached through the traits in
//! [`store`] and [`auth`].
//!
//! ## Architecture
//!
//! ```text
//!  handshake ┌─────────────┐  admit   ┌──────────────────┐
//! ──────────▶│   Gateway   │─────────▶│ PresenceRegistry │
//!            └─────────────┘          └──────────────────┘
//!                   │ register               │ online / offline
//!                   ▼                        ▼
//!            ┌─────────────┐  announce ┌──────────────┐
//!            │ BroadcastHub│◀──────────│MessageService│
//!            └─────────────┘           └──────────────┘
//!                   │ per-session FIFO
//!                   ▼
//!              outbound queues
//! ```

pub mod auth;
pub mod event;
pub mod gateway;
pub mod hub;
pub mod message;
pub mod presence;
pub mod session;
pub mod store;
pub mod typing;

pub use auth::{
    bearer_token, AuthError, ConnectionAuthenticator, CredentialError, CredentialVerifier,
    JwtVerifier, VerifiedCredential,
};
pub use event::BroadcastEvent;
pub use gateway::{AdmittedSession, Gateway};
pub use hub::{BroadcastHub, HubConfig};
pub use message::{Message, MessageError, MessageService, MAX_MESSAGE_CHARS};
pub use presence::{PresenceRegistry, PresenceStats, PresenceTransition};
pub use session::{Session, SessionId, UserId, UserIdentity};
pub use store::{
    InMemoryMessageStore, InMemoryUserStore, MessageStore, StoreError, StoredMessage, UserStore,
};
pub use typing::TypingCoordinator;
