//! Events fanned out to admitted sessions.
//!
//! Events are transient. Each carries only what clients need to render it.

use crate::message::Message;
use crate::presence::PresenceTransition;
use crate::session::{UserId, UserIdentity};
use parley_protocol::ServerFrame;

/// An event delivered through the [`BroadcastHub`](crate::hub::BroadcastHub).
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastEvent {
    UserOnline { user_id: UserId, username: String },
    UserOffline { user_id: UserId, username: String },
    TypingStarted { user_id: UserId, username: String },
    TypingStopped { user_id: UserId, username: String },
    MessageCreated(Message),
}

impl BroadcastEvent {
    /// Build the presence event matching a registry transition.
    #[must_use]
    pub fn from_transition(transition: &PresenceTransition, user: &UserIdentity) -> Self {
        match transition {
            PresenceTransition::Online(user_id) => BroadcastEvent::UserOnline {
                user_id: user_id.clone(),
                username: user.username.clone(),
            },
            PresenceTransition::Offline(user_id) => BroadcastEvent::UserOffline {
                user_id: user_id.clone(),
                username: user.username.clone(),
            },
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastEvent::UserOnline { .. } => "user_online",
            BroadcastEvent::UserOffline { .. } => "user_offline",
            BroadcastEvent::TypingStarted { .. } => "typing_started",
            BroadcastEvent::TypingStopped { .. } => "typing_stopped",
            BroadcastEvent::MessageCreated(_) => "message_created",
        }
    }

    /// Wire representation of this event.
    #[must_use]
    pub fn to_frame(&self) -> ServerFrame {
        match self {
            BroadcastEvent::UserOnline { user_id, username } => {
                ServerFrame::user_online(user_id.clone(), username.clone())
            }
            BroadcastEvent::UserOffline { user_id, username } => {
                ServerFrame::user_offline(user_id.clone(), username.clone())
            }
            BroadcastEvent::TypingStarted { user_id, username } => {
                ServerFrame::typing(user_id.clone(), username.clone(), true)
            }
            BroadcastEvent::TypingStopped { user_id, username } => {
                ServerFrame::typing(user_id.clone(), username.clone(), false)
            }
            BroadcastEvent::MessageCreated(message) => message.to_frame(),
        }
    }
}
