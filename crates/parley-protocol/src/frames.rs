//! Frame types for the Parley protocol.
//!
//! Field names on the wire are camelCase; the frame kind lives in `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error codes carried by [`ServerFrame::Error`].
pub mod error_codes {
    /// The frame could not be decoded.
    pub const MALFORMED_FRAME: u16 = 1001;
    /// The frame exceeded the configured size limit.
    pub const FRAME_TOO_LARGE: u16 = 1002;
}

/// Public view of a user as carried inside frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,
    pub username: String,
}

impl ChatUser {
    #[must_use]
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

/// A frame sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The connection was admitted.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Identifier of this session.
        session_id: String,
        /// The authenticated user bound to the session.
        user: ChatUser,
        /// Negotiated protocol version.
        protocol: String,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
        /// Users online at admission time.
        online: Vec<ChatUser>,
    },

    /// A user went from zero to at least one session.
    UserOnline { id: String, username: String },

    /// A user closed their last session.
    UserOffline { id: String, username: String },

    /// Another user started or stopped typing.
    #[serde(rename_all = "camelCase")]
    TypingStatus {
        user_id: String,
        username: String,
        is_typing: bool,
    },

    /// A message was persisted.
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        id: String,
        text: String,
        sender: ChatUser,
        created_at: DateTime<Utc>,
    },

    /// Keepalive reply.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Protocol-level error. The connection stays open.
    Error { code: u16, message: String },
}

impl ServerFrame {
    /// The `type` tag of this frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Connected { .. } => "connected",
            ServerFrame::UserOnline { .. } => "user_online",
            ServerFrame::UserOffline { .. } => "user_offline",
            ServerFrame::TypingStatus { .. } => "typing_status",
            ServerFrame::ChatMessage { .. } => "chat_message",
            ServerFrame::Pong { .. } => "pong",
            ServerFrame::Error { .. } => "error",
        }
    }

    #[must_use]
    pub fn user_online(id: impl Into<String>, username: impl Into<String>) -> Self {
        ServerFrame::UserOnline {
            id: id.into(),
            username: username.into(),
        }
    }

    #[must_use]
    pub fn user_offline(id: impl Into<String>, username: impl Into<String>) -> Self {
        ServerFrame::UserOffline {
            id: id.into(),
            username: username.into(),
        }
    }

    #[must_use]
    pub fn typing(user_id: impl Into<String>, username: impl Into<String>, is_typing: bool) -> Self {
        ServerFrame::TypingStatus {
            user_id: user_id.into(),
            username: username.into(),
            is_typing,
        }
    }

    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerFrame::Pong { timestamp }
    }

    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            message: message.into(),
        }
    }
}

/// A frame sent from a client to the server.
///
/// Identity never travels in client frames; extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    TypingStart,
    TypingStop,
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientFrame {
    /// The `type` tag of this frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::TypingStart => "typing_start",
            ClientFrame::TypingStop => "typing_stop",
            ClientFrame::Ping { .. } => "ping",
        }
    }
}
