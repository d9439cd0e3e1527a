//! # parley-protocol
//!
//! Wire protocol for the Parley push channel.
//!
//! Every frame is a JSON object tagged by its `type` field. Clients that
//! prefer binary WebSocket messages get the same frames as length-prefixed
//! MessagePack.
//!
//! ## Frame Types
//!
//! Server to client:
//!
//! - `connected` - Admission handshake result
//! - `user_online` / `user_offline` - Presence transitions
//! - `typing_status` - Ephemeral typing indicator
//! - `chat_message` - A persisted chat message
//! - `pong` / `error` - Keepalive and protocol errors
//!
//! Client to server: `typing_start`, `typing_stop`, `ping`.
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, ServerFrame};
//!
//! let frame = ServerFrame::user_online("u-1", "alice");
//! let text = codec::encode_text(&frame).unwrap();
//! assert_eq!(text, r#"{"type":"user_online","id":"u-1","username":"alice"}"#);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{Encoding, ProtocolError};
pub use frames::{error_codes, ChatUser, ClientFrame, ServerFrame};
pub use version::{Version, PROTOCOL_VERSION};
