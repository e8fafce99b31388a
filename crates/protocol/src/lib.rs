//! Wire types for the gateway's two JSON channels.
//!
//! Downstream (browser ↔ gateway): [`Request`] in, [`WsBotMessage`] and
//! [`ErrorFrame`] out; liveness uses transport-level ping/pong control
//! frames.
//!
//! Upstream (gateway ↔ neural backend): [`NeuralRequest`] out,
//! [`NeuralResponse`] in; liveness uses application-level [`Heartbeat`]
//! JSON frames, so the demultiplexer — not a transport callback — owns the
//! pong reply.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Error codes ──────────────────────────────────────────────────────────────

/// Codes carried by [`ErrorFrame::error`].
pub mod error_codes {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const DB_ERROR: &str = "db_error";
    pub const NEURAL_ERROR: &str = "neural_error";
}

/// Serialized pong frame, sent in reply to an upstream ping.
pub const PONG_FRAME: &str = r#"{"type":"pong"}"#;

// ── Downstream frames ────────────────────────────────────────────────────────

/// Prompt frame sent by a browser client.
///
/// The identifiers arrive as plain strings and are validated as UUIDs by
/// the session, so a malformed identifier is a validation error reported
/// to the client rather than a decode failure. Missing fields decode as
/// empty strings for the same reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// Client-generated message identifier; the upstream correlation key.
    pub uuid: String,
    /// Conversation the message belongs to. Not forwarded upstream.
    pub chat_uuid: String,
    /// Which upstream model should answer.
    pub model_name: String,
    /// The prompt text.
    pub message: String,
}

/// Bot reply pushed to the client once the full pipeline has completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsBotMessage {
    pub r#type: String, // always "bot_message"
    pub chat_uuid: Uuid,
    pub user_message_uuid: Uuid,
    /// Freshly generated by the gateway for the persisted bot turn.
    pub bot_message_uuid: Uuid,
    pub response: String,
    /// RFC-3339 timestamp produced upstream, passed through verbatim.
    pub created_at: String,
}

impl WsBotMessage {
    pub fn new(
        chat_uuid: Uuid,
        user_message_uuid: Uuid,
        bot_message_uuid: Uuid,
        response: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            r#type: "bot_message".into(),
            chat_uuid,
            user_message_uuid,
            bot_message_uuid,
            response: response.into(),
            created_at: created_at.into(),
        }
    }
}

/// Per-frame error reported to the client. The session stays open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
    pub msg: String,
}

impl ErrorFrame {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self {
            error: error_codes::VALIDATION_ERROR.into(),
            msg: msg.into(),
        }
    }

    pub fn db(msg: impl Into<String>) -> Self {
        Self {
            error: error_codes::DB_ERROR.into(),
            msg: msg.into(),
        }
    }

    pub fn neural(msg: impl Into<String>) -> Self {
        Self {
            error: error_codes::NEURAL_ERROR.into(),
            msg: msg.into(),
        }
    }
}

// ── Upstream frames ──────────────────────────────────────────────────────────

/// Payload forwarded to the neural backend.
///
/// `chat_uuid` is deliberately absent: conversation grouping stays a
/// gateway-side concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuralRequest {
    pub uuid: Uuid,
    pub model_name: String,
    pub message: String,
}

/// Completion produced by the neural backend.
///
/// `uuid` echoes the request and is the correlation key. It stays a string
/// on the wire; empty or malformed values make the frame uncorrelatable
/// and it is dropped by the demultiplexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralResponse {
    pub uuid: String,
    pub response: String,
    pub created_at: String,
}

/// Application-level heartbeat on the upstream channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub r#type: String, // "ping" or "pong"
}

impl Heartbeat {
    pub fn ping() -> Self {
        Self {
            r#type: "ping".into(),
        }
    }

    pub fn pong() -> Self {
        Self {
            r#type: "pong".into(),
        }
    }

    pub fn is_ping(&self) -> bool {
        self.r#type == "ping"
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
