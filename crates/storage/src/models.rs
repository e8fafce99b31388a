use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    uuid::Uuid,
};

/// Message roles as stored in the `messages.role` column.
pub const ROLE_USER: &str = "user";
pub const ROLE_BOT: &str = "bot";

/// Input to [`ChatStore::create_chat`](crate::ChatStore::create_chat).
#[derive(Debug, Clone)]
pub struct CreateChat {
    /// Client-supplied chat identifier; the first WebSocket message for
    /// this conversation will carry the same value.
    pub chat_uuid: Uuid,
    pub user_id: i64,
    pub model_name: String,
    pub model_version: String,
    /// First-message text the chat title is derived from.
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCreated {
    pub chat_uuid: Uuid,
}

/// One row of `GET /chats`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatItem {
    #[serde(rename = "id")]
    pub chat_uuid: Uuid,
    pub title: String,
    pub model_id: i64,
    pub updated_at: DateTime<Utc>,
}

/// One row of `GET /chats/{id}/messages`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageItem {
    #[serde(rename = "id")]
    pub message_uuid: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feedback {
    pub message_id: Uuid,
    pub is_positive: bool,
}
