//! Storage ports and their PostgreSQL implementation.
//!
//! The WebSocket session persists turns through the narrow
//! [`MessageStore`] port; the REST surface drives [`ChatStore`]. Both are
//! implemented by [`PgStorage`].

mod models;
mod postgres;

pub use {
    models::{ChatCreated, ChatItem, CreateChat, Feedback, MessageItem, ROLE_BOT, ROLE_USER},
    postgres::PgStorage,
};

use async_trait::async_trait;
use uuid::Uuid;

/// Embedded schema migrations, applied by the migrator binary.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("model not found")]
    ModelNotFound,
    #[error("chat not found")]
    ChatNotFound,
    #[error("message not found")]
    MessageNotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("not a bot message")]
    NotBotMessage,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Ports ────────────────────────────────────────────────────────────────────

/// The narrow port the WebSocket session persists turns through.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a user turn. Idempotent on `message_uuid`: a retransmitted
    /// frame with the same identifier is a silent no-op.
    async fn insert_user_message(
        &self,
        chat_uuid: Uuid,
        message_uuid: Uuid,
        content: &str,
    ) -> Result<()>;

    /// Insert a bot turn answering `reply_to`. The caller guarantees a
    /// freshly generated `message_uuid`.
    async fn insert_bot_message(
        &self,
        chat_uuid: Uuid,
        message_uuid: Uuid,
        content: &str,
        reply_to: Uuid,
    ) -> Result<()>;
}

/// Chat CRUD and feedback, consumed by the REST handlers.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_chat(&self, req: CreateChat) -> Result<ChatCreated>;
    async fn list_chats(&self, user_id: i64) -> Result<Vec<ChatItem>>;
    async fn list_messages(&self, user_id: i64, chat_uuid: Uuid) -> Result<Vec<MessageItem>>;
    /// Soft-delete a chat and all of its messages.
    async fn delete_chat(&self, user_id: i64, chat_uuid: Uuid) -> Result<()>;
    /// Up- or down-vote a bot message. Repeated votes by the same user
    /// overwrite the previous one.
    async fn set_feedback(
        &self,
        message_uuid: Uuid,
        user_id: i64,
        is_positive: bool,
    ) -> Result<Feedback>;
}
