//! PostgreSQL-backed implementation of the storage ports.

use {
    async_trait::async_trait,
    sqlx::postgres::{PgPool, PgPoolOptions},
    tracing::info,
    uuid::Uuid,
};

use crate::{
    ChatStore, Error, MessageStore, Result,
    models::{ChatCreated, ChatItem, CreateChat, Feedback, MessageItem, ROLE_BOT, ROLE_USER},
};

const MAX_TITLE_CHARS: usize = 80;

pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Open a pool against `database_url` and verify connectivity.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        info!("connected to postgres");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Derive a chat title from the first message text: cut at the first
/// sentence boundary, clip to 80 characters.
fn title_from_first_message(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "New chat".to_string();
    }

    let mut cut = text.len();
    for sep in ['.', '!', '?', '\n'] {
        if let Some(idx) = text.find(sep)
            && idx < cut
        {
            cut = idx;
        }
    }
    let mut title = text[..cut].trim();
    if title.is_empty() {
        title = text;
    }
    match title.char_indices().nth(MAX_TITLE_CHARS) {
        Some((idx, _)) => title[..idx].to_string(),
        None => title.to_string(),
    }
}

#[async_trait]
impl ChatStore for PgStorage {
    async fn create_chat(&self, req: CreateChat) -> Result<ChatCreated> {
        let mut tx = self.pool.begin().await?;

        let model_id: i64 = sqlx::query_scalar(
            "SELECT id FROM bot_models \
             WHERE name = $1 AND version = $2 AND is_active = TRUE",
        )
        .bind(&req.model_name)
        .bind(&req.model_version)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::ModelNotFound)?;

        let title = title_from_first_message(&req.title);

        sqlx::query(
            "INSERT INTO chats (chat_uuid, user_id, model_id, title) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(req.chat_uuid)
        .bind(req.user_id)
        .bind(model_id)
        .bind(&title)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ChatCreated {
            chat_uuid: req.chat_uuid,
        })
    }

    async fn list_chats(&self, user_id: i64) -> Result<Vec<ChatItem>> {
        let items = sqlx::query_as::<_, ChatItem>(
            "SELECT chat_uuid, title, model_id, updated_at FROM chats \
             WHERE user_id = $1 AND is_deleted = FALSE \
             ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn list_messages(&self, user_id: i64, chat_uuid: Uuid) -> Result<Vec<MessageItem>> {
        let chat: Option<(i64, bool)> =
            sqlx::query_as("SELECT user_id, is_deleted FROM chats WHERE chat_uuid = $1")
                .bind(chat_uuid)
                .fetch_optional(&self.pool)
                .await?;
        let (owner, is_deleted) = chat.ok_or(Error::ChatNotFound)?;
        if is_deleted {
            return Err(Error::ChatNotFound);
        }
        if owner != user_id {
            return Err(Error::Forbidden);
        }

        let items = sqlx::query_as::<_, MessageItem>(
            "SELECT message_uuid, role, content, created_at, reply_to_message_id \
             FROM messages \
             WHERE chat_uuid = $1 AND is_deleted = FALSE \
             ORDER BY created_at ASC",
        )
        .bind(chat_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn delete_chat(&self, user_id: i64, chat_uuid: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE chats \
             SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW() \
             WHERE chat_uuid = $1 AND user_id = $2 AND is_deleted = FALSE",
        )
        .bind(chat_uuid)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish "not yours" from "gone" for the caller.
            let chat: Option<(i64, bool)> =
                sqlx::query_as("SELECT user_id, is_deleted FROM chats WHERE chat_uuid = $1")
                    .bind(chat_uuid)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match chat {
                Some((owner, _)) if owner != user_id => Error::Forbidden,
                _ => Error::ChatNotFound,
            });
        }

        sqlx::query(
            "UPDATE messages \
             SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW() \
             WHERE chat_uuid = $1 AND is_deleted = FALSE",
        )
        .bind(chat_uuid)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_feedback(
        &self,
        message_uuid: Uuid,
        user_id: i64,
        is_positive: bool,
    ) -> Result<Feedback> {
        // The model is taken from the chat row rather than the request so
        // feedback cannot be attributed to an arbitrary model.
        let row: Option<(String, bool, i64, i64)> = sqlx::query_as(
            "SELECT m.role, m.is_deleted, c.user_id, c.model_id \
             FROM messages m \
             JOIN chats c ON c.chat_uuid = m.chat_uuid \
             WHERE m.message_uuid = $1",
        )
        .bind(message_uuid)
        .fetch_optional(&self.pool)
        .await?;

        let (role, is_deleted, owner, model_id) = row.ok_or(Error::MessageNotFound)?;
        if is_deleted {
            return Err(Error::MessageNotFound);
        }
        if owner != user_id {
            return Err(Error::Forbidden);
        }
        if role != ROLE_BOT {
            return Err(Error::NotBotMessage);
        }

        sqlx::query(
            "INSERT INTO message_feedbacks (message_uuid, user_id, model_id, is_positive) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, message_uuid) \
             DO UPDATE SET is_positive = EXCLUDED.is_positive, updated_at = NOW()",
        )
        .bind(message_uuid)
        .bind(user_id)
        .bind(model_id)
        .bind(is_positive)
        .execute(&self.pool)
        .await?;

        Ok(Feedback {
            message_id: message_uuid,
            is_positive,
        })
    }
}

#[async_trait]
impl MessageStore for PgStorage {
    async fn insert_user_message(
        &self,
        chat_uuid: Uuid,
        message_uuid: Uuid,
        content: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (message_uuid, chat_uuid, role, content) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (message_uuid) DO NOTHING",
        )
        .bind(message_uuid)
        .bind(chat_uuid)
        .bind(ROLE_USER)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_bot_message(
        &self,
        chat_uuid: Uuid,
        message_uuid: Uuid,
        content: &str,
        reply_to: Uuid,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (message_uuid, chat_uuid, role, content, reply_to_message_id) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(message_uuid)
        .bind(chat_uuid)
        .bind(ROLE_BOT)
        .bind(content)
        .bind(reply_to)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn title_cuts_at_sentence_boundary() {
        assert_eq!(
            title_from_first_message("How do I bake bread? I have flour."),
            "How do I bake bread"
        );
        assert_eq!(title_from_first_message("First line\nsecond line"), "First line");
        assert_eq!(title_from_first_message("No boundary here"), "No boundary here");
    }

    #[test]
    fn title_empty_input_falls_back() {
        assert_eq!(title_from_first_message(""), "New chat");
        assert_eq!(title_from_first_message("   "), "New chat");
    }

    #[test]
    fn title_leading_separator_keeps_full_text() {
        // A sentence boundary at position zero would yield an empty title.
        assert_eq!(title_from_first_message("...huh"), "...huh");
    }

    #[test]
    fn title_clipped_to_80_chars_on_char_boundary() {
        let long = "ы".repeat(120);
        let title = title_from_first_message(&long);
        assert_eq!(title.chars().count(), 80);
    }

    // The tests below need a live server:
    //   DATABASE_URL=postgres://... cargo test -p neurelay-storage -- --ignored

    async fn test_storage() -> PgStorage {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let storage = PgStorage::connect(&url).await.expect("connect");
        crate::MIGRATOR.run(storage.pool()).await.expect("migrate");
        storage
    }

    async fn seed_chat(storage: &PgStorage, user_id: i64) -> Uuid {
        sqlx::query(
            "INSERT INTO bot_models (name, version) VALUES ('test-model', 'v1') \
             ON CONFLICT (name, version) DO NOTHING",
        )
        .execute(storage.pool())
        .await
        .expect("seed model");

        let chat_uuid = Uuid::new_v4();
        storage
            .create_chat(CreateChat {
                chat_uuid,
                user_id,
                model_name: "test-model".into(),
                model_version: "v1".into(),
                title: "Hello there. And more.".into(),
            })
            .await
            .expect("create chat");
        chat_uuid
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn user_message_insert_is_idempotent() {
        let storage = test_storage().await;
        let chat_uuid = seed_chat(&storage, 1).await;
        let message_uuid = Uuid::new_v4();

        storage
            .insert_user_message(chat_uuid, message_uuid, "hi")
            .await
            .expect("first insert");
        storage
            .insert_user_message(chat_uuid, message_uuid, "hi")
            .await
            .expect("duplicate insert is a no-op");

        let messages = storage.list_messages(1, chat_uuid).await.expect("list");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ROLE_USER);
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn soft_delete_hides_chat_and_messages() {
        let storage = test_storage().await;
        let chat_uuid = seed_chat(&storage, 2).await;
        let user_msg = Uuid::new_v4();
        storage
            .insert_user_message(chat_uuid, user_msg, "hi")
            .await
            .expect("insert user");
        storage
            .insert_bot_message(chat_uuid, Uuid::new_v4(), "hello", user_msg)
            .await
            .expect("insert bot");

        storage.delete_chat(2, chat_uuid).await.expect("delete");

        assert!(
            storage
                .list_chats(2)
                .await
                .expect("list chats")
                .iter()
                .all(|c| c.chat_uuid != chat_uuid)
        );
        assert!(matches!(
            storage.list_messages(2, chat_uuid).await,
            Err(Error::ChatNotFound)
        ));
        // Deleting twice reports not-found, not success.
        assert!(matches!(
            storage.delete_chat(2, chat_uuid).await,
            Err(Error::ChatNotFound)
        ));
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn feedback_upserts_and_rejects_user_messages() {
        let storage = test_storage().await;
        let chat_uuid = seed_chat(&storage, 3).await;
        let user_msg = Uuid::new_v4();
        let bot_msg = Uuid::new_v4();
        storage
            .insert_user_message(chat_uuid, user_msg, "hi")
            .await
            .expect("insert user");
        storage
            .insert_bot_message(chat_uuid, bot_msg, "hello", user_msg)
            .await
            .expect("insert bot");

        let up = storage.set_feedback(bot_msg, 3, true).await.expect("vote up");
        assert!(up.is_positive);
        let down = storage
            .set_feedback(bot_msg, 3, false)
            .await
            .expect("vote flips");
        assert!(!down.is_positive);

        assert!(matches!(
            storage.set_feedback(user_msg, 3, true).await,
            Err(Error::NotBotMessage)
        ));
        assert!(matches!(
            storage.set_feedback(bot_msg, 99, true).await,
            Err(Error::Forbidden)
        ));
    }
}
