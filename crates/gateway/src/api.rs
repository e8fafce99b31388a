//! REST surface: chat CRUD and message feedback.
//!
//! Authentication is stubbed for now: callers identify themselves with a
//! plain `user_id`, and ownership checks happen in the storage layer.

use {
    axum::{
        Json,
        extract::{Path, Query, State},
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

use neurelay_storage::{self as storage, CreateChat};

use crate::server::AppState;

// ── Error envelope ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Serialize)]
struct ApiErrorDetail {
    code: &'static str,
    message: String,
}

/// Storage failure mapped onto an HTTP response.
pub struct ApiError(storage::Error);

impl From<storage::Error> for ApiError {
    fn from(err: storage::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            storage::Error::ModelNotFound => (StatusCode::NOT_FOUND, "model_not_found"),
            storage::Error::ChatNotFound => (StatusCode::NOT_FOUND, "chat_not_found"),
            storage::Error::MessageNotFound => (StatusCode::NOT_FOUND, "message_not_found"),
            storage::Error::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            storage::Error::NotBotMessage => (StatusCode::BAD_REQUEST, "not_bot_message"),
            storage::Error::Sqlx(e) => {
                tracing::error!("storage failure: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        // SQL details stay in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(ApiErrorBody {
                error: ApiErrorDetail { code, message },
            }),
        )
            .into_response()
    }
}

// ── Request shapes ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UserIdParam {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateChatBody {
    pub chat_uuid: Uuid,
    pub user_id: i64,
    pub model_name: String,
    #[serde(default)]
    pub model_version: String,
    /// First-message text the chat title is derived from.
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub user_id: i64,
    pub is_positive: bool,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// `POST /chats` — create a chat under a client-supplied UUID.
pub async fn create_chat(
    State(state): State<AppState>,
    Json(body): Json<CreateChatBody>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .chats
        .create_chat(CreateChat {
            chat_uuid: body.chat_uuid,
            user_id: body.user_id,
            model_name: body.model_name,
            model_version: body.model_version,
            title: body.title,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /chats?user_id=` — the user's non-deleted chats, newest first.
pub async fn list_chats(
    State(state): State<AppState>,
    Query(params): Query<UserIdParam>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state.chats.list_chats(params.user_id).await?;
    Ok(Json(serde_json::json!({ "items": items })))
}

/// `GET /chats/{id}/messages?user_id=` — non-deleted messages in order.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(chat_uuid): Path<Uuid>,
    Query(params): Query<UserIdParam>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state.chats.list_messages(params.user_id, chat_uuid).await?;
    Ok(Json(serde_json::json!({
        "chat_id": chat_uuid,
        "items": items,
    })))
}

/// `DELETE /chats/{id}?user_id=` — soft-delete a chat and its messages.
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_uuid): Path<Uuid>,
    Query(params): Query<UserIdParam>,
) -> Result<impl IntoResponse, ApiError> {
    state.chats.delete_chat(params.user_id, chat_uuid).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /messages/{id}/feedback` — up/down-vote a bot message.
pub async fn set_feedback(
    State(state): State<AppState>,
    Path(message_uuid): Path<Uuid>,
    Json(body): Json<FeedbackBody>,
) -> Result<impl IntoResponse, ApiError> {
    let feedback = state
        .chats
        .set_feedback(message_uuid, body.user_id, body.is_positive)
        .await?;
    Ok(Json(feedback))
}
