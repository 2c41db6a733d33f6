use axum::{extract::State, http::HeaderMap, Json};
use ulid::Ulid;

use strand_core::MessageContent;

use crate::server::{
    auth::{authenticate, now_unix},
    core::{AppState, MessageRecord, MAX_RETAINED_MESSAGES},
    errors::AuthFailure,
    types::{CreateMessageRequest, MessageListResponse, MessageResponse},
};

const MESSAGE_LIST_LIMIT: usize = 50;

pub(crate) async fn create_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMessageRequest>,
) -> Result<Json<MessageResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let content =
        MessageContent::try_from(payload.content).map_err(|_| AuthFailure::InvalidRequest)?;

    let record = MessageRecord {
        id: Ulid::new().to_string(),
        author_id: auth.user_id,
        content: content.as_str().to_owned(),
        created_at_unix: now_unix(),
    };

    let mut messages = state.messages.write().await;
    messages.push(record.clone());
    if messages.len() > MAX_RETAINED_MESSAGES {
        let overflow = messages.len() - MAX_RETAINED_MESSAGES;
        messages.drain(..overflow);
    }
    drop(messages);

    Ok(Json(MessageResponse {
        id: record.id,
        author_id: record.author_id.to_string(),
        content: record.content,
        created_at_unix: record.created_at_unix,
    }))
}

pub(crate) async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageListResponse>, AuthFailure> {
    let _auth = authenticate(&state, &headers).await?;

    let messages = state.messages.read().await;
    let start = messages.len().saturating_sub(MESSAGE_LIST_LIMIT);
    let recent = messages[start..]
        .iter()
        .map(|record| MessageResponse {
            id: record.id.clone(),
            author_id: record.author_id.to_string(),
            content: record.content.clone(),
            created_at_unix: record.created_at_unix,
        })
        .collect();

    Ok(Json(MessageListResponse { messages: recent }))
}
