use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use corral_types::api::{
    ArchiveResponse, Claims, GetOrCreateQuery, MarkReadResponse, SendMessageRequest,
};
use corral_types::error::ChatError;
use corral_types::models::Conversation;

use crate::AppState;
use crate::error::ApiError;

/// Active conversations for the caller, most recent activity first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let user_id = claims.sub;
    let conversations = run_store(move |state| state.store.list_for_user(user_id), state).await?;
    Ok(Json(conversations))
}

/// Fetch or create the conversation with another user, optionally
/// scoped to a listing.
pub async fn get_or_create(
    State(state): State<AppState>,
    Path(other_user_id): Path<Uuid>,
    Query(query): Query<GetOrCreateQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Conversation>, ApiError> {
    let user_id = claims.sub;
    let conversation = run_store(
        move |state| state.store.get_or_create(user_id, other_user_id, query.listing_id),
        state,
    )
    .await?;
    Ok(Json(conversation))
}

/// The single durable write path for messages. The real-time broadcast
/// is a separate, client-initiated gateway relay layered on top — never
/// a substitute for this call.
pub async fn append_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sender_id = claims.sub;
    let message = run_store(
        move |state| {
            state
                .store
                .append_message(conversation_id, sender_id, &req.content, &req.attachments)
        },
        state,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Mark everything from the other participant as read. Safe to repeat.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let reader_id = claims.sub;
    let updated = run_store(
        move |state| state.store.mark_read(conversation_id, reader_id),
        state,
    )
    .await?;
    Ok(Json(MarkReadResponse {
        message: "messages marked as read",
        updated,
    }))
}

/// Archive a conversation. Messages are kept and remain readable.
pub async fn archive(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ArchiveResponse>, ApiError> {
    let requester_id = claims.sub;
    run_store(
        move |state| state.store.archive(conversation_id, requester_id),
        state,
    )
    .await?;
    Ok(Json(ArchiveResponse {
        message: "conversation archived",
    }))
}

/// Run a blocking store call off the async runtime. A dropped request
/// does not cancel the write: the blocking task runs to completion
/// regardless of the caller's fate.
async fn run_store<T, F>(f: F, state: AppState) -> Result<T, ApiError>
where
    F: FnOnce(AppState) -> Result<T, ChatError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError(ChatError::Store("store task failed".into()))
        })?
        .map_err(ApiError)
}
