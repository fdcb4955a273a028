use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::conversations::{ConversationList, ReadReceipt, ThreadView};
use crate::error::Result;
use crate::services::conversation_service::OpenedThread;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadParams {
    /// Open the thread: mark it read before returning it.
    #[serde(default)]
    pub mark_read: bool,
}

/// # Errors
/// Returns a persistence error if the store fails.
pub async fn list_conversations(auth_user: AuthUser, State(state): State<AppState>) -> Result<Json<ConversationList>> {
    let summaries = state.conversation_service.list(auth_user.user_id).await?;
    Ok(Json(summaries.into()))
}

/// # Errors
/// Returns `AppError::Validation` if `partnerId` is the caller.
/// Returns a persistence error if the store fails.
pub async fn get_thread(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(partner_id): Path<Uuid>,
    Query(params): Query<ThreadParams>,
) -> Result<Json<ThreadView>> {
    let thread = if params.mark_read {
        state.conversation_service.open_thread(auth_user.user_id, partner_id).await?
    } else {
        let messages = state.message_service.query_thread(auth_user.user_id, partner_id).await?;
        OpenedThread { messages, marked: 0 }
    };
    Ok(Json(ThreadView::new(partner_id, thread)))
}

/// # Errors
/// Returns `AppError::Validation` if `partnerId` is the caller.
/// Returns a persistence error if the store fails.
pub async fn mark_read(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(partner_id): Path<Uuid>,
) -> Result<Json<ReadReceipt>> {
    let marked = state.read_state_service.mark_read(auth_user.user_id, partner_id).await?;
    Ok(Json(ReadReceipt { marked }))
}
