use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::messaging::{MessageList, SendMessageRequest, SendMessageResponse};
use crate::error::{AppError, Result};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

/// Stores a message and nudges the recipient.
///
/// Answers 201 for a new row and 200 when the client message id was already stored.
///
/// # Errors
/// Returns `AppError::Validation` for a malformed body or a rejected message.
/// Returns `AppError::NotFound` if the recipient does not exist.
/// Returns `AppError::Conflict` if the same client message id is mid-send.
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    let report = state
        .delivery_service
        .send(auth_user.user_id, request.recipient_id, request.content, request.subject, request.client_message_id)
        .await?;

    let status = if report.replayed { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(SendMessageResponse::from(report))))
}

/// Every message the caller sent or received, oldest first.
///
/// # Errors
/// Returns a persistence error if the store fails.
pub async fn list_messages(auth_user: AuthUser, State(state): State<AppState>) -> Result<Json<MessageList>> {
    let messages = state.message_service.query(auth_user.user_id).await?;
    Ok(Json(messages.into()))
}
