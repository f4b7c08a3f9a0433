//! Gateway-facing handlers
//!
//! The messaging gateway POSTs inbound replies here; the reply resolver
//! turns the free text into a typed confirmation response or a protocol
//! error the gateway relays back to the sender.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::services::matching::MatchingError;
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    /// Messaging-channel recipient identifier of the sender.
    pub sender: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct InboundResult {
    pub handled: bool,
    pub reply: Option<String>,
}

/// POST /internal/messaging/inbound
pub async fn inbound_message(
    State(state): State<Arc<AppState>>,
    Json(msg): Json<InboundMessage>,
) -> Result<Json<ApiResponse<InboundResult>>, AppError> {
    let user = state
        .store
        .get_user_by_messaging_address(&msg.sender)
        .await
        .map_err(|e| {
            tracing::error!("Sender lookup failed: {}", e);
            AppError::internal("store unavailable, try again")
        })?
        .ok_or_else(|| AppError::not_found("unknown sender"))?;

    match state.engine.handle_messaging_reply(user.id, &msg.text).await {
        Ok(()) => Ok(Json(ApiResponse::success(InboundResult {
            handled: true,
            reply: None,
        }))),
        Err(
            e @ (MatchingError::UnparseableReply(_)
            | MatchingError::UnknownConfirmation(_)
            | MatchingError::NotAuthorized(_)),
        ) => {
            // Protocol errors go back to the sender; order state is
            // untouched.
            Ok(Json(ApiResponse::success(InboundResult {
                handled: false,
                reply: Some(e.to_string()),
            })))
        }
        Err(e) => {
            tracing::error!("Inbound reply processing failed: {}", e);
            Err(AppError::internal("store unavailable, try again"))
        }
    }
}
