//! WebSocket Session Handler
//!
//! One task per connected session. The first frame must authenticate with a
//! session token (issued by the external identity service; only validated
//! here). On success the session auto-joins its user room, the market room
//! of every contract it holds a live order in, and the admin room for
//! administrators. After that the task forwards room traffic out and
//! confirmation responses in.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::jwt::validate_token;
use crate::websocket::fanout::{market_room, user_room, ADMIN_ROOM};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "auth")]
    Auth { token: String },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "quantity:confirmation_response")]
    ConfirmationResponse {
        confirmation_key: String,
        accepted: bool,
        #[serde(default)]
        new_qty: Option<i64>,
    },
    #[serde(rename = "match:approval_response")]
    ApprovalResponse { key: String, accepted: bool },
    #[serde(rename = "negotiation:response")]
    NegotiationResponse {
        key: String,
        accepted: bool,
        #[serde(default)]
        new_qty: Option<i64>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    AuthResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
}

async fn send_control(sender: &mut SplitSink<WebSocket, Message>, msg: &ControlMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        let _ = sender.send(Message::Text(json)).await;
    }
}

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Authentication gate: nothing is delivered until a valid token shows
    // up. Token issuance lives in the external identity service.
    let user = loop {
        let frame = match receiver.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!("WebSocket closed before auth: {}", e);
                return;
            }
        };

        let Ok(ClientMessage::Auth { token }) = serde_json::from_str::<ClientMessage>(&frame)
        else {
            send_control(
                &mut sender,
                &ControlMessage::Error {
                    code: "AUTH_REQUIRED".to_string(),
                    message: "Authenticate before subscribing".to_string(),
                },
            )
            .await;
            continue;
        };

        let claims = match validate_token(&token, &state.config.jwt_secret) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!("WebSocket token validation failed: {}", e);
                send_control(
                    &mut sender,
                    &ControlMessage::AuthResult {
                        success: false,
                        message: Some("Invalid or expired token".to_string()),
                    },
                )
                .await;
                continue;
            }
        };

        let user_id = match claims.sub.parse::<Uuid>() {
            Ok(id) => id,
            Err(_) => {
                send_control(
                    &mut sender,
                    &ControlMessage::AuthResult {
                        success: false,
                        message: Some("Malformed subject".to_string()),
                    },
                )
                .await;
                continue;
            }
        };

        match state.store.get_user(user_id).await {
            Ok(Some(user)) => break user,
            Ok(None) => {
                send_control(
                    &mut sender,
                    &ControlMessage::AuthResult {
                        success: false,
                        message: Some("Unknown user".to_string()),
                    },
                )
                .await;
            }
            Err(e) => {
                tracing::error!("User lookup failed during WebSocket auth: {}", e);
                send_control(
                    &mut sender,
                    &ControlMessage::AuthResult {
                        success: false,
                        message: Some("Try again".to_string()),
                    },
                )
                .await;
            }
        }
    };

    let session = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let rooms = state.fanout.rooms();

    rooms.join(&user_room(user.id), session, tx.clone());
    if user.is_admin {
        rooms.join(ADMIN_ROOM, session, tx.clone());
    }
    match state.store.contracts_with_active_orders(user.id).await {
        Ok(contracts) => {
            for contract in contracts {
                rooms.join(&market_room(&contract), session, tx.clone());
            }
        }
        Err(e) => tracing::warn!("Could not auto-join market rooms for {}: {}", user.id, e),
    }

    send_control(
        &mut sender,
        &ControlMessage::AuthResult {
            success: true,
            message: None,
        },
    )
    .await;
    tracing::info!("WebSocket session {} attached for user {}", session, user.id);

    loop {
        tokio::select! {
            // Room traffic out.
            envelope = rx.recv() => {
                match envelope {
                    Some(envelope) => {
                        if let Ok(json) = serde_json::to_string(&envelope) {
                            if sender.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }

            // Client frames in.
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &user.id, &text, &mut sender).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        // Resets without a closing handshake are routine.
                        tracing::debug!("WebSocket disconnected: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    rooms.drop_session(session);
    tracing::info!("WebSocket session {} detached for user {}", session, user.id);
}

async fn handle_frame(
    state: &Arc<AppState>,
    user_id: &Uuid,
    text: &str,
    sender: &mut SplitSink<WebSocket, Message>,
) {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            send_control(
                sender,
                &ControlMessage::Error {
                    code: "INVALID_MESSAGE".to_string(),
                    message: format!("Failed to parse message: {}", e),
                },
            )
            .await;
            return;
        }
    };

    let (key, accepted, new_qty) = match msg {
        ClientMessage::Ping => {
            send_control(sender, &ControlMessage::Pong).await;
            return;
        }
        ClientMessage::Auth { .. } => {
            send_control(
                sender,
                &ControlMessage::AuthResult {
                    success: true,
                    message: None,
                },
            )
            .await;
            return;
        }
        ClientMessage::ConfirmationResponse {
            confirmation_key,
            accepted,
            new_qty,
        } => (confirmation_key, accepted, new_qty),
        ClientMessage::ApprovalResponse { key, accepted } => (key, accepted, None),
        ClientMessage::NegotiationResponse {
            key,
            accepted,
            new_qty,
        } => (key, accepted, new_qty),
    };

    if let Err(e) = state
        .engine
        .handle_session_response(*user_id, &key, accepted, new_qty)
        .await
    {
        tracing::debug!("Response for {} rejected: {}", key, e);
        send_control(
            sender,
            &ControlMessage::Error {
                code: "PROTOCOL_ERROR".to_string(),
                message: e.to_string(),
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_response_wire_format() {
        let frame = r#"{
            "type": "quantity:confirmation_response",
            "confirmation_key": "jan26-silver:a:b",
            "accepted": true,
            "new_qty": 50
        }"#;

        match serde_json::from_str::<ClientMessage>(frame).unwrap() {
            ClientMessage::ConfirmationResponse {
                confirmation_key,
                accepted,
                new_qty,
            } => {
                assert_eq!(confirmation_key, "jan26-silver:a:b");
                assert!(accepted);
                assert_eq!(new_qty, Some(50));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_decline_without_qty() {
        let frame = r#"{"type":"quantity:confirmation_response","confirmation_key":"k","accepted":false}"#;
        match serde_json::from_str::<ClientMessage>(frame).unwrap() {
            ClientMessage::ConfirmationResponse { accepted, new_qty, .. } => {
                assert!(!accepted);
                assert_eq!(new_qty, None);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_approval_and_negotiation_frames() {
        let approval = r#"{"type":"match:approval_response","key":"k1","accepted":true}"#;
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(approval).unwrap(),
            ClientMessage::ApprovalResponse { .. }
        ));

        let negotiation = r#"{"type":"negotiation:response","key":"k2","accepted":false}"#;
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(negotiation).unwrap(),
            ClientMessage::NegotiationResponse { .. }
        ));
    }

    #[test]
    fn test_unknown_frame_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_control_message_wire_format() {
        let json = serde_json::to_string(&ControlMessage::AuthResult {
            success: true,
            message: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"auth_result","success":true}"#);
    }
}
