//! Op code handlers
//!
//! Handles incoming WebSocket messages based on their operation code.

mod authenticate;
mod error;
mod heartbeat;
mod history;
mod messages;
mod presence;
mod rooms;
mod typing;

pub use authenticate::AuthenticateHandler;
pub use error::{error_event, HandlerError, HandlerResult};
pub use heartbeat::HeartbeatHandler;
pub use history::HistoryHandler;
pub use messages::MessageHandler;
pub use presence::PresenceHandler;
pub use rooms::RoomHandler;
pub use typing::TypingHandler;

use crate::connection::Connection;
use crate::protocol::{CloseCode, GatewayMessage, OpCode};
use crate::server::GatewayState;
use chat_core::{DomainError, RealtimeEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use validator::Validate;

/// Dispatch incoming client messages to appropriate handlers
pub struct MessageDispatcher;

impl MessageDispatcher {
    /// Handle an incoming client message
    ///
    /// Domain failures are answered with an `error` dispatch carrying the
    /// frame's nonce; only protocol failures surface as a close code.
    pub async fn dispatch(
        state: &GatewayState,
        connection: &Arc<Connection>,
        message: GatewayMessage,
    ) -> HandlerResult<Option<CloseCode>> {
        // Validate that this is a client-sendable op code
        if !message.op.is_client_op() {
            tracing::warn!(
                connection_id = %connection.id(),
                op = %message.op,
                "Received server-only op code from client"
            );
            return Ok(Some(CloseCode::UnknownOpcode));
        }

        if !message.op.allowed_before_auth() && !connection.is_authenticated().await {
            tracing::debug!(
                connection_id = %connection.id(),
                op = %message.op,
                "Op received before Authenticate"
            );
            return Err(HandlerError::NotAuthenticated);
        }

        let nonce = message.nonce.clone();
        let outcome = Self::route(state, connection, &message).await;

        match outcome {
            Err(HandlerError::Domain(error)) => {
                report_domain_error(connection, &error, nonce).await?;
                Ok(None)
            }
            other => other,
        }
    }

    async fn route(
        state: &GatewayState,
        connection: &Arc<Connection>,
        message: &GatewayMessage,
    ) -> HandlerResult<Option<CloseCode>> {
        let nonce = message.nonce.clone();

        match message.op {
            OpCode::Heartbeat => {
                let seq = message.as_heartbeat_seq().flatten();
                HeartbeatHandler::handle(state, connection, seq).await
            }
            OpCode::Authenticate => {
                AuthenticateHandler::handle(state, connection, message.payload()?, nonce).await
            }
            OpCode::UpdatePresence => {
                PresenceHandler::handle(state, connection, validated(message)?, nonce).await
            }
            OpCode::JoinRoom => RoomHandler::join(state, connection, message.payload()?, nonce).await,
            OpCode::LeaveRoom => RoomHandler::leave(state, connection, message.payload()?, nonce).await,
            OpCode::SendMessage => MessageHandler::send(state, connection, validated(message)?, nonce).await,
            OpCode::StartTyping => TypingHandler::handle(state, connection, message.payload()?, true),
            OpCode::StopTyping => TypingHandler::handle(state, connection, message.payload()?, false),
            OpCode::MessageAction => {
                MessageHandler::action(state, connection, message.payload()?, nonce).await
            }
            OpCode::RequestHistory => {
                HistoryHandler::handle(state, connection, validated(message)?, nonce).await
            }
            // These ops should never reach here due to is_client_op check
            OpCode::Dispatch | OpCode::Hello | OpCode::HeartbeatAck => {
                tracing::error!(op = %message.op, "Unhandled client op code");
                Ok(Some(CloseCode::UnknownOpcode))
            }
        }
    }
}

/// Decode and validate a payload; shape errors close the socket, rule violations do not
fn validated<T: DeserializeOwned + Validate>(message: &GatewayMessage) -> HandlerResult<T> {
    let payload: T = message.payload()?;
    payload.validate()?;
    Ok(payload)
}

/// Send a synchronous reply to the originating connection
pub(crate) async fn reply(connection: &Connection, event: &RealtimeEvent, nonce: Option<String>) -> HandlerResult<()> {
    let frame = GatewayMessage::from_event(event)
        .map_err(|e| HandlerError::Internal(format!("Failed to encode {}: {e}", event.name())))?;
    send_frame(connection, frame.with_nonce(nonce)).await
}

/// Send a dispatch that has no `RealtimeEvent` counterpart (`ready`, `receiptAck`)
pub(crate) async fn reply_with<T: Serialize>(
    connection: &Connection,
    event_name: &str,
    data: &T,
    nonce: Option<String>,
) -> HandlerResult<()> {
    let value = serde_json::to_value(data)
        .map_err(|e| HandlerError::Internal(format!("Failed to encode {event_name}: {e}")))?;
    send_frame(connection, GatewayMessage::dispatch(event_name, value).with_nonce(nonce)).await
}

async fn send_frame(connection: &Connection, frame: GatewayMessage) -> HandlerResult<()> {
    connection
        .send(frame)
        .await
        .map_err(|_| HandlerError::Internal("Connection writer closed".to_string()))
}

/// Report a domain failure to the originator only.
///
/// A message that failed to persist is still shown to its sender (status
/// `failed`) ahead of the error so the client can offer a retry.
async fn report_domain_error(connection: &Connection, error: &DomainError, nonce: Option<String>) -> HandlerResult<()> {
    tracing::debug!(
        connection_id = %connection.id(),
        code = error.code(),
        error = %error,
        "Reporting domain error"
    );

    if let Some(failed) = error.failed_message() {
        let ack = RealtimeEvent::MessageAck(Box::new(failed.clone()));
        reply(connection, &ack, nonce.clone()).await?;
    }
    reply(connection, &error_event(error), nonce).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::create_gateway_state;
    use chat_common::{
        AppConfig, AppSettings, Environment, JwtConfig, RateLimitConfig, RealtimeConfig, RoomsConfig, ServerConfig,
        SnowflakeConfig,
    };
    use chat_core::Snowflake;
    use chat_realtime::{ConnectionId, EventReceiver};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn test_config() -> AppConfig {
        AppConfig {
            app: AppSettings {
                name: "chat-gateway-test".to_string(),
                env: Environment::Development,
            },
            gateway: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            jwt: JwtConfig {
                secret: "test-secret".to_string(),
                access_token_expiry: 3600,
            },
            realtime: RealtimeConfig::default(),
            rate_limit: RateLimitConfig::default(),
            rooms: RoomsConfig::default(),
            snowflake: SnowflakeConfig { worker_id: 1 },
        }
    }

    struct TestClient {
        connection: Arc<Connection>,
        replies: mpsc::Receiver<GatewayMessage>,
        _events: EventReceiver,
    }

    impl TestClient {
        fn new() -> Self {
            let (tx, replies) = mpsc::channel(16);
            let (events_tx, events) = mpsc::channel(16);
            Self {
                connection: Connection::new(ConnectionId::generate(), tx, events_tx),
                replies,
                _events: events,
            }
        }

        async fn send(&self, state: &GatewayState, op: u8, d: Value, nonce: &str) -> HandlerResult<Option<CloseCode>> {
            let frame = GatewayMessage::from_json(&json!({ "op": op, "d": d, "nonce": nonce }).to_string()).unwrap();
            MessageDispatcher::dispatch(state, &self.connection, frame).await
        }

        async fn next_reply(&mut self) -> GatewayMessage {
            self.replies.recv().await.unwrap()
        }
    }

    async fn authenticated(state: &GatewayState, user: i64) -> TestClient {
        let mut client = TestClient::new();
        let token = state.jwt().issue_access_token(Snowflake::new(user)).unwrap();
        let outcome = client.send(state, 2, json!({ "token": token }), "auth").await.unwrap();
        assert!(outcome.is_none());

        let ready = client.next_reply().await;
        assert_eq!(ready.t.as_deref(), Some("ready"));
        client
    }

    async fn general_room(state: &GatewayState) -> Snowflake {
        state.hub().membership().ensure_room("general", 100).await.unwrap().id
    }

    #[tokio::test]
    async fn test_ops_before_authenticate_close() {
        let state = create_gateway_state(test_config()).await.unwrap();
        let client = TestClient::new();

        let err = client.send(&state, 4, json!({ "room_id": "1" }), "n").await.unwrap_err();
        assert_eq!(err.to_close_code(), Some(CloseCode::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_authenticate_sends_ready_with_nonce() {
        let state = create_gateway_state(test_config()).await.unwrap();
        let mut client = TestClient::new();
        let token = state.jwt().issue_access_token(Snowflake::new(7)).unwrap();

        let outcome = client
            .send(&state, 2, json!({ "token": format!("Bearer {token}") }), "hello-1")
            .await
            .unwrap();
        assert!(outcome.is_none());

        let ready = client.next_reply().await;
        assert_eq!(ready.t.as_deref(), Some("ready"));
        assert_eq!(ready.nonce.as_deref(), Some("hello-1"));
        assert_eq!(ready.d.unwrap()["user_id"], "7");
        assert!(state.directory().get(Snowflake::new(7)).is_some());

        let again = client.send(&state, 2, json!({ "token": token }), "hello-2").await.unwrap_err();
        assert_eq!(again.to_close_code(), Some(CloseCode::AlreadyAuthenticated));
    }

    #[tokio::test]
    async fn test_bad_token_fails_authentication() {
        let state = create_gateway_state(test_config()).await.unwrap();
        let client = TestClient::new();

        let err = client.send(&state, 2, json!({ "token": "garbage" }), "n").await.unwrap_err();
        assert_eq!(err.to_close_code(), Some(CloseCode::AuthenticationFailed));
        assert!(!client.connection.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_join_and_send_acknowledge_origin() {
        let state = create_gateway_state(test_config()).await.unwrap();
        let room_id = general_room(&state).await;
        let mut client = authenticated(&state, 1).await;

        client.send(&state, 4, json!({ "room_id": room_id }), "join").await.unwrap();
        let joined = client.next_reply().await;
        assert_eq!(joined.t.as_deref(), Some("joinedRoom"));
        assert_eq!(joined.nonce.as_deref(), Some("join"));

        client
            .send(&state, 6, json!({ "room_id": room_id, "content": "hello" }), "m1")
            .await
            .unwrap();
        let ack = client.next_reply().await;
        assert_eq!(ack.t.as_deref(), Some("messageAck"));
        assert_eq!(ack.nonce.as_deref(), Some("m1"));
        let body = ack.d.unwrap();
        assert_eq!(body["content"], "hello");
        assert_eq!(body["sequence"], 1);
    }

    #[tokio::test]
    async fn test_domain_error_keeps_socket_open() {
        let state = create_gateway_state(test_config()).await.unwrap();
        let room_id = general_room(&state).await;
        let mut client = authenticated(&state, 1).await;

        let outcome = client
            .send(&state, 6, json!({ "room_id": room_id, "content": "not a member yet" }), "m1")
            .await
            .unwrap();
        assert!(outcome.is_none());

        let error = client.next_reply().await;
        assert_eq!(error.t.as_deref(), Some("error"));
        assert_eq!(error.nonce.as_deref(), Some("m1"));
        assert_eq!(error.d.unwrap()["code"], "NOT_ROOM_MEMBER");
    }

    #[tokio::test]
    async fn test_validation_error_is_reported() {
        let state = create_gateway_state(test_config()).await.unwrap();
        let room_id = general_room(&state).await;
        let mut client = authenticated(&state, 1).await;

        let outcome = client
            .send(&state, 12, json!({ "room_id": room_id, "limit": 500 }), "h")
            .await
            .unwrap();
        assert!(outcome.is_none());

        let error = client.next_reply().await;
        assert_eq!(error.d.unwrap()["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_malformed_payload_closes() {
        let state = create_gateway_state(test_config()).await.unwrap();
        let client = authenticated(&state, 1).await;

        let err = client.send(&state, 4, json!({ "nope": true }), "n").await.unwrap_err();
        assert_eq!(err.to_close_code(), Some(CloseCode::DecodeError));
    }

    #[tokio::test]
    async fn test_server_op_from_client_is_rejected() {
        let state = create_gateway_state(test_config()).await.unwrap();
        let client = TestClient::new();

        let outcome = client.send(&state, 10, json!(null), "n").await.unwrap();
        assert_eq!(outcome, Some(CloseCode::UnknownOpcode));
    }
}
