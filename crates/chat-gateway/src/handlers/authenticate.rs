//! Authenticate handler (op 2)

use super::{reply_with, HandlerError, HandlerResult};
use crate::connection::Connection;
use crate::protocol::{AuthenticatePayload, CloseCode, ReadyPayload};
use crate::server::GatewayState;
use std::sync::Arc;
use validator::Validate;

/// Handles Authenticate messages
pub struct AuthenticateHandler;

impl AuthenticateHandler {
    /// Verify the token, register the connection with the hub and send `ready`
    pub async fn handle(
        state: &GatewayState,
        connection: &Arc<Connection>,
        payload: AuthenticatePayload,
        nonce: Option<String>,
    ) -> HandlerResult<Option<CloseCode>> {
        if connection.is_authenticated().await {
            tracing::warn!(
                connection_id = %connection.id(),
                "Client sent Authenticate while already authenticated"
            );
            return Err(HandlerError::AlreadyAuthenticated);
        }

        payload
            .validate()
            .map_err(|e| HandlerError::AuthenticationFailed(e.to_string()))?;

        let user_id = state.jwt().verify(payload.bare_token()).map_err(|e| {
            tracing::debug!(error = %e, "Token validation failed");
            HandlerError::AuthenticationFailed(e.to_string())
        })?;

        if !connection.authenticate(user_id).await {
            return Err(HandlerError::AlreadyAuthenticated);
        }

        if state.directory().insert(user_id, format!("user-{user_id}")) {
            tracing::debug!(user_id = %user_id, "User added to directory");
        }

        let hub = state.hub();
        hub.connect_with_id(user_id, connection.id().clone(), connection.event_sender())
            .await;
        let rooms = hub.membership().user_rooms(user_id).await?;

        let ready = ReadyPayload {
            connection_id: connection.id().to_string(),
            user_id,
            rooms,
        };
        reply_with(connection, "ready", &ready, nonce).await?;

        tracing::info!(
            connection_id = %connection.id(),
            user_id = %user_id,
            rooms = ready.rooms.len(),
            "Client authenticated"
        );

        Ok(None)
    }
}
