//! Update Presence handler (op 3)

use super::{reply, HandlerResult};
use crate::connection::Connection;
use crate::protocol::{CloseCode, UpdatePresencePayload};
use crate::server::GatewayState;
use chat_core::RealtimeEvent;
use std::sync::Arc;

/// Handles Update Presence messages
pub struct PresenceHandler;

impl PresenceHandler {
    /// Change status / custom message; rooms hear about it through the hub
    pub async fn handle(
        state: &GatewayState,
        connection: &Arc<Connection>,
        payload: UpdatePresencePayload,
        nonce: Option<String>,
    ) -> HandlerResult<Option<CloseCode>> {
        let presence = state
            .hub()
            .update_presence(connection.id(), payload.status, payload.custom_message)
            .await?;

        tracing::debug!(
            connection_id = %connection.id(),
            user_id = %presence.user_id,
            status = ?presence.status,
            "Presence updated"
        );

        reply(connection, &RealtimeEvent::PresenceChanged(presence), nonce).await?;
        Ok(None)
    }
}
