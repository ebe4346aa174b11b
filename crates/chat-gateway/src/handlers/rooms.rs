//! Join Room (op 4) and Leave Room (op 5) handlers

use super::{reply, HandlerResult};
use crate::connection::Connection;
use crate::protocol::{CloseCode, RoomPayload};
use crate::server::GatewayState;
use chat_core::RealtimeEvent;
use std::sync::Arc;

/// Handles room membership messages
pub struct RoomHandler;

impl RoomHandler {
    pub async fn join(
        state: &GatewayState,
        connection: &Arc<Connection>,
        payload: RoomPayload,
        nonce: Option<String>,
    ) -> HandlerResult<Option<CloseCode>> {
        let joined = state.hub().join_room(connection.id(), payload.room_id).await?;

        tracing::debug!(
            connection_id = %connection.id(),
            room_id = %payload.room_id,
            online = joined.online.len(),
            "Joined room"
        );

        reply(connection, &RealtimeEvent::JoinedRoom(joined), nonce).await?;
        Ok(None)
    }

    pub async fn leave(
        state: &GatewayState,
        connection: &Arc<Connection>,
        payload: RoomPayload,
        nonce: Option<String>,
    ) -> HandlerResult<Option<CloseCode>> {
        let left = state.hub().leave_room(connection.id(), payload.room_id).await?;

        tracing::debug!(
            connection_id = %connection.id(),
            room_id = %payload.room_id,
            "Left room"
        );

        reply(connection, &RealtimeEvent::LeftRoom(left), nonce).await?;
        Ok(None)
    }
}
