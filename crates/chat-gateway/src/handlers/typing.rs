//! Start Typing (op 7) and Stop Typing (op 8) handlers

use super::HandlerResult;
use crate::connection::Connection;
use crate::protocol::{CloseCode, RoomPayload};
use crate::server::GatewayState;
use std::sync::Arc;

/// Handles typing indicators
///
/// No direct reply: the room (minus the typist) receives `userTyping`.
pub struct TypingHandler;

impl TypingHandler {
    pub fn handle(
        state: &GatewayState,
        connection: &Arc<Connection>,
        payload: RoomPayload,
        is_typing: bool,
    ) -> HandlerResult<Option<CloseCode>> {
        let changed = state.hub().typing(connection.id(), payload.room_id, is_typing)?;

        tracing::trace!(
            connection_id = %connection.id(),
            room_id = %payload.room_id,
            is_typing,
            changed,
            "Typing indicator"
        );

        Ok(None)
    }
}
