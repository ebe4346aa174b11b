//! Request History handler (op 12)

use super::{reply, HandlerResult};
use crate::connection::Connection;
use crate::protocol::{CloseCode, RequestHistoryPayload};
use crate::server::GatewayState;
use chat_core::RealtimeEvent;
use std::sync::Arc;

pub struct HistoryHandler;

impl HistoryHandler {
    /// Answer with the most recent page of a room the user belongs to
    pub async fn handle(
        state: &GatewayState,
        connection: &Arc<Connection>,
        payload: RequestHistoryPayload,
        nonce: Option<String>,
    ) -> HandlerResult<Option<CloseCode>> {
        let history = state
            .hub()
            .history(connection.id(), payload.room_id, payload.limit(), payload.include_deleted)
            .await?;

        tracing::debug!(
            connection_id = %connection.id(),
            room_id = %payload.room_id,
            messages = history.messages.len(),
            "History served"
        );

        reply(connection, &RealtimeEvent::History(history), nonce).await?;
        Ok(None)
    }
}
