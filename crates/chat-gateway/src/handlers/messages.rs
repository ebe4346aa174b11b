//! Send Message (op 6) and Message Action (op 9) handlers

use super::{reply, reply_with, HandlerResult};
use crate::connection::Connection;
use crate::protocol::{CloseCode, MessageAction, ReceiptAck, SendMessagePayload};
use crate::server::GatewayState;
use chat_core::RealtimeEvent;
use chat_realtime::ReactionOp;
use std::sync::Arc;

/// Handles message traffic
pub struct MessageHandler;

impl MessageHandler {
    /// Accept a message; the sender's connection gets `messageAck`, the rest of the room `receiveMessage`
    pub async fn send(
        state: &GatewayState,
        connection: &Arc<Connection>,
        payload: SendMessagePayload,
        nonce: Option<String>,
    ) -> HandlerResult<Option<CloseCode>> {
        let (room_id, content, options) = payload.into_parts();
        let message = state
            .hub()
            .send_message(connection.id(), room_id, content, options)
            .await?;

        tracing::info!(
            connection_id = %connection.id(),
            room_id = %room_id,
            message_id = %message.id,
            sequence = message.sequence,
            "Message accepted"
        );

        reply(connection, &RealtimeEvent::MessageAck(Box::new(message)), nonce).await?;
        Ok(None)
    }

    pub async fn action(
        state: &GatewayState,
        connection: &Arc<Connection>,
        action: MessageAction,
        nonce: Option<String>,
    ) -> HandlerResult<Option<CloseCode>> {
        let hub = state.hub();
        let id = connection.id();

        tracing::debug!(
            connection_id = %id,
            action = action.name(),
            message_id = %action.message_id(),
            "Message action"
        );

        let event = match action {
            MessageAction::Edit { message_id, content } => {
                RealtimeEvent::MessageUpdated(Box::new(hub.edit_message(id, message_id, content).await?))
            }
            MessageAction::Delete { message_id } => {
                RealtimeEvent::MessageDeleted(hub.delete_message(id, message_id).await?)
            }
            MessageAction::Restore { message_id } => {
                RealtimeEvent::MessageUpdated(Box::new(hub.restore_message(id, message_id).await?))
            }
            MessageAction::Purge { message_id } => {
                RealtimeEvent::MessageDeleted(hub.purge_message(id, message_id).await?)
            }
            MessageAction::React { message_id, emoji } => {
                RealtimeEvent::ReactionUpdated(hub.react(id, message_id, &emoji, ReactionOp::Add).await?)
            }
            MessageAction::Unreact { message_id, emoji } => {
                RealtimeEvent::ReactionUpdated(hub.react(id, message_id, &emoji, ReactionOp::Remove).await?)
            }
            MessageAction::Read { message_id } => {
                let recorded = hub.mark_read(id, message_id).await?;
                return Self::receipt(connection, message_id, "read", recorded, nonce).await;
            }
            MessageAction::Delivered { message_id } => {
                let recorded = hub.mark_delivered(id, message_id).await?;
                return Self::receipt(connection, message_id, "delivered", recorded, nonce).await;
            }
        };

        reply(connection, &event, nonce).await?;
        Ok(None)
    }

    async fn receipt(
        connection: &Connection,
        message_id: chat_core::Snowflake,
        action: &str,
        recorded: bool,
        nonce: Option<String>,
    ) -> HandlerResult<Option<CloseCode>> {
        let ack = ReceiptAck {
            message_id,
            action: action.to_string(),
            recorded,
        };
        reply_with(connection, "receiptAck", &ack, nonce).await?;
        Ok(None)
    }
}
