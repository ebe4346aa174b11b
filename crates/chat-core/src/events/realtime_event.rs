//! Realtime events - pushed to live connections
//!
//! Events are adjacently tagged so the transport can lift the name and the
//! payload straight into a dispatch frame (`t` / `d`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{Message, PresenceState, ReactionState};
use crate::value_objects::Snowflake;

/// All events emitted by the realtime core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "camelCase")]
pub enum RealtimeEvent {
    // =========================================================================
    // Message Events
    // =========================================================================
    ReceiveMessage(Box<Message>),
    /// Synchronous acknowledgement to the sender's originating connection
    MessageAck(Box<Message>),
    MessageUpdated(Box<Message>),
    MessageDeleted(MessageDeletedEvent),
    ReactionUpdated(ReactionState),
    MessageRead(MessageReadEvent),
    History(HistoryEvent),

    // =========================================================================
    // Presence Events
    // =========================================================================
    UserTyping(UserTypingEvent),
    PresenceChanged(PresenceState),

    // =========================================================================
    // Room Events
    // =========================================================================
    JoinedRoom(JoinedRoomEvent),
    LeftRoom(LeftRoomEvent),

    Error(ErrorEvent),
}

impl RealtimeEvent {
    /// Get the event name as sent in dispatch frames
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => "receiveMessage",
            Self::MessageAck(_) => "messageAck",
            Self::MessageUpdated(_) => "messageUpdated",
            Self::MessageDeleted(_) => "messageDeleted",
            Self::ReactionUpdated(_) => "reactionUpdated",
            Self::MessageRead(_) => "messageRead",
            Self::History(_) => "history",
            Self::UserTyping(_) => "userTyping",
            Self::PresenceChanged(_) => "presenceChanged",
            Self::JoinedRoom(_) => "joinedRoom",
            Self::LeftRoom(_) => "leftRoom",
            Self::Error(_) => "error",
        }
    }

    /// Serialize the payload alone
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("d")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }

    /// Get the room ID this event is scoped to (if any)
    pub fn room_id(&self) -> Option<Snowflake> {
        match self {
            Self::ReceiveMessage(m) | Self::MessageAck(m) | Self::MessageUpdated(m) => {
                Some(m.room_id)
            }
            Self::MessageDeleted(e) => Some(e.room_id),
            Self::ReactionUpdated(e) => Some(e.room_id),
            Self::MessageRead(e) => Some(e.room_id),
            Self::History(e) => Some(e.room_id),
            Self::UserTyping(e) => Some(e.room_id),
            Self::JoinedRoom(e) => Some(e.room_id),
            Self::LeftRoom(e) => Some(e.room_id),
            Self::PresenceChanged(_) | Self::Error(_) => None,
        }
    }

    pub fn error(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Error(ErrorEvent {
            message: message.into(),
            code: code.into(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeletedEvent {
    pub message_id: Snowflake,
    pub room_id: Snowflake,
    /// `false` for a soft delete that can still be restored
    pub purged: bool,
}

/// Personal read receipt pushed to the author
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReadEvent {
    pub message_id: Snowflake,
    pub room_id: Snowflake,
    pub user_id: Snowflake,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub room_id: Snowflake,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTypingEvent {
    pub room_id: Snowflake,
    pub user_id: Snowflake,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedRoomEvent {
    pub room_id: Snowflake,
    pub name: String,
    pub user_id: Snowflake,
    /// Presence of room members that are currently online
    pub online: Vec<PresenceState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeftRoomEvent {
    pub room_id: Snowflake,
    pub user_id: Snowflake,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    pub code: String,
}
