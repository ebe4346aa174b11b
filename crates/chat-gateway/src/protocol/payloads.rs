//! Payload definitions for client and server frames

use serde::{Deserialize, Serialize};
use validator::Validate;

use chat_core::{MessagePriority, MessageType, Snowflake, UserStatus};
use chat_realtime::SubmitOptions;

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

/// `ready` dispatch sent after a successful Authenticate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub connection_id: String,
    pub user_id: Snowflake,
    /// Rooms the user belongs to
    pub rooms: Vec<Snowflake>,
}

/// Payload for op 2 (Authenticate)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuthenticatePayload {
    /// Access token, with or without a `Bearer ` prefix
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

impl AuthenticatePayload {
    pub fn bare_token(&self) -> &str {
        self.token.strip_prefix("Bearer ").unwrap_or(&self.token)
    }
}

/// Payload for op 3 (Update Presence)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdatePresencePayload {
    pub status: UserStatus,

    #[validate(length(max = 128, message = "Custom message must be at most 128 characters"))]
    #[serde(default)]
    pub custom_message: Option<String>,
}

/// Payload for ops 4, 5, 7 and 8 (JoinRoom, LeaveRoom, StartTyping, StopTyping)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPayload {
    pub room_id: Snowflake,
}

/// Payload for op 6 (Send Message)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendMessagePayload {
    pub room_id: Snowflake,

    pub content: String,

    #[serde(rename = "type", default)]
    pub message_type: MessageType,

    #[serde(default)]
    pub priority: MessagePriority,

    #[serde(default)]
    pub thread_id: Option<Snowflake>,

    #[serde(default)]
    pub reply_to_id: Option<Snowflake>,

    #[validate(length(max = 50, message = "At most 50 mentions per message"))]
    #[serde(default)]
    pub mentions: Vec<Snowflake>,

    #[serde(default)]
    pub silent: bool,
}

impl SendMessagePayload {
    /// Split into the room, the content and the pipeline options
    pub fn into_parts(self) -> (Snowflake, String, SubmitOptions) {
        let options = SubmitOptions {
            message_type: self.message_type,
            priority: self.priority,
            thread_id: self.thread_id,
            reply_to_id: self.reply_to_id,
            mentions: self.mentions,
            silent: self.silent,
        };
        (self.room_id, self.content, options)
    }
}

/// Payload for op 9 (Message Action)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum MessageAction {
    Edit { message_id: Snowflake, content: String },
    Delete { message_id: Snowflake },
    Restore { message_id: Snowflake },
    Purge { message_id: Snowflake },
    React { message_id: Snowflake, emoji: String },
    Unreact { message_id: Snowflake, emoji: String },
    Read { message_id: Snowflake },
    Delivered { message_id: Snowflake },
}

impl MessageAction {
    pub fn message_id(&self) -> Snowflake {
        match self {
            Self::Edit { message_id, .. }
            | Self::Delete { message_id }
            | Self::Restore { message_id }
            | Self::Purge { message_id }
            | Self::React { message_id, .. }
            | Self::Unreact { message_id, .. }
            | Self::Read { message_id }
            | Self::Delivered { message_id } => *message_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Edit { .. } => "edit",
            Self::Delete { .. } => "delete",
            Self::Restore { .. } => "restore",
            Self::Purge { .. } => "purge",
            Self::React { .. } => "react",
            Self::Unreact { .. } => "unreact",
            Self::Read { .. } => "read",
            Self::Delivered { .. } => "delivered",
        }
    }
}

/// Acknowledgement for receipt actions (read / delivered)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptAck {
    pub message_id: Snowflake,
    pub action: String,
    /// False when the receipt had already been recorded
    pub recorded: bool,
}

/// Payload for op 12 (Request History)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RequestHistoryPayload {
    pub room_id: Snowflake,

    #[validate(range(min = 1, max = 100, message = "Limit must be 1-100"))]
    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub include_deleted: bool,
}

impl RequestHistoryPayload {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}
