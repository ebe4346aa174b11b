//! Gateway operation codes

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Gateway operation codes
///
/// Op codes define the type of message being sent or received over the WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Server dispatches an event to the client (server only)
    Dispatch = 0,
    /// Heartbeat - keep connection alive (client only)
    Heartbeat = 1,
    /// Authenticate - present an access token (client only)
    Authenticate = 2,
    /// Update Presence - change status / custom message (client only)
    UpdatePresence = 3,
    JoinRoom = 4,
    LeaveRoom = 5,
    SendMessage = 6,
    StartTyping = 7,
    StopTyping = 8,
    /// Edit / delete / restore / purge / react / unreact / read / delivered
    MessageAction = 9,
    /// Hello - sent on connect (server only)
    Hello = 10,
    /// Heartbeat ACK - heartbeat acknowledged (server only)
    HeartbeatAck = 11,
    /// Request recent room history (client only)
    RequestHistory = 12,
}

impl OpCode {
    /// Create an `OpCode` from a raw integer value
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Authenticate),
            3 => Some(Self::UpdatePresence),
            4 => Some(Self::JoinRoom),
            5 => Some(Self::LeaveRoom),
            6 => Some(Self::SendMessage),
            7 => Some(Self::StartTyping),
            8 => Some(Self::StopTyping),
            9 => Some(Self::MessageAction),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            12 => Some(Self::RequestHistory),
            _ => None,
        }
    }

    /// Get the raw integer value
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this op code can be sent by the client
    #[must_use]
    pub const fn is_client_op(self) -> bool {
        !self.is_server_op()
    }

    /// Check if this op code can be sent by the server
    #[must_use]
    pub const fn is_server_op(self) -> bool {
        matches!(self, Self::Dispatch | Self::Hello | Self::HeartbeatAck)
    }

    /// Ops accepted before the connection has authenticated
    #[must_use]
    pub const fn allowed_before_auth(self) -> bool {
        matches!(self, Self::Heartbeat | Self::Authenticate)
    }

    /// Get the name of this op code
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dispatch => "Dispatch",
            Self::Heartbeat => "Heartbeat",
            Self::Authenticate => "Authenticate",
            Self::UpdatePresence => "UpdatePresence",
            Self::JoinRoom => "JoinRoom",
            Self::LeaveRoom => "LeaveRoom",
            Self::SendMessage => "SendMessage",
            Self::StartTyping => "StartTyping",
            Self::StopTyping => "StopTyping",
            Self::MessageAction => "MessageAction",
            Self::Hello => "Hello",
            Self::HeartbeatAck => "HeartbeatAck",
            Self::RequestHistory => "RequestHistory",
        }
    }
}

impl Serialize for OpCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for OpCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Self::from_u8(value).ok_or_else(|| serde::de::Error::custom(format!("invalid op code: {value}")))
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u8())
    }
}
