//! WebSocket close codes

use serde::{Deserialize, Serialize};

/// Reasons the gateway ends a socket.
///
/// Only protocol failures close the socket; domain errors are reported as
/// `error` dispatches and the connection stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    UnknownError = 4000,
    /// Client sent a server-only or unrecognized op
    UnknownOpcode = 4001,
    /// Frame was not valid JSON or did not match the op's payload
    DecodeError = 4002,
    /// Room or message op before Authenticate
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    /// No heartbeat within the timeout
    SessionTimeout = 4009,
}

impl CloseCode {
    const ALL: [Self; 7] = [
        Self::UnknownError,
        Self::UnknownOpcode,
        Self::DecodeError,
        Self::NotAuthenticated,
        Self::AuthenticationFailed,
        Self::AlreadyAuthenticated,
        Self::SessionTimeout,
    ];

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Human-readable reason carried in the close frame
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid opcode sent",
            Self::DecodeError => "Invalid payload encoding",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::SessionTimeout => "Session timeout",
        }
    }

    /// The client must obtain a new token before reconnecting
    #[must_use]
    pub const fn requires_new_token(self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }
}

impl TryFrom<u16> for CloseCode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_u16() == value)
            .ok_or(value)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reason(), self.as_u16())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}
