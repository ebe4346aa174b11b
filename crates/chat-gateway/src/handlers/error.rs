//! Handler error types

use crate::protocol::CloseCode;
use chat_core::{DomainError, ErrorKind, RealtimeEvent};
use thiserror::Error;

/// Handler error type
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Invalid payload received
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Not authenticated
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Already authenticated
    #[error("Already authenticated")]
    AlreadyAuthenticated,

    /// Domain error, reported to the caller without closing the socket
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Convert to a close code; `None` keeps the socket open
    pub fn to_close_code(&self) -> Option<CloseCode> {
        match self {
            Self::InvalidPayload(_) => Some(CloseCode::DecodeError),
            Self::AuthenticationFailed(_) => Some(CloseCode::AuthenticationFailed),
            Self::NotAuthenticated => Some(CloseCode::NotAuthenticated),
            Self::AlreadyAuthenticated => Some(CloseCode::AlreadyAuthenticated),
            Self::Domain(_) => None,
            Self::Internal(_) => Some(CloseCode::UnknownError),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

impl From<validator::ValidationErrors> for HandlerError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::Domain(DomainError::Validation(e.to_string()))
    }
}

/// `error` event for a domain failure; storage and internal details stay server-side
pub fn error_event(error: &DomainError) -> RealtimeEvent {
    let message = match error.kind() {
        ErrorKind::Internal => "Internal server error".to_string(),
        _ => error.to_string(),
    };
    RealtimeEvent::error(message, error.code())
}

/// Handler result type
pub type HandlerResult<T> = Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::Snowflake;

    #[test]
    fn test_protocol_errors_close() {
        assert_eq!(
            HandlerError::InvalidPayload("bad".into()).to_close_code(),
            Some(CloseCode::DecodeError)
        );
        assert_eq!(HandlerError::NotAuthenticated.to_close_code(), Some(CloseCode::NotAuthenticated));
        assert_eq!(
            HandlerError::AlreadyAuthenticated.to_close_code(),
            Some(CloseCode::AlreadyAuthenticated)
        );
    }

    #[test]
    fn test_domain_errors_keep_socket_open() {
        let err = HandlerError::from(DomainError::NotRoomMember(Snowflake::new(1)));
        assert_eq!(err.to_close_code(), None);
    }

    #[test]
    fn test_error_event_hides_internal_details() {
        let RealtimeEvent::Error(event) = error_event(&DomainError::Storage("disk on fire".into())) else {
            panic!("expected error event");
        };
        assert_eq!(event.message, "Internal server error");

        let RealtimeEvent::Error(event) = error_event(&DomainError::RoomFull {
            room_id: Snowflake::new(3),
            max_users: 2,
        }) else {
            panic!("expected error event");
        };
        assert_eq!(event.code, "ROOM_FULL");
        assert!(event.message.contains("full"));
    }
}
