//! Domain errors - error types for the realtime core

use thiserror::Error;

use crate::entities::Message;
use crate::value_objects::Snowflake;

/// Error classes reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    RateLimited,
    Capacity,
    DeliveryFailed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Capacity => "capacity",
            Self::DeliveryFailed => "delivery_failed",
            Self::Internal => "internal",
        }
    }
}

/// Domain layer errors
#[derive(Debug, Error)]
pub enum DomainError {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("Content too long: max {max} characters")]
    ContentTooLong { max: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    // =========================================================================
    // Authorization Errors
    // =========================================================================
    #[error("Not a member of room {0}")]
    NotRoomMember(Snowflake),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Edit window of {window_secs}s has expired")]
    EditWindowExpired { window_secs: u64 },

    // =========================================================================
    // Not Found Errors
    // =========================================================================
    #[error("Room not found: {0}")]
    RoomNotFound(Snowflake),

    #[error("Message not found: {0}")]
    MessageNotFound(Snowflake),

    #[error("User not found: {0}")]
    UserNotFound(Snowflake),

    #[error("Connection not registered: {0}")]
    ConnectionNotRegistered(String),

    // =========================================================================
    // Throttling / Capacity
    // =========================================================================
    #[error("Rate limit exceeded for {action}, retry after {retry_after_ms}ms")]
    RateLimitExceeded {
        action: &'static str,
        retry_after_ms: u64,
    },

    #[error("Room {room_id} is full ({max_users} users)")]
    RoomFull { room_id: Snowflake, max_users: usize },

    // =========================================================================
    // Delivery / Infrastructure
    // =========================================================================
    /// Persistence failed after retry; carries the message with `status = failed`
    #[error("Delivery failed: {reason}")]
    DeliveryFailed {
        message: Box<Message>,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Get an error code string for client error events
    pub fn code(&self) -> &'static str {
        match self {
            // Validation
            Self::InvalidContent(_) => "INVALID_CONTENT",
            Self::ContentTooLong { .. } => "CONTENT_TOO_LONG",
            Self::Validation(_) => "VALIDATION_ERROR",

            // Authorization
            Self::NotRoomMember(_) => "NOT_ROOM_MEMBER",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::EditWindowExpired { .. } => "EDIT_WINDOW_EXPIRED",

            // Not Found
            Self::RoomNotFound(_) => "UNKNOWN_ROOM",
            Self::MessageNotFound(_) => "UNKNOWN_MESSAGE",
            Self::UserNotFound(_) => "UNKNOWN_USER",
            Self::ConnectionNotRegistered(_) => "NOT_REGISTERED",

            Self::RateLimitExceeded { .. } => "RATE_LIMITED",
            Self::RoomFull { .. } => "ROOM_FULL",

            Self::DeliveryFailed { .. } => "DELIVERY_FAILED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidContent(_) | Self::ContentTooLong { .. } | Self::Validation(_) => {
                ErrorKind::Validation
            }
            Self::NotRoomMember(_) | Self::Forbidden(_) | Self::EditWindowExpired { .. } => {
                ErrorKind::Authorization
            }
            Self::RoomNotFound(_)
            | Self::MessageNotFound(_)
            | Self::UserNotFound(_)
            | Self::ConnectionNotRegistered(_) => ErrorKind::NotFound,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimited,
            Self::RoomFull { .. } => ErrorKind::Capacity,
            Self::DeliveryFailed { .. } => ErrorKind::DeliveryFailed,
            Self::Storage(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// Check if this is an authorization error
    pub fn is_authorization(&self) -> bool {
        self.kind() == ErrorKind::Authorization
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind() == ErrorKind::RateLimited
    }

    pub fn is_capacity(&self) -> bool {
        self.kind() == ErrorKind::Capacity
    }

    /// The failed message carried by `DeliveryFailed`
    pub fn failed_message(&self) -> Option<&Message> {
        match self {
            Self::DeliveryFailed { message, .. } => Some(message.as_ref()),
            _ => None,
        }
    }
}
