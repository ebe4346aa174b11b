//! Error helpers shared by the stores

use chat_core::{DomainError, Snowflake};

/// Create a "message not found" error
pub fn message_not_found(id: Snowflake) -> DomainError {
    DomainError::MessageNotFound(id)
}

/// Create a "room not found" error
pub fn room_not_found(id: Snowflake) -> DomainError {
    DomainError::RoomNotFound(id)
}

/// Create a "user not found" error
pub fn user_not_found(id: Snowflake) -> DomainError {
    DomainError::UserNotFound(id)
}

/// A document with this id is already stored
pub fn duplicate(kind: &str, id: Snowflake) -> DomainError {
    DomainError::Storage(format!("{kind} {id} already exists"))
}
