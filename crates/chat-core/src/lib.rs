//! # chat-core
//!
//! Domain layer for the realtime room messaging core: messages, rooms, presence,
//! the outbound event vocabulary, the error taxonomy and the narrow storage traits
//! each core component depends on.
//! This crate has zero dependencies on infrastructure (transport, storage engine, etc.).

pub mod entities;
pub mod error;
pub mod events;
pub mod traits;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{
    DeliveryReceipt, EditRecord, Message, MessageLifecycle, MessagePriority, MessageStatus,
    MessageType, PresenceState, Reaction, ReactionState, ReactionSummary, ReadReceipt, Room,
    UserStatus,
};
pub use error::{DomainError, ErrorKind};
pub use events::RealtimeEvent;
pub use traits::{MessageStore, RepoResult, RoomStore, UserDirectory};
pub use value_objects::{MessageFlags, Snowflake, SnowflakeGenerator, SnowflakeParseError};
