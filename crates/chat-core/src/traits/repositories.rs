//! Storage traits (ports) - the minimal capabilities each core component needs
//!
//! Each consumer gets a narrow trait so the core stays testable with simple
//! in-memory fakes. The infrastructure layer provides the implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{Message, Room, UserStatus};
use crate::error::DomainError;
use crate::value_objects::Snowflake;

/// Result type for repository operations
pub type RepoResult<T> = Result<T, DomainError>;

// ============================================================================
// Message Store
// ============================================================================

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message
    async fn create(&self, message: &Message) -> RepoResult<()>;

    /// Find message by ID, including soft-deleted messages
    async fn find_by_id(&self, id: Snowflake) -> RepoResult<Option<Message>>;

    /// Replace an existing message
    async fn update(&self, message: &Message) -> RepoResult<()>;

    /// Most recent messages of a room in ascending sequence order
    async fn find_recent(
        &self,
        room_id: Snowflake,
        limit: usize,
        include_deleted: bool,
    ) -> RepoResult<Vec<Message>>;

    /// Highest sequence persisted for the room (0 when empty)
    async fn last_sequence(&self, room_id: Snowflake) -> RepoResult<u64>;

    /// Hard delete; returns whether the message existed
    async fn delete(&self, id: Snowflake) -> RepoResult<bool>;
}

// ============================================================================
// Room Store
// ============================================================================

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Create a new room
    async fn create(&self, room: &Room) -> RepoResult<()>;

    /// Find room by ID
    async fn find_by_id(&self, id: Snowflake) -> RepoResult<Option<Room>>;

    async fn find_by_name(&self, name: &str) -> RepoResult<Option<Room>>;

    /// Replace an existing room
    async fn update(&self, room: &Room) -> RepoResult<()>;

    /// Rooms whose `active_users` contain the user
    async fn find_by_member(&self, user_id: Snowflake) -> RepoResult<Vec<Room>>;
}

// ============================================================================
// User Directory
// ============================================================================

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, user_id: Snowflake) -> RepoResult<bool>;

    /// Persist the latest status and last-seen time for a user
    async fn record_last_seen(
        &self,
        user_id: Snowflake,
        status: UserStatus,
        last_seen: DateTime<Utc>,
    ) -> RepoResult<()>;

    async fn last_seen(&self, user_id: Snowflake) -> RepoResult<Option<DateTime<Utc>>>;
}
