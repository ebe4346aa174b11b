//! Room membership manager
//!
//! Owns persisted membership (`Room::active_users`). Every read-modify-write of
//! a room runs under that room's lock so capacity checks cannot race.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::instrument;

use chat_core::{DomainError, Room, RoomStore, Snowflake, SnowflakeGenerator};

pub struct RoomMembership {
    rooms: Arc<dyn RoomStore>,
    ids: Arc<SnowflakeGenerator>,
    locks: DashMap<Snowflake, Arc<Mutex<()>>>,
}

impl RoomMembership {
    pub fn new(rooms: Arc<dyn RoomStore>, ids: Arc<SnowflakeGenerator>) -> Self {
        Self {
            rooms,
            ids,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, room_id: Snowflake) -> Arc<Mutex<()>> {
        self.locks.entry(room_id).or_default().clone()
    }

    /// Load a room or fail with `RoomNotFound`
    pub async fn room(&self, room_id: Snowflake) -> Result<Room, DomainError> {
        self.rooms
            .find_by_id(room_id)
            .await?
            .ok_or(DomainError::RoomNotFound(room_id))
    }

    /// Admit `user_id` to the room; already being a member is a success
    #[instrument(skip(self))]
    pub async fn add_user(&self, room_id: Snowflake, user_id: Snowflake) -> Result<bool, DomainError> {
        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;

        let mut room = self.room(room_id).await?;
        if room.admit(user_id)? {
            self.rooms.update(&room).await?;
            tracing::debug!(
                room_id = %room_id,
                user_id = %user_id,
                members = room.active_users.len(),
                "User added to room"
            );
        }
        Ok(true)
    }

    /// Remove `user_id` from the room; returns whether they were a member
    #[instrument(skip(self))]
    pub async fn remove_user(&self, room_id: Snowflake, user_id: Snowflake) -> Result<bool, DomainError> {
        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;

        let mut room = self.room(room_id).await?;
        let removed = room.remove_member(user_id);
        if removed {
            self.rooms.update(&room).await?;
            tracing::debug!(room_id = %room_id, user_id = %user_id, "User removed from room");
        }
        Ok(removed)
    }

    pub async fn is_member(&self, room_id: Snowflake, user_id: Snowflake) -> Result<bool, DomainError> {
        Ok(self.room(room_id).await?.has_member(user_id))
    }

    /// Rooms the user belongs to, whether or not they are connected
    pub async fn user_rooms(&self, user_id: Snowflake) -> Result<Vec<Snowflake>, DomainError> {
        Ok(self
            .rooms
            .find_by_member(user_id)
            .await?
            .into_iter()
            .map(|room| room.id)
            .collect())
    }

    /// Create a room
    pub async fn create_room(
        &self,
        name: &str,
        max_users: usize,
        created_by: Option<Snowflake>,
        is_private: bool,
    ) -> Result<Room, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::Validation("room name is required".to_string()));
        }
        if max_users == 0 {
            return Err(DomainError::Validation("max_users must be positive".to_string()));
        }

        let mut room = Room::new(self.ids.generate(), name.to_string(), max_users);
        room.created_by = created_by;
        room.is_private = is_private;
        self.rooms.create(&room).await?;

        tracing::info!(room_id = %room.id, name = %room.name, max_users, "Room created");
        Ok(room)
    }

    /// Find a room by name, creating it when missing
    pub async fn ensure_room(&self, name: &str, max_users: usize) -> Result<Room, DomainError> {
        match self.rooms.find_by_name(name).await? {
            Some(room) => Ok(room),
            None => self.create_room(name, max_users, None, false).await,
        }
    }
}
