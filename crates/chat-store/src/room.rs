//! In-memory implementation of RoomStore

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::instrument;

use chat_core::{RepoResult, Room, RoomStore, Snowflake};

use crate::error::{duplicate, room_not_found};

/// In-memory room collection
#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    rooms: DashMap<Snowflake, Room>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    #[instrument(level = "trace", skip(self, room), fields(room_id = %room.id))]
    async fn create(&self, room: &Room) -> RepoResult<()> {
        if self.rooms.contains_key(&room.id) {
            return Err(duplicate("room", room.id));
        }
        self.rooms.insert(room.id, room.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Snowflake) -> RepoResult<Option<Room>> {
        Ok(self.rooms.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_name(&self, name: &str) -> RepoResult<Option<Room>> {
        Ok(self
            .rooms
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .map(|r| r.value().clone()))
    }

    #[instrument(level = "trace", skip(self, room), fields(room_id = %room.id))]
    async fn update(&self, room: &Room) -> RepoResult<()> {
        match self.rooms.get_mut(&room.id) {
            Some(mut stored) => {
                *stored = room.clone();
                Ok(())
            }
            None => Err(room_not_found(room.id)),
        }
    }

    async fn find_by_member(&self, user_id: Snowflake) -> RepoResult<Vec<Room>> {
        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|r| r.has_member(user_id))
            .map(|r| r.value().clone())
            .collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }
}
