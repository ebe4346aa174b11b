//! In-memory implementation of MessageStore

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::instrument;

use chat_core::{DomainError, Message, MessageStore, RepoResult, Snowflake};

use crate::error::{duplicate, message_not_found};

/// Per-room ordering index
#[derive(Debug, Default)]
struct RoomIndex {
    /// sequence -> message id
    by_sequence: BTreeMap<u64, Snowflake>,
    /// Highest sequence ever stored; purging never lowers it
    high_water: u64,
}

/// In-memory message collection indexed by (room, sequence)
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: DashMap<Snowflake, Message>,
    rooms: RwLock<HashMap<Snowflake, RoomIndex>>,
    failing_writes: AtomicUsize,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes (`create` / `update`) fail with a storage error
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn check_write(&self) -> RepoResult<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DomainError::Storage("write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    #[instrument(level = "trace", skip(self, message), fields(message_id = %message.id))]
    async fn create(&self, message: &Message) -> RepoResult<()> {
        self.check_write()?;
        if self.messages.contains_key(&message.id) {
            return Err(duplicate("message", message.id));
        }

        let mut rooms = self.rooms.write();
        let index = rooms.entry(message.room_id).or_default();
        if index.by_sequence.contains_key(&message.sequence) {
            return Err(DomainError::Storage(format!(
                "sequence {} already used in room {}",
                message.sequence, message.room_id
            )));
        }
        index.by_sequence.insert(message.sequence, message.id);
        index.high_water = index.high_water.max(message.sequence);
        self.messages.insert(message.id, message.clone());
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    async fn find_by_id(&self, id: Snowflake) -> RepoResult<Option<Message>> {
        Ok(self.messages.get(&id).map(|m| m.value().clone()))
    }

    #[instrument(level = "trace", skip(self, message), fields(message_id = %message.id))]
    async fn update(&self, message: &Message) -> RepoResult<()> {
        self.check_write()?;
        match self.messages.get_mut(&message.id) {
            Some(mut stored) => {
                *stored = message.clone();
                Ok(())
            }
            None => Err(message_not_found(message.id)),
        }
    }

    #[instrument(level = "trace", skip(self))]
    async fn find_recent(
        &self,
        room_id: Snowflake,
        limit: usize,
        include_deleted: bool,
    ) -> RepoResult<Vec<Message>> {
        let ids: Vec<Snowflake> = match self.rooms.read().get(&room_id) {
            Some(index) => index.by_sequence.values().rev().copied().collect(),
            None => return Ok(Vec::new()),
        };

        let mut recent: Vec<Message> = ids
            .into_iter()
            .filter_map(|id| self.messages.get(&id).map(|m| m.value().clone()))
            .filter(|m| include_deleted || !m.is_deleted())
            .take(limit)
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn last_sequence(&self, room_id: Snowflake) -> RepoResult<u64> {
        Ok(self
            .rooms
            .read()
            .get(&room_id)
            .map_or(0, |index| index.high_water))
    }

    #[instrument(level = "trace", skip(self))]
    async fn delete(&self, id: Snowflake) -> RepoResult<bool> {
        let Some((_, message)) = self.messages.remove(&id) else {
            return Ok(false);
        };
        if let Some(index) = self.rooms.write().get_mut(&message.room_id) {
            index.by_sequence.remove(&message.sequence);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::MessageType;
    use chrono::Utc;

    fn message(id: i64, room: i64, sequence: u64) -> Message {
        let mut msg = Message::new(
            Snowflake::new(id),
            Snowflake::new(room),
            Snowflake::new(1),
            format!("message {id}"),
            MessageType::Text,
        );
        msg.sequence = sequence;
        msg
    }

    #[tokio::test]
    async fn test_find_recent_is_ascending_and_limited() {
        let store = MemoryMessageStore::new();
        for seq in 1..=5 {
            store.create(&message(seq as i64, 10, seq)).await.unwrap();
        }
        store.create(&message(99, 20, 1)).await.unwrap();

        let recent = store.find_recent(Snowflake::new(10), 3, false).await.unwrap();
        let sequences: Vec<u64> = recent.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
        assert_eq!(store.last_sequence(Snowflake::new(10)).await.unwrap(), 5);
        assert_eq!(store.last_sequence(Snowflake::new(30)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deleted_messages_need_opt_in() {
        let store = MemoryMessageStore::new();
        let mut first = message(1, 10, 1);
        store.create(&first).await.unwrap();
        store.create(&message(2, 10, 2)).await.unwrap();

        first.soft_delete(Snowflake::new(1), Utc::now());
        store.update(&first).await.unwrap();

        assert_eq!(store.find_recent(Snowflake::new(10), 10, false).await.unwrap().len(), 1);
        assert_eq!(store.find_recent(Snowflake::new(10), 10, true).await.unwrap().len(), 2);
        assert!(store.find_by_id(Snowflake::new(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_keeps_high_water() {
        let store = MemoryMessageStore::new();
        store.create(&message(1, 10, 1)).await.unwrap();
        store.create(&message(2, 10, 2)).await.unwrap();

        assert!(store.delete(Snowflake::new(2)).await.unwrap());
        assert!(!store.delete(Snowflake::new(2)).await.unwrap());
        assert_eq!(store.last_sequence(Snowflake::new(10)).await.unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_duplicate_sequence() {
        let store = MemoryMessageStore::new();
        store.create(&message(1, 10, 1)).await.unwrap();
        assert!(store.create(&message(2, 10, 1)).await.is_err());
        assert!(store.create(&message(1, 10, 2)).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_write_failures() {
        let store = MemoryMessageStore::new();
        store.fail_next_writes(1);

        assert!(store.create(&message(1, 10, 1)).await.is_err());
        assert!(store.create(&message(1, 10, 1)).await.is_ok());
        assert!(store
            .update(&message(5, 10, 5))
            .await
            .unwrap_err()
            .is_not_found());
    }
}
