//! Room entity - a named channel with bounded membership

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_objects::Snowflake;

/// Room entity
///
/// `active_users` is persisted membership ("belongs to the room"); it is
/// independent of whether those users currently hold a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Snowflake,
    pub name: String,
    pub is_private: bool,
    pub max_users: usize,
    pub created_by: Option<Snowflake>,
    #[serde(default)]
    pub active_users: Vec<Snowflake>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(id: Snowflake, name: String, max_users: usize) -> Self {
        Self {
            id,
            name,
            is_private: false,
            max_users,
            created_by: None,
            active_users: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[inline]
    pub fn has_member(&self, user_id: Snowflake) -> bool {
        self.active_users.contains(&user_id)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.active_users.len() >= self.max_users
    }

    /// Admit a user. `Ok(false)` if already a member, `RoomFull` at capacity.
    pub fn admit(&mut self, user_id: Snowflake) -> Result<bool, DomainError> {
        if self.has_member(user_id) {
            return Ok(false);
        }
        if self.is_full() {
            return Err(DomainError::RoomFull {
                room_id: self.id,
                max_users: self.max_users,
            });
        }
        self.active_users.push(user_id);
        Ok(true)
    }

    pub fn remove_member(&mut self, user_id: Snowflake) -> bool {
        let before = self.active_users.len();
        self.active_users.retain(|u| *u != user_id);
        self.active_users.len() != before
    }
}
