//! In-memory implementation of UserDirectory

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::instrument;

use chat_core::{RepoResult, Snowflake, UserDirectory, UserStatus};

use crate::error::user_not_found;

/// Persisted slice of a user the realtime core cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Snowflake,
    pub username: String,
    pub status: UserStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

/// In-memory user directory
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: DashMap<Snowflake, UserRecord>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user if unknown; returns false when already present
    pub fn insert(&self, id: Snowflake, username: impl Into<String>) -> bool {
        let mut inserted = false;
        self.users.entry(id).or_insert_with(|| {
            inserted = true;
            UserRecord {
                id,
                username: username.into(),
                status: UserStatus::Offline,
                last_seen: None,
            }
        });
        inserted
    }

    pub fn get(&self, id: Snowflake) -> Option<UserRecord> {
        self.users.get(&id).map(|u| u.value().clone())
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn exists(&self, user_id: Snowflake) -> RepoResult<bool> {
        Ok(self.users.contains_key(&user_id))
    }

    #[instrument(level = "trace", skip(self))]
    async fn record_last_seen(
        &self,
        user_id: Snowflake,
        status: UserStatus,
        last_seen: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| user_not_found(user_id))?;
        user.status = status;
        user.last_seen = Some(last_seen);
        Ok(())
    }

    async fn last_seen(&self, user_id: Snowflake) -> RepoResult<Option<DateTime<Utc>>> {
        Ok(self.users.get(&user_id).and_then(|u| u.last_seen))
    }
}
