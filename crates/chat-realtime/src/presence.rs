//! Presence tracker
//!
//! Per user: `offline -> online` on the first connection, `online <-> away|busy`
//! on explicit updates, and `-> offline` once the user has had zero
//! connections for the whole grace period. Every connection-count change bumps
//! an epoch; a pending offline transition only fires if the epoch it captured
//! is still current, so it happens at most once per disconnect and never after
//! a reconnect.
//!
//! Per (user, room) typing indicators expire on their own after the typing
//! timeout. A repeated start only pushes the expiry back.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::instrument;

use chat_core::events::UserTypingEvent;
use chat_core::{DomainError, PresenceState, RealtimeEvent, Snowflake, UserDirectory, UserStatus};

use crate::broadcaster::{Broadcaster, Skip};
use crate::clock::Clock;
use crate::membership::RoomMembership;
use crate::registry::ConnectionRegistry;

/// Longest custom status message accepted
const MAX_CUSTOM_MESSAGE_LEN: usize = 128;

#[derive(Debug, Clone, Copy)]
struct Typing {
    expires_at: Instant,
    token: u64,
}

#[derive(Debug)]
struct UserPresence {
    status: UserStatus,
    custom_message: Option<String>,
    last_seen: Option<chrono::DateTime<chrono::Utc>>,
    connections: usize,
    epoch: u64,
    typing: HashMap<Snowflake, Typing>,
}

impl UserPresence {
    fn new() -> Self {
        Self {
            status: UserStatus::Offline,
            custom_message: None,
            last_seen: None,
            connections: 0,
            epoch: 0,
            typing: HashMap::new(),
        }
    }
}

pub struct PresenceTracker {
    users: DashMap<Snowflake, UserPresence>,
    registry: Arc<ConnectionRegistry>,
    membership: Arc<RoomMembership>,
    broadcaster: Arc<Broadcaster>,
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    typing_timeout: Duration,
    next_token: AtomicU64,
}

impl PresenceTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        membership: Arc<RoomMembership>,
        broadcaster: Arc<Broadcaster>,
        directory: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        grace: Duration,
        typing_timeout: Duration,
    ) -> Self {
        Self {
            users: DashMap::new(),
            registry,
            membership,
            broadcaster,
            directory,
            clock,
            grace,
            typing_timeout,
            next_token: AtomicU64::new(1),
        }
    }

    /// Current presence of a user (offline if never seen)
    pub fn presence(&self, user_id: Snowflake) -> PresenceState {
        self.users
            .get(&user_id)
            .map_or_else(|| PresenceState::offline(user_id), |p| self.snapshot(user_id, &p))
    }

    fn snapshot(&self, user_id: Snowflake, presence: &UserPresence) -> PresenceState {
        let now = Instant::now();
        let wall = self.clock.now();
        let typing: BTreeMap<Snowflake, chrono::DateTime<chrono::Utc>> = presence
            .typing
            .iter()
            .map(|(room_id, typing)| {
                let left = typing.expires_at.saturating_duration_since(now);
                let left = chrono::Duration::from_std(left).unwrap_or_else(|_| chrono::Duration::zero());
                (*room_id, wall + left)
            })
            .collect();
        PresenceState {
            user_id,
            status: presence.status,
            custom_message: presence.custom_message.clone(),
            last_seen: presence.last_seen,
            typing,
        }
    }

    /// Presence of every online member of a room
    pub async fn room_presence(&self, room_id: Snowflake) -> Result<Vec<PresenceState>, DomainError> {
        let room = self.membership.room(room_id).await?;
        Ok(room
            .active_users
            .iter()
            .map(|user_id| self.presence(*user_id))
            .filter(PresenceState::is_online)
            .collect())
    }

    /// React to a user's live connection count changing.
    ///
    /// `reported` may be stale when a reconnect races a disconnect, so the
    /// registry's current count wins.
    #[instrument(skip(self))]
    pub async fn on_connection_count_changed(self: &Arc<Self>, user_id: Snowflake, reported: usize) {
        let new_count = self.registry.connection_count(user_id);
        if new_count != reported {
            tracing::debug!(user_id = %user_id, reported, live = new_count, "Stale connection count");
        }
        let (came_online, epoch) = {
            let mut presence = self.users.entry(user_id).or_insert_with(UserPresence::new);
            presence.connections = new_count;
            presence.epoch += 1;
            let came_online = new_count > 0 && presence.status == UserStatus::Offline;
            if came_online {
                presence.status = UserStatus::Online;
            }
            (came_online, presence.epoch)
        };

        if came_online {
            tracing::debug!(user_id = %user_id, "User came online");
            self.announce(user_id).await;
        } else if new_count == 0 {
            let tracker = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(tracker.grace).await;
                tracker.expire_if_still_offline(user_id, epoch).await;
            });
        }
    }

    async fn expire_if_still_offline(&self, user_id: Snowflake, epoch: u64) {
        let last_seen = {
            let Some(mut presence) = self.users.get_mut(&user_id) else {
                return;
            };
            if presence.epoch != epoch || presence.connections > 0 || presence.status == UserStatus::Offline {
                return;
            }
            if self.registry.connection_count(user_id) > 0 {
                return;
            }
            let now = self.clock.now();
            presence.status = UserStatus::Offline;
            presence.last_seen = Some(now);
            presence.typing.clear();
            now
        };

        tracing::debug!(user_id = %user_id, "User went offline");
        if let Err(e) = self
            .directory
            .record_last_seen(user_id, UserStatus::Offline, last_seen)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to persist last seen");
        }
        self.announce(user_id).await;
    }

    /// Explicit status update from the client
    #[instrument(skip(self, custom_message))]
    pub async fn update_status(
        &self,
        user_id: Snowflake,
        status: UserStatus,
        custom_message: Option<String>,
    ) -> Result<PresenceState, DomainError> {
        let custom_message = custom_message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        if custom_message
            .as_ref()
            .is_some_and(|m| m.chars().count() > MAX_CUSTOM_MESSAGE_LEN)
        {
            return Err(DomainError::Validation(format!(
                "custom message longer than {MAX_CUSTOM_MESSAGE_LEN} characters"
            )));
        }

        let state = {
            let mut presence = self.users.entry(user_id).or_insert_with(UserPresence::new);
            presence.status = status;
            presence.custom_message = custom_message;
            if status == UserStatus::Offline {
                presence.last_seen = Some(self.clock.now());
            }
            self.snapshot(user_id, &presence)
        };

        self.announce(user_id).await;
        Ok(state)
    }

    /// Broadcast the user's presence to every room they occupy
    async fn announce(&self, user_id: Snowflake) {
        let mut rooms: HashSet<Snowflake> = self.registry.rooms_for_user(user_id);
        match self.membership.user_rooms(user_id).await {
            Ok(member_of) => rooms.extend(member_of),
            Err(e) => tracing::warn!(user_id = %user_id, error = %e, "Failed to load user rooms"),
        }

        let state = self.presence(user_id);
        for room_id in rooms {
            self.broadcaster
                .enqueue(room_id, Arc::new(RealtimeEvent::PresenceChanged(state.clone())), Skip::Nobody);
        }
    }

    /// Mark the user as typing in a room.
    ///
    /// Returns true if this started a new indicator (and was broadcast);
    /// false if it only refreshed the expiry of an existing one.
    pub fn start_typing(self: &Arc<Self>, user_id: Snowflake, room_id: Snowflake) -> bool {
        let expires_at = Instant::now() + self.typing_timeout;
        let token = {
            let mut presence = self.users.entry(user_id).or_insert_with(UserPresence::new);
            if let Some(typing) = presence.typing.get_mut(&room_id) {
                typing.expires_at = expires_at;
                return false;
            }
            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            presence.typing.insert(room_id, Typing { expires_at, token });
            token
        };

        self.publish_typing(user_id, room_id, true);

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut deadline = expires_at;
            loop {
                tokio::time::sleep_until(deadline).await;
                match tracker.typing_deadline(user_id, room_id, token) {
                    Some(next) if next > Instant::now() => deadline = next,
                    Some(_) => {
                        tracker.clear_typing_with_token(user_id, room_id, token);
                        break;
                    }
                    None => break,
                }
            }
        });
        true
    }

    fn typing_deadline(&self, user_id: Snowflake, room_id: Snowflake, token: u64) -> Option<Instant> {
        let presence = self.users.get(&user_id)?;
        presence
            .typing
            .get(&room_id)
            .filter(|typing| typing.token == token)
            .map(|typing| typing.expires_at)
    }

    fn clear_typing_with_token(&self, user_id: Snowflake, room_id: Snowflake, token: u64) {
        let removed = self
            .users
            .get_mut(&user_id)
            .is_some_and(|mut presence| {
                let current = presence.typing.get(&room_id).is_some_and(|t| t.token == token);
                if current {
                    presence.typing.remove(&room_id);
                }
                current
            });
        if removed {
            tracing::trace!(user_id = %user_id, room_id = %room_id, "Typing indicator expired");
            self.publish_typing(user_id, room_id, false);
        }
    }

    /// Clear the user's typing indicator in a room; returns whether one was set
    pub fn stop_typing(&self, user_id: Snowflake, room_id: Snowflake) -> bool {
        let removed = self
            .users
            .get_mut(&user_id)
            .is_some_and(|mut presence| presence.typing.remove(&room_id).is_some());
        if removed {
            self.publish_typing(user_id, room_id, false);
        }
        removed
    }

    /// Clear typing indicators in several rooms (leave / disconnect)
    pub fn clear_typing(&self, user_id: Snowflake, rooms: &[Snowflake]) -> usize {
        rooms
            .iter()
            .filter(|room_id| self.stop_typing(user_id, **room_id))
            .count()
    }

    pub fn is_typing(&self, user_id: Snowflake, room_id: Snowflake) -> bool {
        self.users
            .get(&user_id)
            .is_some_and(|presence| presence.typing.contains_key(&room_id))
    }

    fn publish_typing(&self, user_id: Snowflake, room_id: Snowflake, is_typing: bool) {
        let event = RealtimeEvent::UserTyping(UserTypingEvent {
            room_id,
            user_id,
            is_typing,
        });
        self.broadcaster
            .enqueue(room_id, Arc::new(event), Skip::User(user_id));
    }
}
