//! Connection registry
//!
//! Single source of truth for "who receives broadcasts for room X right now".
//! The per-connection room set and the per-room connection set are updated
//! together: a connection's entry is locked first, then the room index.
//! Readers never hold one map while touching the other.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::instrument;

use chat_core::{DomainError, RealtimeEvent, Snowflake};

use crate::membership::RoomMembership;

/// Channel half the transport reads pushed events from
pub type EventSender = mpsc::Sender<Arc<RealtimeEvent>>;
pub type EventReceiver = mpsc::Receiver<Arc<RealtimeEvent>>;

/// Identifier of one live transport session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a new random connection ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Why a push to a connection did not land
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// Receiver dropped (socket closed)
    #[error("connection closed")]
    Closed,
    /// Outbound buffer stayed full for the whole push timeout
    #[error("push timed out")]
    Timeout,
}

/// Cheap handle used to push events to one connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: Snowflake,
    sender: EventSender,
}

impl ConnectionHandle {
    /// Push an event, waiting at most `timeout` for buffer space
    pub async fn push(&self, event: Arc<RealtimeEvent>, timeout: Duration) -> Result<(), PushError> {
        self.sender.send_timeout(event, timeout).await.map_err(|e| match e {
            mpsc::error::SendTimeoutError::Closed(_) => PushError::Closed,
            mpsc::error::SendTimeoutError::Timeout(_) => PushError::Timeout,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

struct ConnectionEntry {
    user_id: Snowflake,
    sender: EventSender,
    rooms: HashSet<Snowflake>,
    last_seen: Instant,
    /// Set while unregistering so no join can slip in
    closing: bool,
}

/// What was torn down by [`ConnectionRegistry::unregister`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    pub user_id: Snowflake,
    pub rooms: Vec<Snowflake>,
    /// Live connections the user still holds
    pub remaining: usize,
}

pub struct ConnectionRegistry {
    membership: Arc<RoomMembership>,
    connections: DashMap<ConnectionId, ConnectionEntry>,
    room_connections: DashMap<Snowflake, HashSet<ConnectionId>>,
    user_connections: DashMap<Snowflake, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new(membership: Arc<RoomMembership>) -> Self {
        Self {
            membership,
            connections: DashMap::new(),
            room_connections: DashMap::new(),
            user_connections: DashMap::new(),
        }
    }

    /// Register a connection; idempotent per connection ID.
    ///
    /// Returns the number of live connections the user holds afterwards.
    pub fn register(&self, user_id: Snowflake, connection_id: ConnectionId, sender: EventSender) -> usize {
        {
            let entry = self.connections.entry(connection_id.clone());
            if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
                if existing.get().user_id != user_id {
                    tracing::warn!(
                        connection_id = %connection_id,
                        registered_to = %existing.get().user_id,
                        user_id = %user_id,
                        "Ignoring re-registration for a different user"
                    );
                }
                drop(entry);
                return self.connection_count(user_id);
            }
            entry.or_insert(ConnectionEntry {
                user_id,
                sender,
                rooms: HashSet::new(),
                last_seen: Instant::now(),
                closing: false,
            });
            self.user_connections
                .entry(user_id)
                .or_default()
                .insert(connection_id.clone());
        }

        let count = self.connection_count(user_id);
        tracing::debug!(connection_id = %connection_id, user_id = %user_id, count, "Connection registered");
        count
    }

    /// Add the connection to a room's live set.
    ///
    /// Fails with `ConnectionNotRegistered` for unknown connections and with
    /// `RoomFull` / `RoomNotFound` when membership refuses the user; in both
    /// cases the live set is unchanged. Returns false if already joined.
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn join_room(&self, connection_id: &ConnectionId, room_id: Snowflake) -> Result<bool, DomainError> {
        let user_id = self
            .user_of(connection_id)
            .ok_or_else(|| DomainError::ConnectionNotRegistered(connection_id.to_string()))?;

        if !self.is_live(connection_id) {
            return Err(DomainError::ConnectionNotRegistered(connection_id.to_string()));
        }

        let was_member = self.membership.is_member(room_id, user_id).await?;
        self.membership.add_user(room_id, user_id).await?;

        match self.attach(connection_id, room_id) {
            Some(joined) => {
                if joined {
                    tracing::debug!(room_id = %room_id, user_id = %user_id, "Connection joined room");
                }
                Ok(joined)
            }
            None => {
                // Unregistered while membership was being written
                if !was_member {
                    self.membership.remove_user(room_id, user_id).await?;
                }
                Err(DomainError::ConnectionNotRegistered(connection_id.to_string()))
            }
        }
    }

    fn is_live(&self, connection_id: &ConnectionId) -> bool {
        self.connections
            .get(connection_id)
            .is_some_and(|entry| !entry.closing)
    }

    /// Add the room to a live connection; None once the connection is closing
    fn attach(&self, connection_id: &ConnectionId, room_id: Snowflake) -> Option<bool> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .filter(|entry| !entry.closing)?;
        let joined = entry.rooms.insert(room_id);
        if joined {
            self.room_connections
                .entry(room_id)
                .or_default()
                .insert(connection_id.clone());
        }
        Some(joined)
    }

    /// Remove the connection from a room's live set; no-op if not joined
    pub fn leave_room(&self, connection_id: &ConnectionId, room_id: Snowflake) -> bool {
        let Some(mut entry) = self.connections.get_mut(connection_id) else {
            return false;
        };
        if !entry.rooms.remove(&room_id) {
            return false;
        }
        self.detach_from_room(connection_id, room_id);
        drop(entry);

        tracing::debug!(connection_id = %connection_id, room_id = %room_id, "Connection left room");
        true
    }

    /// Tear down a connection, returning the rooms it was in
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<Unregistered> {
        let (user_id, rooms) = {
            let mut entry = self.connections.get_mut(connection_id)?;
            if entry.closing {
                return None;
            }
            entry.closing = true;
            let rooms: Vec<Snowflake> = entry.rooms.drain().collect();
            for room_id in &rooms {
                self.detach_from_room(connection_id, *room_id);
            }
            (entry.user_id, rooms)
        };

        self.connections.remove(connection_id);
        if let Some(mut sessions) = self.user_connections.get_mut(&user_id) {
            sessions.remove(connection_id);
        }
        self.user_connections
            .remove_if(&user_id, |_, sessions| sessions.is_empty());

        let remaining = self.connection_count(user_id);
        tracing::debug!(
            connection_id = %connection_id,
            user_id = %user_id,
            rooms = rooms.len(),
            remaining,
            "Connection unregistered"
        );

        Some(Unregistered {
            user_id,
            rooms,
            remaining,
        })
    }

    fn detach_from_room(&self, connection_id: &ConnectionId, room_id: Snowflake) {
        if let Some(mut members) = self.room_connections.get_mut(&room_id) {
            members.remove(connection_id);
        }
        self.room_connections
            .remove_if(&room_id, |_, members| members.is_empty());
    }

    /// Connection IDs currently joined to the room
    pub fn connections_for_room(&self, room_id: Snowflake) -> HashSet<ConnectionId> {
        self.room_connections
            .get(&room_id)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    /// Rooms the connection has joined
    pub fn rooms_for_connection(&self, connection_id: &ConnectionId) -> HashSet<Snowflake> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }

    /// Push handles for every connection in the room
    pub fn handles_for_room(&self, room_id: Snowflake) -> Vec<ConnectionHandle> {
        let ids = self.connections_for_room(room_id);
        self.handles(ids.iter())
    }

    /// Push handles for every connection of a user
    pub fn user_handles(&self, user_id: Snowflake) -> Vec<ConnectionHandle> {
        let ids: Vec<ConnectionId> = self
            .user_connections
            .get(&user_id)
            .map(|sessions| sessions.iter().cloned().collect())
            .unwrap_or_default();
        self.handles(ids.iter())
    }

    pub fn handle(&self, connection_id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(connection_id).map(|entry| ConnectionHandle {
            id: connection_id.clone(),
            user_id: entry.user_id,
            sender: entry.sender.clone(),
        })
    }

    fn handles<'a>(&self, ids: impl Iterator<Item = &'a ConnectionId>) -> Vec<ConnectionHandle> {
        ids.filter_map(|id| self.handle(id)).collect()
    }

    /// Rooms joined by any of the user's live connections
    pub fn rooms_for_user(&self, user_id: Snowflake) -> HashSet<Snowflake> {
        let ids: Vec<ConnectionId> = self
            .user_connections
            .get(&user_id)
            .map(|sessions| sessions.iter().cloned().collect())
            .unwrap_or_default();
        ids.iter()
            .flat_map(|id| self.rooms_for_connection(id))
            .collect()
    }

    pub fn user_of(&self, connection_id: &ConnectionId) -> Option<Snowflake> {
        self.connections.get(connection_id).map(|entry| entry.user_id)
    }

    pub fn connection_count(&self, user_id: Snowflake) -> usize {
        self.user_connections
            .get(&user_id)
            .map_or(0, |sessions| sessions.len())
    }

    pub fn is_online(&self, user_id: Snowflake) -> bool {
        self.connection_count(user_id) > 0
    }

    /// Total live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Record liveness (heartbeat or any inbound frame)
    pub fn touch(&self, connection_id: &ConnectionId) -> bool {
        match self.connections.get_mut(connection_id) {
            Some(mut entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Connections with no liveness signal for longer than `timeout`
    pub fn stale_connections(&self, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.last_seen.elapsed() > timeout || entry.sender.is_closed())
            .map(|entry| entry.key().clone())
            .collect()
    }
}
