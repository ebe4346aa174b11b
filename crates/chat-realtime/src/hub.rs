//! Chat hub
//!
//! Wires the registry, membership, presence, pipeline, broadcaster and rate
//! limiter together and exposes one operation per client event. The transport
//! only ever talks to the hub.
//!
//! Room-wide fan-out skips the originating connection; the transport answers
//! that connection directly with the returned value.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::instrument;

use chat_common::{RateLimitConfig, RealtimeConfig, RoomSeed};
use chat_core::events::{HistoryEvent, JoinedRoomEvent, LeftRoomEvent, MessageDeletedEvent, MessageReadEvent};
use chat_core::{
    DomainError, Message, MessageStore, PresenceState, ReactionState, RealtimeEvent, Room, RoomStore,
    Snowflake, SnowflakeGenerator, UserDirectory, UserStatus,
};

use crate::broadcaster::{Broadcaster, Skip};
use crate::clock::{Clock, SystemClock};
use crate::membership::RoomMembership;
use crate::pipeline::{MessagePipeline, ReactionOp, SubmitOptions};
use crate::presence::PresenceTracker;
use crate::rate_limit::{ActionKind, RateLimiter};
use crate::registry::{ConnectionId, ConnectionRegistry, EventSender, Unregistered};

/// Storage the hub runs on
#[derive(Clone)]
pub struct HubStores {
    pub messages: Arc<dyn MessageStore>,
    pub rooms: Arc<dyn RoomStore>,
    pub users: Arc<dyn UserDirectory>,
}

pub struct ChatHub {
    config: RealtimeConfig,
    registry: Arc<ConnectionRegistry>,
    membership: Arc<RoomMembership>,
    presence: Arc<PresenceTracker>,
    pipeline: Arc<MessagePipeline>,
    broadcaster: Arc<Broadcaster>,
    limiter: Arc<RateLimiter>,
}

impl ChatHub {
    pub fn new(config: RealtimeConfig, limits: &RateLimitConfig, stores: HubStores, worker_id: u16) -> Self {
        Self::with_clock(config, limits, stores, worker_id, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: RealtimeConfig,
        limits: &RateLimitConfig,
        stores: HubStores,
        worker_id: u16,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ids = Arc::new(SnowflakeGenerator::new(worker_id));
        let membership = Arc::new(RoomMembership::new(stores.rooms, Arc::clone(&ids)));
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&membership)));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry), config.push_timeout()));
        let limiter = Arc::new(RateLimiter::new(limits));
        let presence = Arc::new(PresenceTracker::new(
            Arc::clone(&registry),
            Arc::clone(&membership),
            Arc::clone(&broadcaster),
            stores.users,
            Arc::clone(&clock),
            config.presence_grace(),
            config.typing_timeout(),
        ));
        let pipeline = Arc::new(MessagePipeline::new(
            Arc::clone(&membership),
            Arc::clone(&limiter),
            stores.messages,
            ids,
            clock,
            &config,
        ));

        Self {
            config,
            registry,
            membership,
            presence,
            pipeline,
            broadcaster,
            limiter,
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn membership(&self) -> &Arc<RoomMembership> {
        &self.membership
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn pipeline(&self) -> &Arc<MessagePipeline> {
        &self.pipeline
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Create the configured rooms that do not exist yet
    pub async fn bootstrap_rooms(&self, seeds: &[RoomSeed]) -> Result<Vec<Room>, DomainError> {
        let mut rooms = Vec::with_capacity(seeds.len());
        for seed in seeds {
            rooms.push(self.membership.ensure_room(&seed.name, seed.max_users).await?);
        }
        Ok(rooms)
    }

    fn user_of(&self, connection_id: &ConnectionId) -> Result<Snowflake, DomainError> {
        self.registry
            .user_of(connection_id)
            .ok_or_else(|| DomainError::ConnectionNotRegistered(connection_id.to_string()))
    }

    fn ensure_joined(&self, connection_id: &ConnectionId, room_id: Snowflake) -> Result<(), DomainError> {
        if self.registry.rooms_for_connection(connection_id).contains(&room_id) {
            Ok(())
        } else {
            Err(DomainError::NotRoomMember(room_id))
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Register a new authenticated connection under a fresh ID
    pub async fn connect(&self, user_id: Snowflake, sender: EventSender) -> ConnectionId {
        let connection_id = ConnectionId::generate();
        self.connect_with_id(user_id, connection_id.clone(), sender).await;
        connection_id
    }

    #[instrument(skip(self, sender), fields(connection_id = %connection_id))]
    pub async fn connect_with_id(&self, user_id: Snowflake, connection_id: ConnectionId, sender: EventSender) {
        let count = self.registry.register(user_id, connection_id, sender);
        self.presence.on_connection_count_changed(user_id, count).await;
        tracing::info!(user_id = %user_id, connections = count, "Connection established");
    }

    /// Tear down a connection and cascade to presence
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> Option<Unregistered> {
        let gone = self.registry.unregister(connection_id)?;
        self.presence.clear_typing(gone.user_id, &gone.rooms);
        self.presence
            .on_connection_count_changed(gone.user_id, gone.remaining)
            .await;

        tracing::info!(
            user_id = %gone.user_id,
            rooms = gone.rooms.len(),
            remaining = gone.remaining,
            "Connection closed"
        );
        Some(gone)
    }

    /// Record a liveness signal
    pub fn heartbeat(&self, connection_id: &ConnectionId) -> bool {
        self.registry.touch(connection_id)
    }

    /// Disconnect every connection idle for longer than `timeout`
    pub async fn prune_stale(&self, timeout: Duration) -> Vec<ConnectionId> {
        let stale = self.registry.stale_connections(timeout);
        for connection_id in &stale {
            tracing::warn!(connection_id = %connection_id, "Pruning idle connection");
            self.disconnect(connection_id).await;
        }
        self.limiter.purge_expired();
        stale
    }

    /// Run [`prune_stale`](Self::prune_stale) every `every` until the hub is dropped
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let hub = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                let timeout = hub.config.heartbeat_timeout();
                hub.prune_stale(timeout).await;
            }
        })
    }

    // =========================================================================
    // Rooms
    // =========================================================================

    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn join_room(&self, connection_id: &ConnectionId, room_id: Snowflake) -> Result<JoinedRoomEvent, DomainError> {
        let user_id = self.user_of(connection_id)?;
        let joined = self.registry.join_room(connection_id, room_id).await?;
        let room = self.membership.room(room_id).await?;

        if joined {
            let state = self.presence.presence(user_id);
            self.broadcaster.enqueue(
                room_id,
                Arc::new(RealtimeEvent::PresenceChanged(state)),
                Skip::Connection(connection_id.clone()),
            );
        }

        Ok(JoinedRoomEvent {
            room_id,
            name: room.name,
            user_id,
            online: self.presence.room_presence(room_id).await?,
        })
    }

    /// Leave a room: drops the membership and every live connection of the user in it
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn leave_room(&self, connection_id: &ConnectionId, room_id: Snowflake) -> Result<LeftRoomEvent, DomainError> {
        let user_id = self.user_of(connection_id)?;
        let removed = self.membership.remove_user(room_id, user_id).await?;

        let mut detached = 0;
        for handle in self.registry.user_handles(user_id) {
            if self.registry.leave_room(&handle.id, room_id) {
                detached += 1;
            }
        }
        self.presence.stop_typing(user_id, room_id);

        let event = LeftRoomEvent { room_id, user_id };
        if removed || detached > 0 {
            self.broadcaster
                .enqueue(room_id, Arc::new(RealtimeEvent::LeftRoom(event.clone())), Skip::Nobody);
            tracing::debug!(room_id = %room_id, user_id = %user_id, detached, "User left room");
        }
        Ok(event)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Accept a message and fan it out to the room.
    ///
    /// Delivery receipts are recorded in the background once the push completes.
    #[instrument(skip(self, content, options), fields(connection_id = %connection_id))]
    pub async fn send_message(
        &self,
        connection_id: &ConnectionId,
        room_id: Snowflake,
        content: String,
        options: SubmitOptions,
    ) -> Result<Message, DomainError> {
        let user_id = self.user_of(connection_id)?;
        let origin = Skip::Connection(connection_id.clone());

        let (message, delivery) = self
            .pipeline
            .submit_then(user_id, room_id, content, options, |message| {
                self.presence.stop_typing(user_id, room_id);
                self.broadcaster.enqueue(
                    room_id,
                    Arc::new(RealtimeEvent::ReceiveMessage(Box::new(message.clone()))),
                    origin,
                )
            })
            .await?;

        let pipeline = Arc::clone(&self.pipeline);
        let message_id = message.id;
        tokio::spawn(async move {
            let Ok(report) = delivery.await else {
                return;
            };
            let users = report.delivered_users();
            if users.is_empty() {
                return;
            }
            if let Err(e) = pipeline.record_deliveries(message_id, &users).await {
                tracing::warn!(message_id = %message_id, error = %e, "Failed to record deliveries");
            }
        });

        Ok(message)
    }

    fn publish_update(&self, connection_id: &ConnectionId, message: &Message) {
        self.broadcaster.enqueue(
            message.room_id,
            Arc::new(RealtimeEvent::MessageUpdated(Box::new(message.clone()))),
            Skip::Connection(connection_id.clone()),
        );
    }

    pub async fn edit_message(
        &self,
        connection_id: &ConnectionId,
        message_id: Snowflake,
        content: String,
    ) -> Result<Message, DomainError> {
        let user_id = self.user_of(connection_id)?;
        let message = self.pipeline.edit(message_id, user_id, content).await?;
        self.publish_update(connection_id, &message);
        Ok(message)
    }

    pub async fn delete_message(&self, connection_id: &ConnectionId, message_id: Snowflake) -> Result<MessageDeletedEvent, DomainError> {
        let user_id = self.user_of(connection_id)?;
        let message = self.pipeline.delete(message_id, user_id).await?;
        Ok(self.publish_deletion(connection_id, &message, false))
    }

    pub async fn restore_message(&self, connection_id: &ConnectionId, message_id: Snowflake) -> Result<Message, DomainError> {
        let user_id = self.user_of(connection_id)?;
        let message = self.pipeline.restore(message_id, user_id).await?;
        self.publish_update(connection_id, &message);
        Ok(message)
    }

    pub async fn purge_message(&self, connection_id: &ConnectionId, message_id: Snowflake) -> Result<MessageDeletedEvent, DomainError> {
        let user_id = self.user_of(connection_id)?;
        let message = self.pipeline.purge(message_id, user_id).await?;
        Ok(self.publish_deletion(connection_id, &message, true))
    }

    fn publish_deletion(&self, connection_id: &ConnectionId, message: &Message, purged: bool) -> MessageDeletedEvent {
        let event = MessageDeletedEvent {
            message_id: message.id,
            room_id: message.room_id,
            purged,
        };
        self.broadcaster.enqueue(
            message.room_id,
            Arc::new(RealtimeEvent::MessageDeleted(event.clone())),
            Skip::Connection(connection_id.clone()),
        );
        event
    }

    pub async fn react(
        &self,
        connection_id: &ConnectionId,
        message_id: Snowflake,
        emoji: &str,
        op: ReactionOp,
    ) -> Result<ReactionState, DomainError> {
        let user_id = self.user_of(connection_id)?;
        let (state, changed) = self.pipeline.apply_reaction(message_id, user_id, emoji, op).await?;
        if changed {
            self.broadcaster.enqueue(
                state.room_id,
                Arc::new(RealtimeEvent::ReactionUpdated(state.clone())),
                Skip::Connection(connection_id.clone()),
            );
        }
        Ok(state)
    }

    /// Record a read and tell the author's devices about it
    pub async fn mark_read(&self, connection_id: &ConnectionId, message_id: Snowflake) -> Result<bool, DomainError> {
        let user_id = self.user_of(connection_id)?;
        let Some(message) = self.pipeline.record_read(message_id, user_id).await? else {
            return Ok(false);
        };

        if message.author_id != user_id {
            let read_at = message
                .read_by
                .iter()
                .find(|receipt| receipt.user_id == user_id)
                .map(|receipt| receipt.read_at)
                .unwrap_or(message.updated_at);
            let event = RealtimeEvent::MessageRead(MessageReadEvent {
                message_id,
                room_id: message.room_id,
                user_id,
                read_at,
            });
            self.broadcaster.broadcast_to_user(message.author_id, event).await;
        }
        Ok(true)
    }

    pub async fn mark_delivered(&self, connection_id: &ConnectionId, message_id: Snowflake) -> Result<bool, DomainError> {
        let user_id = self.user_of(connection_id)?;
        self.pipeline.mark_delivered(message_id, user_id).await
    }

    /// Page of recent room history for a reconnecting client
    pub async fn history(
        &self,
        connection_id: &ConnectionId,
        room_id: Snowflake,
        limit: usize,
        include_deleted: bool,
    ) -> Result<HistoryEvent, DomainError> {
        let user_id = self.user_of(connection_id)?;
        let messages = self
            .pipeline
            .history(room_id, user_id, limit, include_deleted)
            .await?;
        Ok(HistoryEvent { room_id, messages })
    }

    // =========================================================================
    // Presence
    // =========================================================================

    /// Start or stop the typing indicator; starts count against the typing budget
    pub fn typing(&self, connection_id: &ConnectionId, room_id: Snowflake, is_typing: bool) -> Result<bool, DomainError> {
        let user_id = self.user_of(connection_id)?;
        self.ensure_joined(connection_id, room_id)?;

        if is_typing {
            self.limiter.check(user_id, ActionKind::Typing)?;
            Ok(self.presence.start_typing(user_id, room_id))
        } else {
            Ok(self.presence.stop_typing(user_id, room_id))
        }
    }

    pub async fn update_presence(
        &self,
        connection_id: &ConnectionId,
        status: UserStatus,
        custom_message: Option<String>,
    ) -> Result<PresenceState, DomainError> {
        let user_id = self.user_of(connection_id)?;
        self.presence.update_status(user_id, status, custom_message).await
    }
}
