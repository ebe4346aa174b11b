//! Fan-out broadcaster
//!
//! Room events go through one sequential queue per room, so every connection
//! in a room observes events in enqueue order. Within one event the pushes to
//! individual connections run concurrently and are bounded by a push timeout;
//! a dead or slow connection is recorded as a failure and skipped.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};

use chat_core::{RealtimeEvent, Snowflake};

use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, PushError};

/// Connections to leave out of a fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Skip {
    #[default]
    Nobody,
    /// The originating connection (no self-echo)
    Connection(ConnectionId),
    /// Every connection of a user
    User(Snowflake),
}

impl Skip {
    fn skips(&self, handle: &ConnectionHandle) -> bool {
        match self {
            Self::Nobody => false,
            Self::Connection(id) => handle.id == *id,
            Self::User(user_id) => handle.user_id == *user_id,
        }
    }
}

/// A connection a push landed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub connection_id: ConnectionId,
    pub user_id: Snowflake,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFailure {
    pub connection_id: ConnectionId,
    pub user_id: Snowflake,
    pub error: PushError,
}

/// Per-connection outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub room_id: Option<Snowflake>,
    pub delivered: Vec<PushTarget>,
    pub failed: Vec<PushFailure>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    /// Distinct users that received the event on at least one connection
    pub fn delivered_users(&self) -> Vec<Snowflake> {
        let mut users: Vec<Snowflake> = self.delivered.iter().map(|t| t.user_id).collect();
        users.sort();
        users.dedup();
        users
    }
}

struct Job {
    event: Arc<RealtimeEvent>,
    skip: Skip,
    report: oneshot::Sender<DeliveryReport>,
}

pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    push_timeout: Duration,
    queues: DashMap<Snowflake, mpsc::UnboundedSender<Job>>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, push_timeout: Duration) -> Self {
        Self {
            registry,
            push_timeout,
            queues: DashMap::new(),
        }
    }

    /// Queue an event for a room without waiting for it to be pushed.
    ///
    /// Events queued for the same room are delivered in call order. The
    /// returned receiver yields the delivery report once the push finishes.
    pub fn enqueue(
        &self,
        room_id: Snowflake,
        event: Arc<RealtimeEvent>,
        skip: Skip,
    ) -> oneshot::Receiver<DeliveryReport> {
        let (report, receiver) = oneshot::channel();
        let mut job = Job { event, skip, report };

        // A worker that has gone away hands the job back; start a fresh one
        for _ in 0..2 {
            let queue = self
                .queues
                .entry(room_id)
                .or_insert_with(|| self.spawn_worker(room_id))
                .clone();
            match queue.send(job) {
                Ok(()) => return receiver,
                Err(mpsc::error::SendError(returned)) => {
                    self.queues
                        .remove_if(&room_id, |_, current| current.same_channel(&queue));
                    job = returned;
                }
            }
        }

        tracing::error!(room_id = %room_id, "Room delivery queue unavailable");
        receiver
    }

    fn spawn_worker(&self, room_id: Snowflake) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let registry = Arc::clone(&self.registry);
        let push_timeout = self.push_timeout;

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let targets = registry.handles_for_room(room_id);
                let mut report = fan_out(targets, &job.event, &job.skip, push_timeout).await;
                report.room_id = Some(room_id);
                tracing::trace!(
                    room_id = %room_id,
                    event = job.event.name(),
                    delivered = report.delivered.len(),
                    failed = report.failed.len(),
                    "Room fan-out complete"
                );
                // Nobody waiting for the report is fine
                let _ = job.report.send(report);
            }
        });

        tx
    }

    /// Push an event to every live connection in the room
    pub async fn broadcast_to_room(&self, room_id: Snowflake, event: RealtimeEvent) -> DeliveryReport {
        self.broadcast_to_room_skipping(room_id, event, Skip::Nobody).await
    }

    pub async fn broadcast_to_room_skipping(
        &self,
        room_id: Snowflake,
        event: RealtimeEvent,
        skip: Skip,
    ) -> DeliveryReport {
        self.enqueue(room_id, Arc::new(event), skip)
            .await
            .unwrap_or_else(|_| DeliveryReport {
                room_id: Some(room_id),
                ..DeliveryReport::default()
            })
    }

    /// Push an event to all of a user's live connections (personal events)
    pub async fn broadcast_to_user(&self, user_id: Snowflake, event: RealtimeEvent) -> DeliveryReport {
        let targets = self.registry.user_handles(user_id);
        fan_out(targets, &Arc::new(event), &Skip::Nobody, self.push_timeout).await
    }

    /// Push an event to a single connection
    pub async fn send_to_connection(
        &self,
        connection_id: &ConnectionId,
        event: RealtimeEvent,
    ) -> Result<(), PushError> {
        let handle = self
            .registry
            .handle(connection_id)
            .ok_or(PushError::Closed)?;
        handle.push(Arc::new(event), self.push_timeout).await
    }

    /// Number of rooms with a running delivery queue
    pub fn active_queues(&self) -> usize {
        self.queues.len()
    }
}

async fn fan_out(
    targets: Vec<ConnectionHandle>,
    event: &Arc<RealtimeEvent>,
    skip: &Skip,
    push_timeout: Duration,
) -> DeliveryReport {
    let pushes = targets
        .into_iter()
        .filter(|handle| !skip.skips(handle))
        .map(|handle| async move {
            let result = handle.push(Arc::clone(event), push_timeout).await;
            (handle, result)
        });

    let mut report = DeliveryReport::default();
    for (handle, result) in join_all(pushes).await {
        match result {
            Ok(()) => report.delivered.push(PushTarget {
                connection_id: handle.id,
                user_id: handle.user_id,
            }),
            Err(error) => {
                tracing::warn!(
                    connection_id = %handle.id,
                    user_id = %handle.user_id,
                    event = event.name(),
                    error = %error,
                    "Dropped push to connection"
                );
                report.failed.push(PushFailure {
                    connection_id: handle.id,
                    user_id: handle.user_id,
                    error,
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::RoomMembership;
    use crate::registry::{EventReceiver, EventSender};
    use chat_core::SnowflakeGenerator;
    use chat_store::MemoryRoomStore;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        broadcaster: Broadcaster,
        room_id: Snowflake,
    }

    async fn fixture() -> Fixture {
        let membership = Arc::new(RoomMembership::new(
            Arc::new(MemoryRoomStore::new()),
            Arc::new(SnowflakeGenerator::new(1)),
        ));
        let room = membership.create_room("general", 10, None, false).await.unwrap();
        let registry = Arc::new(ConnectionRegistry::new(membership));
        Fixture {
            broadcaster: Broadcaster::new(Arc::clone(&registry), Duration::from_millis(50)),
            registry,
            room_id: room.id,
        }
    }

    async fn connect(fx: &Fixture, user: i64, conn: &str, buffer: usize) -> EventReceiver {
        let (tx, rx): (EventSender, EventReceiver) = mpsc::channel(buffer);
        let id = ConnectionId::from(conn);
        fx.registry.register(Snowflake::new(user), id.clone(), tx);
        fx.registry.join_room(&id, fx.room_id).await.unwrap();
        rx
    }

    fn typing(room_id: Snowflake, n: i64) -> RealtimeEvent {
        RealtimeEvent::UserTyping(chat_core::events::UserTypingEvent {
            room_id,
            user_id: Snowflake::new(n),
            is_typing: true,
        })
    }

    #[tokio::test]
    async fn test_room_broadcast_skips_origin() {
        let fx = fixture().await;
        let mut a = connect(&fx, 1, "a", 8).await;
        let mut b = connect(&fx, 2, "b", 8).await;

        let report = fx
            .broadcaster
            .broadcast_to_room_skipping(fx.room_id, typing(fx.room_id, 1), Skip::Connection("a".into()))
            .await;

        assert_eq!(report.delivered_users(), vec![Snowflake::new(2)]);
        assert!(b.try_recv().is_ok());
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_connection_does_not_abort_fan_out() {
        let fx = fixture().await;
        let dead = connect(&fx, 1, "dead", 8).await;
        let mut alive = connect(&fx, 2, "alive", 8).await;
        drop(dead);

        let report = fx
            .broadcaster
            .broadcast_to_room(fx.room_id, typing(fx.room_id, 3))
            .await;

        assert_eq!(report.attempted(), 2);
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.failed[0].error, PushError::Closed);
        assert!(alive.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_times_out() {
        let fx = fixture().await;
        let _stuck = connect(&fx, 1, "stuck", 1).await;

        let first = fx.broadcaster.broadcast_to_room(fx.room_id, typing(fx.room_id, 1)).await;
        let second = fx.broadcaster.broadcast_to_room(fx.room_id, typing(fx.room_id, 2)).await;

        assert_eq!(first.delivered.len(), 1);
        assert_eq!(second.failed[0].error, PushError::Timeout);
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let fx = fixture().await;
        let mut rx = connect(&fx, 1, "a", 128).await;

        let receipts: Vec<_> = (0..50)
            .map(|n| {
                fx.broadcaster
                    .enqueue(fx.room_id, Arc::new(typing(fx.room_id, n)), Skip::Nobody)
            })
            .collect();
        for receipt in receipts {
            receipt.await.unwrap();
        }

        for n in 0..50 {
            match rx.try_recv().unwrap().as_ref() {
                RealtimeEvent::UserTyping(event) => assert_eq!(event.user_id, Snowflake::new(n)),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(fx.broadcaster.active_queues(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_user_reaches_every_device() {
        let fx = fixture().await;
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        fx.registry.register(Snowflake::new(7), "phone".into(), tx1);
        fx.registry.register(Snowflake::new(7), "laptop".into(), tx2);

        let report = fx
            .broadcaster
            .broadcast_to_user(Snowflake::new(7), RealtimeEvent::error("hi", "TEST"))
            .await;

        assert_eq!(report.delivered.len(), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
