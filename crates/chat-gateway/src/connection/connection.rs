//! Individual WebSocket connection
//!
//! Represents a single WebSocket connection and its state.

use crate::protocol::GatewayMessage;
use chat_core::Snowflake;
use chat_realtime::{ConnectionId, EventSender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

/// A single WebSocket connection
pub struct Connection {
    /// Unique connection ID, shared with the registry once authenticated
    connection_id: ConnectionId,

    /// Authenticated user ID (None until Authenticate)
    user_id: RwLock<Option<Snowflake>>,

    /// Direct replies (acks, errors, heartbeat acks) to the WebSocket
    control: mpsc::Sender<GatewayMessage>,

    /// Handed to the hub on authentication; room fan-out arrives here
    events: EventSender,

    /// Last dispatch sequence number written
    sequence: AtomicU64,

    /// Last heartbeat received
    last_heartbeat: RwLock<Instant>,

    /// Connection creation time
    created_at: Instant,
}

impl Connection {
    /// Create a new connection
    pub fn new(connection_id: ConnectionId, control: mpsc::Sender<GatewayMessage>, events: EventSender) -> Arc<Self> {
        Arc::new(Self {
            connection_id,
            user_id: RwLock::new(None),
            control,
            events,
            sequence: AtomicU64::new(0),
            last_heartbeat: RwLock::new(Instant::now()),
            created_at: Instant::now(),
        })
    }

    /// Get the connection ID
    pub fn id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Get the user ID (if authenticated)
    pub async fn user_id(&self) -> Option<Snowflake> {
        *self.user_id.read().await
    }

    /// Bind the connection to a user; false if it was already bound
    pub async fn authenticate(&self, user_id: Snowflake) -> bool {
        let mut slot = self.user_id.write().await;
        if slot.is_some() {
            return false;
        }
        *slot = Some(user_id);
        true
    }

    /// Check if the connection is authenticated
    pub async fn is_authenticated(&self) -> bool {
        self.user_id.read().await.is_some()
    }

    /// Sender the hub pushes realtime events into
    pub fn event_sender(&self) -> EventSender {
        self.events.clone()
    }

    /// Get the next sequence number
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get the current sequence number
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Record a heartbeat received
    pub async fn record_heartbeat(&self) {
        *self.last_heartbeat.write().await = Instant::now();
    }

    /// Get time since last heartbeat
    pub async fn time_since_heartbeat(&self) -> Duration {
        self.last_heartbeat.read().await.elapsed()
    }

    /// Get connection age
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Queue a direct reply to this connection
    pub async fn send(&self, message: GatewayMessage) -> Result<(), mpsc::error::SendError<GatewayMessage>> {
        self.control.send(message).await
    }

    /// Check if the socket writer has gone away
    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connection_id", &self.connection_id)
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (Arc<Connection>, mpsc::Receiver<GatewayMessage>) {
        let (tx, rx) = mpsc::channel(10);
        let (events, _events_rx) = mpsc::channel(10);
        (Connection::new(ConnectionId::from("conn-1"), tx, events), rx)
    }

    #[tokio::test]
    async fn test_connection_creation() {
        let (conn, _rx) = connection();

        assert_eq!(conn.id().as_str(), "conn-1");
        assert!(conn.user_id().await.is_none());
        assert!(!conn.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_authenticate_only_once() {
        let (conn, _rx) = connection();
        let user_id = Snowflake::new(12345);

        assert!(conn.authenticate(user_id).await);
        assert!(!conn.authenticate(Snowflake::new(1)).await);
        assert_eq!(conn.user_id().await, Some(user_id));
    }

    #[tokio::test]
    async fn test_connection_sequence() {
        let (conn, _rx) = connection();

        assert_eq!(conn.current_sequence(), 0);
        assert_eq!(conn.next_sequence(), 1);
        assert_eq!(conn.next_sequence(), 2);
        assert_eq!(conn.current_sequence(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_heartbeat() {
        let (conn, _rx) = connection();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(conn.time_since_heartbeat().await >= Duration::from_secs(30));

        conn.record_heartbeat().await;
        assert!(conn.time_since_heartbeat().await < Duration::from_secs(1));
        assert!(conn.age() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_send_reaches_writer() {
        let (conn, mut rx) = connection();
        conn.send(GatewayMessage::heartbeat_ack()).await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.op, crate::protocol::OpCode::HeartbeatAck);

        drop(rx);
        assert!(conn.is_closed());
    }
}
