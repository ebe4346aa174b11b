//! Test helpers for integration tests
//!
//! Two harnesses: [`TestHub`] drives the realtime core in-process, and
//! [`TestServer`] + [`GatewayClient`] exercise the gateway over a real socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chat_common::{AppConfig, JwtService};
use chat_core::{RealtimeEvent, Room, Snowflake};
use chat_gateway::protocol::{GatewayMessage, OpCode};
use chat_gateway::{create_app, create_gateway_state, serve, GatewayState};
use chat_realtime::{ChatHub, ConnectionId, EventReceiver, HubStores, SystemClock};
use chat_store::{MemoryMessageStore, MemoryRoomStore, MemoryUserDirectory};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::fixtures::{rate_limit_config, realtime_config, test_config};

/// How long a socket test waits for an expected frame
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// In-process hub
// ============================================================================

/// Hub over in-memory stores, with handles on the stores for assertions
pub struct TestHub {
    pub hub: Arc<ChatHub>,
    pub messages: Arc<MemoryMessageStore>,
    pub users: Arc<MemoryUserDirectory>,
}

impl TestHub {
    pub fn new() -> Self {
        let messages = Arc::new(MemoryMessageStore::new());
        let users = Arc::new(MemoryUserDirectory::new());
        let stores = HubStores {
            messages: messages.clone(),
            rooms: Arc::new(MemoryRoomStore::new()),
            users: users.clone(),
        };
        let hub = ChatHub::with_clock(realtime_config(), &rate_limit_config(), stores, 3, Arc::new(SystemClock));
        Self {
            hub: Arc::new(hub),
            messages,
            users,
        }
    }

    pub async fn room(&self, name: &str, max_users: usize) -> Room {
        self.hub
            .membership()
            .create_room(name, max_users, None, false)
            .await
            .expect("create room")
    }

    /// Register a connection for `user` and hand back its event stream
    pub async fn connect(&self, user: Snowflake) -> TestConnection {
        self.users.insert(user, format!("user-{user}"));
        let (tx, rx) = mpsc::channel(256);
        let id = self.hub.connect(user, tx).await;
        TestConnection { id, user, events: rx }
    }

    /// Connect and join `room_id` in one step
    pub async fn connect_to(&self, user: Snowflake, room_id: Snowflake) -> TestConnection {
        let conn = self.connect(user).await;
        self.hub.join_room(&conn.id, room_id).await.expect("join room");
        conn
    }
}

impl Default for TestHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One registered connection and the events pushed to it
pub struct TestConnection {
    pub id: ConnectionId,
    pub user: Snowflake,
    pub events: EventReceiver,
}

impl TestConnection {
    /// Everything pushed so far
    pub fn drain(&mut self) -> Vec<Arc<RealtimeEvent>> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Names of everything pushed so far
    pub fn drain_names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(|e| e.name()).collect()
    }

    /// Wait for the next pushed event
    pub async fn next(&mut self) -> Result<Arc<RealtimeEvent>> {
        tokio::time::timeout(RECV_TIMEOUT, self.events.recv())
            .await
            .context("timed out waiting for event")?
            .ok_or_else(|| anyhow!("event channel closed"))
    }

    /// Wait for the next event with the given name, skipping others
    pub async fn next_named(&mut self, name: &str) -> Result<Arc<RealtimeEvent>> {
        loop {
            let event = self.next().await?;
            if event.name() == name {
                return Ok(event);
            }
        }
    }
}

/// Let queued fan-out workers run
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
}

// ============================================================================
// Live gateway
// ============================================================================

/// Gateway bound to an ephemeral localhost port
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: GatewayState,
    pub jwt: JwtService,
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a new test server
    pub async fn start() -> Result<Self> {
        Self::start_with_config(test_config()).await
    }

    /// Start a test server with custom config
    pub async fn start_with_config(config: AppConfig) -> Result<Self> {
        let jwt = JwtService::new(&config.jwt.secret, config.jwt.access_token_expiry);
        let state = create_gateway_state(config).await?;
        let app = create_app(state.clone());

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            serve(app, listener).await.ok();
        });

        Ok(Self {
            addr,
            state,
            jwt,
            _handle: handle,
        })
    }

    pub fn gateway_url(&self) -> String {
        format!("ws://{}/gateway", self.addr)
    }

    pub fn token_for(&self, user: Snowflake) -> Result<String> {
        Ok(self.jwt.issue_access_token(user)?)
    }

    /// Open a socket, consume Hello and authenticate as `user`
    pub async fn client_for(&self, user: Snowflake) -> Result<GatewayClient> {
        let mut client = GatewayClient::connect(&self.gateway_url()).await?;
        client.authenticate(&self.token_for(user)?).await?;
        Ok(client)
    }

    /// Room id of a bootstrapped room
    pub async fn room_id(&self, name: &str) -> Result<Snowflake> {
        let room = self.state.hub().membership().ensure_room(name, 1).await?;
        Ok(room.id)
    }
}

/// What the server sent next
#[derive(Debug)]
pub enum Incoming {
    Frame(GatewayMessage),
    Closed(Option<u16>),
}

/// Minimal gateway client over tokio-tungstenite
pub struct GatewayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub heartbeat_interval: u64,
}

impl GatewayClient {
    /// Connect and consume the Hello frame
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url).await?;
        let mut client = Self {
            ws,
            heartbeat_interval: 0,
        };

        match client.recv().await? {
            Incoming::Frame(hello) if hello.op == OpCode::Hello => {
                client.heartbeat_interval = hello
                    .d
                    .as_ref()
                    .and_then(|d| d["heartbeat_interval"].as_u64())
                    .unwrap_or_default();
            }
            other => bail!("expected Hello, got {other:?}"),
        }
        Ok(client)
    }

    /// Send a raw client frame
    pub async fn send(&mut self, op: OpCode, d: Value, nonce: Option<&str>) -> Result<()> {
        let mut frame = json!({ "op": op.as_u8(), "d": d });
        if let Some(nonce) = nonce {
            frame["nonce"] = json!(nonce);
        }
        self.ws.send(WsMessage::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Next frame or close, skipping transport pings
    pub async fn recv(&mut self) -> Result<Incoming> {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .context("timed out waiting for frame")?;
            match next {
                Some(Ok(WsMessage::Text(text))) => return Ok(Incoming::Frame(GatewayMessage::from_json(&text)?)),
                Some(Ok(WsMessage::Close(frame))) => {
                    return Ok(Incoming::Closed(frame.map(|f| u16::from(f.code))));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(Incoming::Closed(None)),
            }
        }
    }

    /// Wait for a dispatch named `event`, skipping other frames
    pub async fn expect_dispatch(&mut self, event: &str) -> Result<GatewayMessage> {
        loop {
            match self.recv().await? {
                Incoming::Frame(frame) if frame.t.as_deref() == Some(event) => return Ok(frame),
                Incoming::Frame(_) => {}
                Incoming::Closed(code) => bail!("socket closed ({code:?}) while waiting for {event}"),
            }
        }
    }

    /// Wait for the socket to close and return the close code
    pub async fn expect_close(&mut self) -> Result<Option<u16>> {
        loop {
            if let Incoming::Closed(code) = self.recv().await? {
                return Ok(code);
            }
        }
    }

    pub async fn authenticate(&mut self, token: &str) -> Result<GatewayMessage> {
        self.send(OpCode::Authenticate, json!({ "token": token }), Some("auth"))
            .await?;
        self.expect_dispatch("ready").await
    }

    pub async fn join(&mut self, room_id: Snowflake) -> Result<GatewayMessage> {
        self.send(OpCode::JoinRoom, json!({ "room_id": room_id }), Some("join"))
            .await?;
        self.expect_dispatch("joinedRoom").await
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
