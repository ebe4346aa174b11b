//! WebSocket handler
//!
//! Handles WebSocket connections and message processing.

use crate::connection::Connection;
use crate::handlers::MessageDispatcher;
use crate::protocol::{CloseCode, GatewayMessage, HelloPayload, OpCode};
use crate::server::GatewayState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chat_realtime::ConnectionId;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Channel buffer size for direct replies
const MESSAGE_BUFFER_SIZE: usize = 100;

/// How long the writer gets to flush the close frame
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket gateway handler
pub async fn gateway_handler(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(state, socket))
}

/// Handle an upgraded WebSocket connection
async fn handle_socket(state: GatewayState, socket: WebSocket) {
    let connection_id = ConnectionId::generate();
    let realtime = state.hub().config().clone();

    // Direct replies, hub fan-out, and close requests each get their own channel
    let (tx, mut rx) = mpsc::channel::<GatewayMessage>(MESSAGE_BUFFER_SIZE);
    let (events_tx, mut events_rx) = mpsc::channel(realtime.connection_buffer);
    let (close_tx, mut close_rx) = mpsc::channel::<Option<CloseCode>>(1);

    let connection = Connection::new(connection_id.clone(), tx, events_tx);

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    // Split the WebSocket
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Send Hello message immediately
    let hello = GatewayMessage::hello(&HelloPayload::with_interval(realtime.heartbeat_interval_ms));
    let sent = match hello.and_then(|m| m.to_json()) {
        Ok(json) => ws_sink.send(Message::Text(json)).await.is_ok(),
        Err(_) => false,
    };
    if !sent {
        tracing::warn!(connection_id = %connection_id, "Failed to send Hello message");
        cleanup_connection(&state, &connection).await;
        return;
    }

    // Spawn task to receive messages from WebSocket
    let state_recv = state.clone();
    let connection_recv = connection.clone();
    let mut recv_task = tokio::spawn(async move {
        let connection_id = connection_recv.id();
        while let Some(msg) = ws_stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(close_code) = handle_text_message(&state_recv, &connection_recv, &text).await {
                        tracing::debug!(
                            connection_id = %connection_id,
                            close_code = ?close_code,
                            "Closing connection due to error"
                        );
                        return Some(close_code);
                    }
                }
                Ok(Message::Binary(_)) => {
                    tracing::debug!(connection_id = %connection_id, "Binary messages not supported");
                    return Some(CloseCode::DecodeError);
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    tracing::trace!(connection_id = %connection_id, "Ping/pong received");
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %connection_id, "Client closed connection");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                    return Some(CloseCode::UnknownError);
                }
            }
        }
        None
    });

    // Spawn task to write replies and pushed events to the WebSocket
    let connection_send = connection.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                close = close_rx.recv() => {
                    send_close(&mut ws_sink, close.flatten()).await;
                    break;
                }
                Some(msg) = rx.recv() => msg,
                Some(event) = events_rx.recv() => match GatewayMessage::from_event(&event) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(event = event.name(), error = %e, "Failed to encode event");
                        continue;
                    }
                },
                else => break,
            };

            if write_frame(&mut ws_sink, &connection_send, frame).await.is_err() {
                tracing::warn!(
                    connection_id = %connection_send.id(),
                    "Failed to send message to WebSocket"
                );
                break;
            }
        }
    });

    // Spawn heartbeat monitoring task
    let connection_hb = connection.clone();
    let heartbeat_timeout = realtime.heartbeat_timeout();
    let mut heartbeat_task = tokio::spawn(async move {
        let mut check_interval = interval(realtime.heartbeat_interval() / 2);

        loop {
            check_interval.tick().await;

            // Check if connection is dead (no heartbeat for too long)
            let time_since = connection_hb.time_since_heartbeat().await;
            if time_since > heartbeat_timeout {
                tracing::warn!(
                    connection_id = %connection_hb.id(),
                    time_since_ms = time_since.as_millis(),
                    "Connection timed out (no heartbeat)"
                );
                return Some(CloseCode::SessionTimeout);
            }
        }
    });

    // Wait for any task to complete
    let mut writer_done = false;
    tokio::select! {
        result = &mut recv_task => {
            let close_code = result.ok().flatten();
            tracing::debug!(connection_id = %connection_id, close_code = ?close_code, "Receive task ended");
            let _ = close_tx.send(close_code).await;
        }
        result = &mut heartbeat_task => {
            let _ = close_tx.send(result.ok().flatten()).await;
        }
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task ended");
            writer_done = true;
        }
    }

    if !writer_done {
        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task).await;
    }
    recv_task.abort();
    heartbeat_task.abort();
    send_task.abort();

    cleanup_connection(&state, &connection).await;
}

/// Stamp the per-connection sequence on dispatches and write the frame
async fn write_frame(
    ws_sink: &mut SplitSink<WebSocket, Message>,
    connection: &Connection,
    mut frame: GatewayMessage,
) -> Result<(), axum::Error> {
    if frame.op == OpCode::Dispatch {
        frame.s = Some(connection.next_sequence());
    }
    match frame.to_json() {
        Ok(json) => ws_sink.send(Message::Text(json)).await,
        Err(e) => {
            tracing::warn!(frame = %frame, error = %e, "Failed to encode frame");
            Ok(())
        }
    }
}

async fn send_close(ws_sink: &mut SplitSink<WebSocket, Message>, close_code: Option<CloseCode>) {
    if let Some(code) = close_code {
        tracing::debug!(close_code = %code, needs_new_token = code.requires_new_token(), "Sending close frame");
    }
    let frame = close_code.map(|code| {
        let (code, reason) = GatewayMessage::close_frame(code);
        CloseFrame {
            code,
            reason: reason.into(),
        }
    });
    let _ = ws_sink.send(Message::Close(frame)).await;
    let _ = ws_sink.close().await;
}

/// Handle a text message from the client
async fn handle_text_message(
    state: &GatewayState,
    connection: &Arc<Connection>,
    text: &str,
) -> Result<(), CloseCode> {
    // Parse the message
    let message = match GatewayMessage::from_json(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(
                connection_id = %connection.id(),
                error = %e,
                "Failed to parse message"
            );
            return Err(CloseCode::DecodeError);
        }
    };

    tracing::trace!(
        connection_id = %connection.id(),
        op = %message.op,
        "Received message"
    );

    // Dispatch to handler
    match MessageDispatcher::dispatch(state, connection, message).await {
        Ok(Some(close_code)) => Err(close_code),
        Ok(None) => Ok(()),
        Err(e) => {
            tracing::warn!(
                connection_id = %connection.id(),
                error = %e,
                "Handler error"
            );
            Err(e.to_close_code().unwrap_or(CloseCode::UnknownError))
        }
    }
}

/// Clean up a connection on disconnect
async fn cleanup_connection(state: &GatewayState, connection: &Arc<Connection>) {
    tracing::info!(
        connection_id = %connection.id(),
        age_ms = connection.age().as_millis(),
        "Cleaning up connection"
    );

    // Unregister from the hub; presence goes offline after the grace period
    if connection.is_authenticated().await {
        state.hub().disconnect(connection.id()).await;
    }
}
