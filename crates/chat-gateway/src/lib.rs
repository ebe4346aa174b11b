//! # chat-gateway
//!
//! WebSocket gateway for real-time bidirectional communication.
//!
//! Clients authenticate with an access token, join rooms and exchange
//! messages over a single socket. Every frame is a [`protocol::GatewayMessage`];
//! the realtime core lives in `chat-realtime`.

pub mod connection;
pub mod handlers;
pub mod protocol;
pub mod server;

pub use server::{create_app, create_gateway_state, run, serve, GatewayState};
