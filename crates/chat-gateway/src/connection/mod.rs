//! Connection state
//!
//! Per-socket state shared between the receive, send and heartbeat tasks.

mod connection;

pub use connection::Connection;
