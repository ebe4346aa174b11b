//! Integration test utilities for the chat server
//!
//! This crate provides helpers for driving the realtime hub directly and
//! for running end-to-end tests against the WebSocket gateway.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
