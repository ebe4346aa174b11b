//! # chat-store
//!
//! In-memory implementations of the storage traits defined in `chat-core`.
//!
//! ## Overview
//!
//! The stores keep documents in concurrent maps and are cheap to clone
//! behind an `Arc`. They back the gateway binary and every test suite.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chat_store::{MemoryMessageStore, MemoryRoomStore, MemoryUserDirectory};
//!
//! let messages = Arc::new(MemoryMessageStore::new());
//! let rooms = Arc::new(MemoryRoomStore::new());
//! let users = Arc::new(MemoryUserDirectory::new());
//! ```

mod error;
mod message;
mod room;
mod user;

pub use message::MemoryMessageStore;
pub use room::MemoryRoomStore;
pub use user::{MemoryUserDirectory, UserRecord};
