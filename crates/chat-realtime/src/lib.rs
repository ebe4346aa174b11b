//! # chat-realtime
//!
//! Realtime delivery and presence core: who is connected, who is in which room,
//! who is online or typing, and how an accepted message reaches every live
//! connection of its room in order.

pub mod broadcaster;
pub mod clock;
pub mod hub;
pub mod membership;
pub mod pipeline;
pub mod presence;
pub mod rate_limit;
pub mod registry;

pub use broadcaster::{Broadcaster, DeliveryReport, PushFailure, PushTarget, Skip};
pub use clock::{Clock, ManualClock, SystemClock};
pub use hub::{ChatHub, HubStores};
pub use membership::RoomMembership;
pub use pipeline::{MessagePipeline, ReactionOp, SubmitOptions, MAX_HISTORY_LIMIT};
pub use presence::PresenceTracker;
pub use rate_limit::{ActionKind, RateLimiter};
pub use registry::{
    ConnectionHandle, ConnectionId, ConnectionRegistry, EventReceiver, EventSender,
    PushError, Unregistered,
};
