//! Domain entities - core business objects

mod message;
mod presence;
mod reaction;
mod room;

pub use message::{
    DeliveryReceipt, EditRecord, Message, MessageLifecycle, MessagePriority, MessageStatus,
    MessageType, ReadReceipt,
};
pub use presence::{PresenceState, UserStatus};
pub use reaction::{Reaction, ReactionState, ReactionSummary};
pub use room::Room;
