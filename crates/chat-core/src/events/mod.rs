mod realtime_event;

pub use realtime_event::{
    ErrorEvent, HistoryEvent, JoinedRoomEvent, LeftRoomEvent, MessageDeletedEvent,
    MessageReadEvent, RealtimeEvent, UserTypingEvent,
};
