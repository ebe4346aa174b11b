//! Message entity - a chat message and its delivery/read/reaction state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reaction::{Reaction, ReactionState};
use crate::value_objects::{MessageFlags, Snowflake};

/// Kind of content a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Delivery status of a message
///
/// `Sending -> Sent -> Delivered -> Read` only moves forward; `Failed` and
/// `Deleted` override any state and are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Deleted,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Sending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Failed | Self::Deleted => u8::MAX,
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Deleted)
    }

    /// Whether moving from `self` to `next` respects the status ordering
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.rank() > self.rank()
    }
}

/// Prior content kept when a message is edited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRecord {
    pub content: String,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Snowflake,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub user_id: Snowflake,
    pub delivered_at: DateTime<Utc>,
}

/// Soft-delete state; queries skip `Deleted` messages unless asked for them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MessageLifecycle {
    #[default]
    Active,
    Deleted {
        deleted_at: DateTime<Utc>,
        deleted_by: Snowflake,
    },
}

/// Message entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub room_id: Snowflake,
    pub author_id: Snowflake,
    /// Position within the room, assigned when the message is accepted
    pub sequence: u64,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub priority: MessagePriority,
    #[serde(default)]
    pub edit_history: Vec<EditRecord>,
    pub thread_id: Option<Snowflake>,
    pub reply_to_id: Option<Snowflake>,
    #[serde(default)]
    pub mentions: Vec<Snowflake>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    #[serde(default)]
    pub delivered_to: Vec<DeliveryReceipt>,
    #[serde(default)]
    pub flags: MessageFlags,
    /// Users who replied in the thread rooted at this message
    #[serde(default)]
    pub thread_participants: Vec<Snowflake>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub lifecycle: MessageLifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a message in the `Sending` state; the pipeline assigns the sequence
    pub fn new(
        id: Snowflake,
        room_id: Snowflake,
        author_id: Snowflake,
        content: String,
        message_type: MessageType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            room_id,
            author_id,
            sequence: 0,
            content,
            message_type,
            status: MessageStatus::Sending,
            priority: MessagePriority::Normal,
            edit_history: Vec::new(),
            thread_id: None,
            reply_to_id: None,
            mentions: Vec::new(),
            reactions: Vec::new(),
            read_by: Vec::new(),
            delivered_to: Vec::new(),
            flags: MessageFlags::empty(),
            thread_participants: Vec::new(),
            reply_count: 0,
            lifecycle: MessageLifecycle::Active,
            created_at: now,
            updated_at: now,
            edited_at: None,
        }
    }

    #[inline]
    pub fn is_edited(&self) -> bool {
        !self.edit_history.is_empty()
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        matches!(self.lifecycle, MessageLifecycle::Deleted { .. })
    }

    #[inline]
    pub fn is_reply(&self) -> bool {
        self.reply_to_id.is_some()
    }

    /// Move to `next` if the transition is allowed; returns whether it changed
    pub fn advance_status(&mut self, next: MessageStatus) -> bool {
        if self.status == next || !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    pub fn is_delivered_to(&self, user_id: Snowflake) -> bool {
        self.delivered_to.iter().any(|r| r.user_id == user_id)
    }

    pub fn is_read_by(&self, user_id: Snowflake) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    /// Record delivery to `user_id` once; returns false if already recorded
    pub fn mark_delivered(&mut self, user_id: Snowflake, at: DateTime<Utc>) -> bool {
        if self.is_delivered_to(user_id) {
            return false;
        }
        self.delivered_to.push(DeliveryReceipt {
            user_id,
            delivered_at: at,
        });
        if user_id != self.author_id {
            self.advance_status(MessageStatus::Delivered);
        }
        self.updated_at = at;
        true
    }

    /// Record a read by `user_id` once, backfilling the delivery receipt
    pub fn mark_read(&mut self, user_id: Snowflake, at: DateTime<Utc>) -> bool {
        self.mark_delivered(user_id, at);
        if self.is_read_by(user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt {
            user_id,
            read_at: at,
        });
        if user_id != self.author_id {
            self.advance_status(MessageStatus::Read);
        }
        self.updated_at = at;
        true
    }

    /// Add a reaction; a repeated (user, emoji) pair leaves the message unchanged
    pub fn add_reaction(&mut self, user_id: Snowflake, emoji: &str) -> bool {
        if self
            .reactions
            .iter()
            .any(|r| r.user_id == user_id && r.is_emoji(emoji))
        {
            return false;
        }
        self.reactions.push(Reaction::new(user_id, emoji.to_string()));
        self.updated_at = Utc::now();
        true
    }

    pub fn remove_reaction(&mut self, user_id: Snowflake, emoji: &str) -> bool {
        let before = self.reactions.len();
        self.reactions
            .retain(|r| !(r.user_id == user_id && r.is_emoji(emoji)));
        let removed = self.reactions.len() != before;
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    pub fn reaction_state(&self) -> ReactionState {
        ReactionState::from_reactions(self.id, self.room_id, &self.reactions)
    }

    /// Replace the content, keeping the prior content in the edit history
    pub fn edit(&mut self, content: String, at: DateTime<Utc>) {
        let previous = std::mem::replace(&mut self.content, content);
        self.edit_history.push(EditRecord {
            content: previous,
            edited_at: at,
        });
        self.edited_at = Some(at);
        self.updated_at = at;
    }

    pub fn soft_delete(&mut self, deleted_by: Snowflake, at: DateTime<Utc>) {
        self.lifecycle = MessageLifecycle::Deleted {
            deleted_at: at,
            deleted_by,
        };
        self.status = MessageStatus::Deleted;
        self.updated_at = at;
    }

    /// Undo a soft delete, deriving the status again from the receipts
    pub fn restore(&mut self) {
        self.lifecycle = MessageLifecycle::Active;
        let others_read = self.read_by.iter().any(|r| r.user_id != self.author_id);
        let others_received = self
            .delivered_to
            .iter()
            .any(|r| r.user_id != self.author_id);
        self.status = if others_read {
            MessageStatus::Read
        } else if others_received {
            MessageStatus::Delivered
        } else {
            MessageStatus::Sent
        };
        self.updated_at = Utc::now();
    }

    /// Register a reply posted in the thread rooted at this message
    pub fn record_thread_reply(&mut self, participant: Snowflake) {
        self.reply_count += 1;
        if !self.thread_participants.contains(&participant) {
            self.thread_participants.push(participant);
        }
        self.updated_at = Utc::now();
    }
}
