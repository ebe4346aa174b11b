//! Message pipeline
//!
//! Accepts, validates, sequences and persists messages, and applies every later
//! mutation (edits, reactions, receipts, lifecycle). Messages in one room are
//! accepted one at a time under that room's sequencer lock; the sequence handed
//! out is the room's previous sequence plus one and is only consumed once the
//! message is persisted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{Mutex, MutexGuard};
use tracing::instrument;

use chat_common::RealtimeConfig;
use chat_core::{
    DomainError, Message, MessageFlags, MessagePriority, MessageStatus, MessageStore, MessageType,
    ReactionState, Room, Snowflake, SnowflakeGenerator,
};

use crate::clock::Clock;
use crate::membership::RoomMembership;
use crate::rate_limit::{ActionKind, RateLimiter};

/// Number of striped locks serializing read-modify-write on stored messages
const MUTATION_STRIPES: usize = 64;

/// Longest reaction key accepted
const MAX_EMOJI_LEN: usize = 32;

/// Upper bound for one history page
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Optional parts of a new message
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub thread_id: Option<Snowflake>,
    pub reply_to_id: Option<Snowflake>,
    pub mentions: Vec<Snowflake>,
    /// Deliver without highlighting mentioned users
    pub silent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionOp {
    Add,
    Remove,
}

pub struct MessagePipeline {
    membership: Arc<RoomMembership>,
    limiter: Arc<RateLimiter>,
    messages: Arc<dyn MessageStore>,
    ids: Arc<SnowflakeGenerator>,
    clock: Arc<dyn Clock>,
    max_content_len: usize,
    edit_window: Duration,
    retry_backoff: Duration,
    /// Per-room last accepted sequence; `None` until loaded from the store
    sequencers: DashMap<Snowflake, Arc<Mutex<Option<u64>>>>,
    mutation_locks: Vec<Mutex<()>>,
}

impl MessagePipeline {
    pub fn new(
        membership: Arc<RoomMembership>,
        limiter: Arc<RateLimiter>,
        messages: Arc<dyn MessageStore>,
        ids: Arc<SnowflakeGenerator>,
        clock: Arc<dyn Clock>,
        config: &RealtimeConfig,
    ) -> Self {
        Self {
            membership,
            limiter,
            messages,
            ids,
            clock,
            max_content_len: config.max_message_length,
            edit_window: config.edit_window(),
            retry_backoff: config.persist_retry_backoff(),
            sequencers: DashMap::new(),
            mutation_locks: (0..MUTATION_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn sequencer(&self, room_id: Snowflake) -> Arc<Mutex<Option<u64>>> {
        self.sequencers.entry(room_id).or_default().clone()
    }

    async fn lock_message(&self, message_id: Snowflake) -> MutexGuard<'_, ()> {
        let stripe = message_id.into_inner().unsigned_abs() as usize % MUTATION_STRIPES;
        self.mutation_locks[stripe].lock().await
    }

    /// Accept a message; see [`submit_then`](Self::submit_then)
    pub async fn submit(
        &self,
        author_id: Snowflake,
        room_id: Snowflake,
        content: String,
        options: SubmitOptions,
    ) -> Result<Message, DomainError> {
        self.submit_then(author_id, room_id, content, options, |_| ())
            .await
            .map(|(message, ())| message)
    }

    /// Accept a message and run `on_accept` while the room's sequencer is
    /// still held, so anything it enqueues is ordered like the sequence.
    #[instrument(skip(self, content, options, on_accept), fields(len = content.len()))]
    pub async fn submit_then<F, R>(
        &self,
        author_id: Snowflake,
        room_id: Snowflake,
        content: String,
        options: SubmitOptions,
        on_accept: F,
    ) -> Result<(Message, R), DomainError>
    where
        F: FnOnce(&Message) -> R,
    {
        let room = self.membership.room(room_id).await?;
        if !room.has_member(author_id) {
            return Err(DomainError::NotRoomMember(room_id));
        }
        self.limiter.check(author_id, ActionKind::Message)?;
        let content = self.validate_content(&content)?;

        let now = self.clock.now();
        let mut message = Message::new(self.ids.generate(), room_id, author_id, content, options.message_type);
        message.created_at = now;
        message.updated_at = now;
        message.priority = options.priority;
        message.mentions = resolve_mentions(&room, options.mentions);
        if options.silent {
            message.flags |= MessageFlags::SILENT;
        }
        if options.priority == MessagePriority::Urgent {
            message.flags |= MessageFlags::URGENT;
        }
        if let Some(reply_to_id) = options.reply_to_id {
            self.message_in_room(reply_to_id, room_id).await?;
            message.reply_to_id = Some(reply_to_id);
        }
        if let Some(thread_id) = options.thread_id {
            let root = self.message_in_room(thread_id, room_id).await?;
            if root.thread_id.is_some() {
                return Err(DomainError::Validation(
                    "thread_id must reference a thread root".to_string(),
                ));
            }
            message.thread_id = Some(thread_id);
        }

        let sequencer = self.sequencer(room_id);
        let mut last = sequencer.lock().await;
        let previous = match *last {
            Some(sequence) => sequence,
            None => self.messages.last_sequence(room_id).await?,
        };

        message.sequence = previous + 1;
        message.advance_status(MessageStatus::Sent);
        if let Err(e) = self.persist(&message).await {
            *last = Some(previous);
            message.sequence = 0;
            message.status = MessageStatus::Failed;
            tracing::error!(
                message_id = %message.id,
                room_id = %room_id,
                error = %e,
                "Message persistence failed after retry"
            );
            return Err(DomainError::DeliveryFailed {
                message: Box::new(message),
                reason: e.to_string(),
            });
        }
        *last = Some(message.sequence);
        let accepted = on_accept(&message);
        drop(last);

        tracing::info!(
            message_id = %message.id,
            room_id = %room_id,
            author_id = %author_id,
            sequence = message.sequence,
            "Message accepted"
        );

        if let Some(thread_id) = message.thread_id {
            if let Err(e) = self.record_thread_reply(thread_id, author_id).await {
                tracing::warn!(thread_id = %thread_id, error = %e, "Failed to update thread root");
            }
        }

        Ok((message, accepted))
    }

    /// Persist a new message, retrying once after a jittered backoff
    async fn persist(&self, message: &Message) -> Result<(), DomainError> {
        let Err(first) = self.messages.create(message).await else {
            return Ok(());
        };

        let jitter_cap = (self.retry_backoff.as_millis() as u64 / 4).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap));
        tracing::warn!(
            message_id = %message.id,
            error = %first,
            retry_in_ms = (self.retry_backoff + jitter).as_millis() as u64,
            "Message persistence failed, retrying"
        );
        tokio::time::sleep(self.retry_backoff + jitter).await;
        self.messages.create(message).await
    }

    fn validate_content(&self, content: &str) -> Result<String, DomainError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidContent("message content is empty".to_string()));
        }
        if trimmed.chars().count() > self.max_content_len {
            return Err(DomainError::ContentTooLong {
                max: self.max_content_len,
            });
        }
        Ok(trimmed.to_string())
    }

    async fn message_in_room(&self, message_id: Snowflake, room_id: Snowflake) -> Result<Message, DomainError> {
        let message = self.message(message_id).await?;
        if message.room_id != room_id || message.is_deleted() {
            return Err(DomainError::Validation(format!(
                "message {message_id} is not in room {room_id}"
            )));
        }
        Ok(message)
    }

    async fn record_thread_reply(&self, thread_id: Snowflake, participant: Snowflake) -> Result<(), DomainError> {
        let _guard = self.lock_message(thread_id).await;
        let mut root = self.message(thread_id).await?;
        root.record_thread_reply(participant);
        self.messages.update(&root).await
    }

    /// Load a message, including soft-deleted ones
    pub async fn message(&self, message_id: Snowflake) -> Result<Message, DomainError> {
        self.messages
            .find_by_id(message_id)
            .await?
            .ok_or(DomainError::MessageNotFound(message_id))
    }

    async fn active_message(&self, message_id: Snowflake) -> Result<Message, DomainError> {
        let message = self.message(message_id).await?;
        if message.is_deleted() {
            return Err(DomainError::MessageNotFound(message_id));
        }
        Ok(message)
    }

    async fn ensure_member(&self, room_id: Snowflake, user_id: Snowflake) -> Result<(), DomainError> {
        if self.membership.is_member(room_id, user_id).await? {
            Ok(())
        } else {
            Err(DomainError::NotRoomMember(room_id))
        }
    }

    /// Replace the content of a message, keeping the old content in its history
    #[instrument(skip(self, content))]
    pub async fn edit(&self, message_id: Snowflake, editor_id: Snowflake, content: String) -> Result<Message, DomainError> {
        let _guard = self.lock_message(message_id).await;
        let mut message = self.active_message(message_id).await?;
        if message.author_id != editor_id {
            return Err(DomainError::Forbidden("only the author can edit a message".to_string()));
        }

        let now = self.clock.now();
        let elapsed = (now - message.created_at).to_std().unwrap_or_default();
        if elapsed > self.edit_window {
            return Err(DomainError::EditWindowExpired {
                window_secs: self.edit_window.as_secs(),
            });
        }

        let content = self.validate_content(&content)?;
        if content == message.content {
            return Ok(message);
        }
        message.edit(content, now);
        self.messages.update(&message).await?;

        tracing::debug!(message_id = %message_id, edits = message.edit_history.len(), "Message edited");
        Ok(message)
    }

    /// Add a reaction; repeating an existing (user, emoji) pair changes nothing
    pub async fn add_reaction(&self, message_id: Snowflake, user_id: Snowflake, emoji: &str) -> Result<ReactionState, DomainError> {
        self.apply_reaction(message_id, user_id, emoji, ReactionOp::Add)
            .await
            .map(|(state, _)| state)
    }

    pub async fn remove_reaction(&self, message_id: Snowflake, user_id: Snowflake, emoji: &str) -> Result<bool, DomainError> {
        self.apply_reaction(message_id, user_id, emoji, ReactionOp::Remove)
            .await
            .map(|(_, changed)| changed)
    }

    /// Apply a reaction change and report the resulting state and whether it changed
    #[instrument(skip(self))]
    pub async fn apply_reaction(
        &self,
        message_id: Snowflake,
        user_id: Snowflake,
        emoji: &str,
        op: ReactionOp,
    ) -> Result<(ReactionState, bool), DomainError> {
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_LEN {
            return Err(DomainError::Validation(format!(
                "emoji must be 1-{MAX_EMOJI_LEN} characters"
            )));
        }

        let _guard = self.lock_message(message_id).await;
        let mut message = self.active_message(message_id).await?;
        self.ensure_member(message.room_id, user_id).await?;

        let changed = match op {
            ReactionOp::Add => message.add_reaction(user_id, emoji),
            ReactionOp::Remove => message.remove_reaction(user_id, emoji),
        };
        if changed {
            self.messages.update(&message).await?;
        }
        Ok((message.reaction_state(), changed))
    }

    pub async fn mark_delivered(&self, message_id: Snowflake, user_id: Snowflake) -> Result<bool, DomainError> {
        self.record_delivery(message_id, user_id)
            .await
            .map(|updated| updated.is_some())
    }

    pub async fn mark_read(&self, message_id: Snowflake, user_id: Snowflake) -> Result<bool, DomainError> {
        self.record_read(message_id, user_id)
            .await
            .map(|updated| updated.is_some())
    }

    /// Record delivery to `user_id`; returns the message if this was new
    pub async fn record_delivery(&self, message_id: Snowflake, user_id: Snowflake) -> Result<Option<Message>, DomainError> {
        let _guard = self.lock_message(message_id).await;
        let mut message = self.active_message(message_id).await?;
        self.ensure_member(message.room_id, user_id).await?;

        if !message.mark_delivered(user_id, self.clock.now()) {
            return Ok(None);
        }
        self.messages.update(&message).await?;
        Ok(Some(message))
    }

    /// Record a read by `user_id` (backfilling delivery); returns the message if this was new
    #[instrument(skip(self))]
    pub async fn record_read(&self, message_id: Snowflake, user_id: Snowflake) -> Result<Option<Message>, DomainError> {
        let _guard = self.lock_message(message_id).await;
        let mut message = self.active_message(message_id).await?;
        self.ensure_member(message.room_id, user_id).await?;

        if !message.mark_read(user_id, self.clock.now()) {
            return Ok(None);
        }
        self.messages.update(&message).await?;
        tracing::debug!(message_id = %message_id, user_id = %user_id, "Read receipt recorded");
        Ok(Some(message))
    }

    /// Record the users a fan-out reached; the author is never counted
    pub async fn record_deliveries(&self, message_id: Snowflake, users: &[Snowflake]) -> Result<usize, DomainError> {
        let _guard = self.lock_message(message_id).await;
        let mut message = self.message(message_id).await?;
        let now = self.clock.now();
        let author_id = message.author_id;

        let recorded = users
            .iter()
            .filter(|user_id| **user_id != author_id)
            .fold(0, |count, user_id| count + usize::from(message.mark_delivered(*user_id, now)));
        if recorded > 0 {
            self.messages.update(&message).await?;
        }
        Ok(recorded)
    }

    fn check_author(message: &Message, user_id: Snowflake, action: &str) -> Result<(), DomainError> {
        if message.author_id == user_id {
            Ok(())
        } else {
            Err(DomainError::Forbidden(format!("only the author can {action} a message")))
        }
    }

    /// Soft-delete; deleting an already deleted message is a no-op
    #[instrument(skip(self))]
    pub async fn delete(&self, message_id: Snowflake, user_id: Snowflake) -> Result<Message, DomainError> {
        let _guard = self.lock_message(message_id).await;
        let mut message = self.message(message_id).await?;
        Self::check_author(&message, user_id, "delete")?;
        if message.is_deleted() {
            return Ok(message);
        }

        message.soft_delete(user_id, self.clock.now());
        self.messages.update(&message).await?;
        tracing::info!(message_id = %message_id, "Message deleted");
        Ok(message)
    }

    #[instrument(skip(self))]
    pub async fn restore(&self, message_id: Snowflake, user_id: Snowflake) -> Result<Message, DomainError> {
        let _guard = self.lock_message(message_id).await;
        let mut message = self.message(message_id).await?;
        Self::check_author(&message, user_id, "restore")?;
        if !message.is_deleted() {
            return Ok(message);
        }

        message.restore();
        self.messages.update(&message).await?;
        tracing::info!(message_id = %message_id, "Message restored");
        Ok(message)
    }

    /// Hard delete; returns the message as it was
    #[instrument(skip(self))]
    pub async fn purge(&self, message_id: Snowflake, user_id: Snowflake) -> Result<Message, DomainError> {
        let _guard = self.lock_message(message_id).await;
        let message = self.message(message_id).await?;
        Self::check_author(&message, user_id, "purge")?;

        self.messages.delete(message_id).await?;
        tracing::info!(message_id = %message_id, "Message purged");
        Ok(message)
    }

    /// Most recent messages of a room, oldest first
    pub async fn history(
        &self,
        room_id: Snowflake,
        user_id: Snowflake,
        limit: usize,
        include_deleted: bool,
    ) -> Result<Vec<Message>, DomainError> {
        self.ensure_member(room_id, user_id).await?;
        self.messages
            .find_recent(room_id, limit.clamp(1, MAX_HISTORY_LIMIT), include_deleted)
            .await
    }
}

/// Keep each mentioned user once, and only if they belong to the room
fn resolve_mentions(room: &Room, requested: Vec<Snowflake>) -> Vec<Snowflake> {
    let mut seen = HashSet::new();
    let (mentions, dropped): (Vec<Snowflake>, Vec<Snowflake>) = requested
        .into_iter()
        .filter(|user_id| seen.insert(*user_id))
        .partition(|user_id| room.has_member(*user_id));
    if !dropped.is_empty() {
        tracing::trace!(room_id = %room.id, dropped = dropped.len(), "Dropped mentions of non-members");
    }
    mentions
}
