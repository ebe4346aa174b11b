//! Reaction entity - represents an emoji reaction on a message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

/// Reaction entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Snowflake,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

impl Reaction {
    /// Create a new Reaction
    pub fn new(user_id: Snowflake, emoji: String) -> Self {
        Self {
            user_id,
            emoji,
            created_at: Utc::now(),
        }
    }

    /// Check if reaction uses a specific emoji
    #[inline]
    pub fn is_emoji(&self, emoji: &str) -> bool {
        self.emoji == emoji
    }
}

/// Reactions on one message grouped by emoji
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub users: Vec<Snowflake>,
}

/// Aggregated reaction state broadcast after every reaction change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionState {
    pub message_id: Snowflake,
    pub room_id: Snowflake,
    pub reactions: Vec<ReactionSummary>,
}

impl ReactionState {
    /// Group reactions by emoji, keeping first-use order
    pub fn from_reactions(message_id: Snowflake, room_id: Snowflake, reactions: &[Reaction]) -> Self {
        let mut summaries: Vec<ReactionSummary> = Vec::new();
        for reaction in reactions {
            match summaries.iter_mut().find(|s| s.emoji == reaction.emoji) {
                Some(summary) => {
                    summary.count += 1;
                    summary.users.push(reaction.user_id);
                }
                None => summaries.push(ReactionSummary {
                    emoji: reaction.emoji.clone(),
                    count: 1,
                    users: vec![reaction.user_id],
                }),
            }
        }
        Self {
            message_id,
            room_id,
            reactions: summaries,
        }
    }

    pub fn count_for(&self, emoji: &str) -> usize {
        self.reactions
            .iter()
            .find(|s| s.emoji == emoji)
            .map_or(0, |s| s.count)
    }
}
