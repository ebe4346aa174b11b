//! Presence entity - a user's online status and typing indicators

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

/// User online status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// User is connected and active
    Online,
    /// Away from keyboard
    Away,
    /// Do not disturb
    Busy,
    /// No live connections
    #[default]
    Offline,
}

impl UserStatus {
    /// Check if this status should be visible to others
    #[must_use]
    pub fn is_visible(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Away => write!(f, "away"),
            Self::Busy => write!(f, "busy"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "away" => Ok(Self::Away),
            "busy" => Ok(Self::Busy),
            "offline" => Ok(Self::Offline),
            _ => Err(format!("Invalid status: {s}")),
        }
    }
}

/// Snapshot of a user's presence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub user_id: Snowflake,
    pub status: UserStatus,
    pub custom_message: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Rooms the user is typing in, with the time the indicator expires
    #[serde(default)]
    pub typing: BTreeMap<Snowflake, DateTime<Utc>>,
}

impl PresenceState {
    pub fn offline(user_id: Snowflake) -> Self {
        Self {
            user_id,
            status: UserStatus::Offline,
            custom_message: None,
            last_seen: None,
            typing: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        self.status.is_visible()
    }

    #[inline]
    pub fn is_typing_in(&self, room_id: Snowflake) -> bool {
        self.typing.contains_key(&room_id)
    }
}
