//! Message flags
//!
//! Per-message markers stored as a 32-bit bitfield and serialized as a list of names.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageFlags: u32 {
        /// Pinned to the room
        const PINNED = 1 << 0;
        /// Mentions in this message do not highlight recipients
        const SILENT = 1 << 1;
        /// Sent with urgent priority
        const URGENT = 1 << 2;
        /// Generated by the server rather than a user
        const SYSTEM = 1 << 3;
    }
}

impl MessageFlags {
    /// Flag names in declaration order, lowercase
    pub fn names(&self) -> Vec<String> {
        self.iter_names().map(|(name, _)| name.to_lowercase()).collect()
    }

    /// Parse a single flag name (case-insensitive)
    pub fn from_name_ci(name: &str) -> Option<Self> {
        Self::from_name(&name.to_uppercase())
    }
}

impl Serialize for MessageFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.names().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MessageFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let names = Vec::<String>::deserialize(deserializer)?;
        names.iter().try_fold(Self::empty(), |flags, name| {
            Self::from_name_ci(name)
                .map(|flag| flags | flag)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown message flag: {name}")))
        })
    }
}
