//! Persistence-level channel keys.
//!
//! Every stored message belongs to exactly one channel: the public `general`
//! room, a two-party private room, or a group room. Keys are pure functions of
//! their inputs so message history stays continuous across sessions.

use std::fmt;

/// Key of the public room.
pub const GENERAL: &str = "general";

const PRIVATE_PREFIX: &str = "private_";
const GROUP_PREFIX: &str = "group_";

/// A parsed channel key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKey {
    General,
    /// Participants are stored in lexicographic order.
    Private { low: String, high: String },
    Group(i32),
}

impl ChannelKey {
    /// Private channel between `a` and `b`. Argument order does not matter.
    pub fn private(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self::Private {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    pub fn group(group_id: i32) -> Self {
        Self::Group(group_id)
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private { .. })
    }

    /// Parse a stored key. Private keys are not split back into participants
    /// (usernames may contain the separator), so only the kind is recovered.
    pub fn kind_of(key: &str) -> ChannelKind {
        if key == GENERAL {
            ChannelKind::General
        } else if key.starts_with(PRIVATE_PREFIX) {
            ChannelKind::Private
        } else if let Some(id) = key
            .strip_prefix(GROUP_PREFIX)
            .and_then(|rest| rest.parse::<i32>().ok())
        {
            ChannelKind::Group(id)
        } else {
            ChannelKind::Other
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => f.write_str(GENERAL),
            Self::Private { low, high } => write!(f, "{PRIVATE_PREFIX}{low}_{high}"),
            Self::Group(id) => write!(f, "{GROUP_PREFIX}{id}"),
        }
    }
}

/// Coarse classification of a stored channel key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    General,
    Private,
    Group(i32),
    Other,
}
