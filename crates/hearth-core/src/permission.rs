//! Permission levels and the resolver contract.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::source::SourceKind;

/// The fixed, ordered set of permission levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase", try_from = "LevelRepr")]
pub enum PermissionLevel {
    Guest = 0,
    #[default]
    User = 1,
    Helper = 2,
    Admin = 3,
    Owner = 4,
}

impl PermissionLevel {
    pub const ALL: [PermissionLevel; 5] = [
        PermissionLevel::Guest,
        PermissionLevel::User,
        PermissionLevel::Helper,
        PermissionLevel::Admin,
        PermissionLevel::Owner,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            PermissionLevel::Guest => "guest",
            PermissionLevel::User => "user",
            PermissionLevel::Helper => "helper",
            PermissionLevel::Admin => "admin",
            PermissionLevel::Owner => "owner",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned for an unknown level name or value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid permission level '{0}', expected guest, user, helper, admin, owner or 0-4")]
pub struct InvalidPermissionLevel(pub String);

impl FromStr for PermissionLevel {
    type Err = InvalidPermissionLevel;

    /// Accepts a level name (case-insensitive) or its numeric value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(value) = s.parse::<u8>() {
            return Self::from_value(value).ok_or_else(|| InvalidPermissionLevel(s.to_string()));
        }
        Self::ALL
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| InvalidPermissionLevel(s.to_string()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LevelRepr {
    Value(u8),
    Name(String),
}

impl TryFrom<LevelRepr> for PermissionLevel {
    type Error = InvalidPermissionLevel;

    fn try_from(repr: LevelRepr) -> Result<Self, Self::Error> {
        match repr {
            LevelRepr::Value(v) => {
                Self::from_value(v).ok_or_else(|| InvalidPermissionLevel(v.to_string()))
            }
            LevelRepr::Name(name) => name.parse(),
        }
    }
}

/// Maps command sources to permission levels.
///
/// Consulted once per invocation, when the [`CommandSource`](crate::CommandSource)
/// is created; implementations must not block.
pub trait PermissionResolver: Send + Sync {
    /// Level of the given invoker.
    fn level_of(&self, source: &SourceKind) -> PermissionLevel;

    /// Assigns a level to a player.
    fn set_level(&self, player: &str, level: PermissionLevel);

    /// Level of a player by name.
    fn player_level(&self, player: &str) -> PermissionLevel {
        self.level_of(&SourceKind::Player(player.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(PermissionLevel::Guest < PermissionLevel::User);
        assert!(PermissionLevel::Admin < PermissionLevel::Owner);
        assert_eq!(PermissionLevel::Helper.value(), 2);
        assert_eq!(PermissionLevel::from_value(4), Some(PermissionLevel::Owner));
        assert_eq!(PermissionLevel::from_value(5), None);
    }

    #[test]
    fn test_parse_names_and_values() {
        assert_eq!("ADMIN".parse::<PermissionLevel>().unwrap(), PermissionLevel::Admin);
        assert_eq!("0".parse::<PermissionLevel>().unwrap(), PermissionLevel::Guest);
        assert!("root".parse::<PermissionLevel>().is_err());
        assert!("9".parse::<PermissionLevel>().is_err());
    }
}
