//! In-memory permission store seeded from configuration.

use std::collections::HashMap;

use hearth_core::{PermissionLevel, PermissionResolver, SourceKind};
use parking_lot::RwLock;
use tracing::info;

use crate::config::PermissionConfig;

/// Resolves levels from a player map.
///
/// The console and plugins are always [`PermissionLevel::Owner`]; players
/// without an entry get the default level. Lookups take a read lock only, so
/// resolving never waits on I/O.
#[derive(Debug)]
pub struct MemoryPermissionStore {
    default_level: PermissionLevel,
    players: RwLock<HashMap<String, PermissionLevel>>,
}

impl MemoryPermissionStore {
    pub fn new(default_level: PermissionLevel) -> Self {
        Self {
            default_level,
            players: RwLock::default(),
        }
    }

    pub fn from_config(config: &PermissionConfig) -> Self {
        Self {
            default_level: config.default_level,
            players: RwLock::new(config.players.clone()),
        }
    }

    pub fn default_level(&self) -> PermissionLevel {
        self.default_level
    }

    /// Players with an explicit level.
    pub fn players(&self) -> Vec<(String, PermissionLevel)> {
        let mut players: Vec<_> = self
            .players
            .read()
            .iter()
            .map(|(name, level)| (name.clone(), *level))
            .collect();
        players.sort();
        players
    }

    /// Drops a player's explicit level; returns whether one was set.
    pub fn reset(&self, player: &str) -> bool {
        self.players.write().remove(player).is_some()
    }
}

impl Default for MemoryPermissionStore {
    fn default() -> Self {
        Self::new(PermissionLevel::User)
    }
}

impl PermissionResolver for MemoryPermissionStore {
    fn level_of(&self, source: &SourceKind) -> PermissionLevel {
        match source {
            SourceKind::Console | SourceKind::Plugin(_) => PermissionLevel::Owner,
            SourceKind::Player(name) => self
                .players
                .read()
                .get(name)
                .copied()
                .unwrap_or(self.default_level),
        }
    }

    fn set_level(&self, player: &str, level: PermissionLevel) {
        let previous = self.players.write().insert(player.to_string(), level);
        info!(player, level = %level, previous = ?previous, "Permission level changed");
    }
}
