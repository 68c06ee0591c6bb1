//! Text classifiers: turn one raw output line into [`ParsedFields`].
//!
//! A classifier is a stateless pattern matcher for one server dialect. The
//! built-in dialects are a closed [`Dialect`] enum backed by regex pattern
//! sets; servers with a different log layout can plug in their own
//! [`TextClassifier`] through
//! [`InfoReactor::set_classifier`](crate::InfoReactor::set_classifier).
//!
//! ```text
//! "[12:00:01] [Server thread/INFO]: <Steve> hello"
//!        │             │       │        │      │
//!    timestamp       logger  level   player  content
//! ```

mod dialect;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::info::ParsedFields;

use self::dialect::PatternSet;

/// Pattern matcher for one server log dialect.
///
/// Implementations must be pure: the same line always yields the same
/// result. The reactor catches panics raised by a classifier and falls back
/// to a raw [`Info`](crate::Info).
pub trait TextClassifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Parses a line. `None` means the line has no recognised shape.
    fn classify(&self, raw: &str) -> Option<ParsedFields>;

    /// Returns `true` for the line the server prints once it is ready.
    fn is_server_started_line(&self, raw: &str) -> bool;

    /// Returns `true` for the line the server prints when it begins to stop.
    fn is_server_stopping_line(&self, raw: &str) -> bool;

    /// Name of the player announced as joining by this line.
    fn player_joined(&self, _raw: &str) -> Option<String> {
        None
    }

    /// Name of the player announced as leaving by this line.
    fn player_left(&self, _raw: &str) -> Option<String> {
        None
    }
}

/// Built-in server dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Vanilla,
    Bukkit,
    Forge,
    BungeeCord,
    Velocity,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::Vanilla,
        Dialect::Bukkit,
        Dialect::Forge,
        Dialect::BungeeCord,
        Dialect::Velocity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Vanilla => "vanilla",
            Dialect::Bukkit => "bukkit",
            Dialect::Forge => "forge",
            Dialect::BungeeCord => "bungeecord",
            Dialect::Velocity => "velocity",
        }
    }

    /// Returns the classifier for this dialect.
    pub fn classifier(self) -> DialectClassifier {
        DialectClassifier::new(self)
    }

    fn patterns(self) -> &'static PatternSet {
        match self {
            Dialect::Vanilla => &*dialect::VANILLA,
            Dialect::Bukkit => &*dialect::BUKKIT,
            Dialect::Forge => &*dialect::FORGE,
            Dialect::BungeeCord => &*dialect::BUNGEECORD,
            Dialect::Velocity => &*dialect::VELOCITY,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown dialect name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown server dialect '{0}', expected one of: vanilla, bukkit, forge, bungeecord, velocity")]
pub struct UnknownDialect(pub String);

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dialect::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownDialect(s.to_string()))
    }
}

/// [`TextClassifier`] backed by the pattern set of a built-in [`Dialect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectClassifier {
    dialect: Dialect,
}

impl DialectClassifier {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Message body of a server-emitted (non-chat) line.
    fn server_content(&self, raw: &str) -> Option<String> {
        self.classify(raw)
            .filter(|fields| fields.player.is_none())
            .and_then(|fields| fields.content)
    }
}

impl TextClassifier for DialectClassifier {
    fn name(&self) -> &str {
        self.dialect.as_str()
    }

    fn classify(&self, raw: &str) -> Option<ParsedFields> {
        self.dialect.patterns().classify(raw)
    }

    fn is_server_started_line(&self, raw: &str) -> bool {
        self.server_content(raw)
            .is_some_and(|content| self.dialect.patterns().started.is_match(&content))
    }

    fn is_server_stopping_line(&self, raw: &str) -> bool {
        self.server_content(raw)
            .is_some_and(|content| self.dialect.patterns().stopping.is_match(&content))
    }

    fn player_joined(&self, raw: &str) -> Option<String> {
        let content = self.server_content(raw)?;
        dialect::capture_name(&self.dialect.patterns().joined, &content)
    }

    fn player_left(&self, raw: &str) -> Option<String> {
        let content = self.server_content(raw)?;
        dialect::capture_name(&self.dialect.patterns().left, &content)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("vanilla".parse::<Dialect>().unwrap(), Dialect::Vanilla);
        assert_eq!("BungeeCord".parse::<Dialect>().unwrap(), Dialect::BungeeCord);
        assert!("spigot".parse::<Dialect>().is_err());
        for dialect in Dialect::ALL {
            assert_eq!(dialect.to_string().parse::<Dialect>().unwrap(), dialect);
        }
    }

    #[test]
    fn test_vanilla_chat_line() {
        let c = Dialect::Vanilla.classifier();
        let fields = c
            .classify("[12:00:01] [Server thread/INFO]: <Steve> hello world")
            .unwrap();
        assert_eq!(fields.timestamp, NaiveTime::from_hms_opt(12, 0, 1));
        assert_eq!(fields.logger.as_deref(), Some("Server thread"));
        assert_eq!(fields.level.as_deref(), Some("INFO"));
        assert_eq!(fields.player.as_deref(), Some("Steve"));
        assert_eq!(fields.content.as_deref(), Some("hello world"));
    }

    #[test]
    fn test_bracketed_text_is_not_chat() {
        let c = Dialect::Vanilla.classifier();
        for body in [
            "<some bracketed text> rest",
            "<Al> too short",
            "<ThisNameIsWayTooLong> hi",
        ] {
            let line = format!("[12:00:01] [Server thread/INFO]: {body}");
            let fields = c.classify(&line).unwrap();
            assert_eq!(fields.player, None, "{body}");
            assert_eq!(fields.content.as_deref(), Some(body));
        }

        let fields = c.classify("[12:00:01] [Server thread/INFO]: <Alex_2> ").unwrap();
        assert_eq!(fields.player.as_deref(), Some("Alex_2"));
        assert_eq!(fields.content.as_deref(), Some(""));
    }

    #[test]
    fn test_vanilla_server_line() {
        let c = Dialect::Vanilla.classifier();
        let fields = c
            .classify("[12:00:01] [Server thread/WARN]: Can't keep up!")
            .unwrap();
        assert_eq!(fields.player, None);
        assert_eq!(fields.content.as_deref(), Some("Can't keep up!"));
        assert!(c.classify("garbage line").is_none());
    }

    #[test]
    fn test_classify_is_pure() {
        let c = Dialect::Forge.classifier();
        let line = "[14Jul2021 12:00:00.123] [Server thread/INFO] [minecraft/DedicatedServer]: Starting";
        assert_eq!(c.classify(line), c.classify(line));
        let fields = c.classify(line).unwrap();
        assert_eq!(fields.logger.as_deref(), Some("minecraft/DedicatedServer"));
        assert_eq!(fields.content.as_deref(), Some("Starting"));
    }

    #[test]
    fn test_vanilla_lifecycle_markers() {
        let c = Dialect::Vanilla.classifier();
        assert!(c.is_server_started_line(
            r#"[12:00:05] [Server thread/INFO]: Done (3.512s)! For help, type "help""#
        ));
        assert!(c.is_server_stopping_line("[12:10:00] [Server thread/INFO]: Stopping server"));
        // A player typing the marker is not the server saying it.
        assert!(!c.is_server_stopping_line("[12:10:00] [Server thread/INFO]: <Alex> Stopping server"));
    }

    #[test]
    fn test_vanilla_player_presence() {
        let c = Dialect::Vanilla.classifier();
        assert_eq!(
            c.player_joined("[12:00:09] [Server thread/INFO]: Steve joined the game"),
            Some("Steve".to_string())
        );
        assert_eq!(
            c.player_left("[12:00:10] [Server thread/INFO]: Steve left the game"),
            Some("Steve".to_string())
        );
        assert_eq!(c.player_joined("[12:00:10] [Server thread/INFO]: Steve left the game"), None);
    }

    #[test]
    fn test_bukkit_line() {
        let c = Dialect::Bukkit.classifier();
        let fields = c.classify("[09:15:30 INFO]: <Notch> hi").unwrap();
        assert_eq!(fields.player.as_deref(), Some("Notch"));
        assert_eq!(fields.logger, None);
        assert!(c.is_server_started_line(r#"[09:15:30 INFO]: Done (10.2s)! For help, type "help""#));
    }

    #[test]
    fn test_bungeecord_markers() {
        let c = Dialect::BungeeCord.classifier();
        assert!(c.is_server_started_line("08:00:00 [INFO] Listening on /0.0.0.0:25577"));
        assert!(c.is_server_stopping_line("08:30:00 [INFO] Closing listener [id: 0x1, L:/0.0.0.0:25577]"));
        assert_eq!(
            c.player_joined("08:01:00 [INFO] [Steve,/127.0.0.1:50000] <-> InitialHandler has connected"),
            Some("Steve".to_string())
        );
        assert_eq!(
            c.player_left("08:02:00 [INFO] [Steve] -> UpstreamBridge has disconnected"),
            Some("Steve".to_string())
        );
    }

    #[test]
    fn test_velocity_markers() {
        let c = Dialect::Velocity.classifier();
        assert!(c.is_server_started_line("[08:00:00 INFO]: Done (1.23s)!"));
        assert!(c.is_server_stopping_line("[08:30:00 INFO]: Shutting down the proxy..."));
        assert_eq!(
            c.player_joined("[08:01:00 INFO]: [connected player] Steve (/127.0.0.1:50000) has connected"),
            Some("Steve".to_string())
        );
    }
}
