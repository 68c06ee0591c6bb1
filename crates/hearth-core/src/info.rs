//! The [`Info`] record: one line of server output or injected input.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Where an [`Info`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoSource {
    /// A line printed by the server process.
    Server,
    /// A line typed into the supervisor's console.
    Console,
    /// A line injected by a plugin.
    Plugin,
}

impl fmt::Display for InfoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Server => "server",
            Self::Console => "console",
            Self::Plugin => "plugin",
        })
    }
}

/// Fields a text classifier extracted from a line.
///
/// Every field is optional; which ones are populated depends on the dialect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFields {
    /// Wall-clock time printed by the server.
    pub timestamp: Option<NaiveTime>,
    /// Logger level (`INFO`, `WARN`, ...).
    pub level: Option<String>,
    /// Thread or logger name.
    pub logger: Option<String>,
    /// Player who sent a chat line.
    pub player: Option<String>,
    /// Message body with the log prefix removed.
    pub content: Option<String>,
}

/// Structured representation of one output line or one injected line.
///
/// An `Info` is immutable except for its cancelled flag, which flips from
/// `false` to `true` at most once. Infos are shared as `Arc<Info>` so a
/// cancellation made by one listener is seen by every later listener and by
/// the process bridge.
pub struct Info {
    id: u64,
    source: InfoSource,
    raw: String,
    fields: ParsedFields,
    cancelled: AtomicBool,
}

impl Info {
    pub(crate) fn new(id: u64, source: InfoSource, raw: String, fields: ParsedFields) -> Self {
        Self {
            id,
            source,
            raw,
            fields,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Sequence id, strictly increasing per reactor.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> InfoSource {
        self.source
    }

    /// The line exactly as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn fields(&self) -> &ParsedFields {
        &self.fields
    }

    /// The message body, or the raw line when nothing was parsed.
    pub fn content(&self) -> &str {
        self.fields.content.as_deref().unwrap_or(&self.raw)
    }

    pub fn player(&self) -> Option<&str> {
        self.fields.player.as_deref()
    }

    pub fn timestamp(&self) -> Option<NaiveTime> {
        self.fields.timestamp
    }

    pub fn level(&self) -> Option<&str> {
        self.fields.level.as_deref()
    }

    pub fn logger(&self) -> Option<&str> {
        self.fields.logger.as_deref()
    }

    pub fn is_from_server(&self) -> bool {
        self.source == InfoSource::Server
    }

    pub fn is_from_console(&self) -> bool {
        self.source == InfoSource::Console
    }

    pub fn is_from_plugin(&self) -> bool {
        self.source == InfoSource::Plugin
    }

    /// Chat line sent by a player.
    pub fn is_player(&self) -> bool {
        self.is_from_server() && self.fields.player.is_some()
    }

    /// Input typed by a human: player chat or console input.
    pub fn is_user(&self) -> bool {
        self.is_from_console() || self.is_player()
    }

    /// Cancels this info.
    ///
    /// Returns `true` if this call performed the cancellation and `false` if
    /// the info was already cancelled.
    pub fn cancel(&self) -> bool {
        self.cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Event for Info {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_cancelled(&self) -> bool {
        Info::is_cancelled(self)
    }
}

impl fmt::Debug for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Info")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("raw", &self.raw)
            .field("player", &self.fields.player)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(player: Option<&str>) -> Info {
        Info::new(
            1,
            InfoSource::Server,
            "[12:00:00] [Server thread/INFO]: <Steve> hi".to_string(),
            ParsedFields {
                player: player.map(str::to_string),
                content: Some("hi".to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_cancel_only_once() {
        let info = chat(Some("Steve"));
        assert!(!info.is_cancelled());
        assert!(info.cancel());
        assert!(!info.cancel());
        assert!(info.is_cancelled());
    }

    #[test]
    fn test_content_falls_back_to_raw() {
        let info = Info::new(2, InfoSource::Server, "garbage".into(), ParsedFields::default());
        assert_eq!(info.content(), "garbage");
        assert_eq!(chat(None).content(), "hi");
    }

    #[test]
    fn test_user_classification() {
        assert!(chat(Some("Steve")).is_user());
        assert!(!chat(None).is_user());

        let console = Info::new(3, InfoSource::Console, "list".into(), ParsedFields::default());
        assert!(console.is_user());
        assert!(!console.is_player());

        let plugin = Info::new(4, InfoSource::Plugin, "say hi".into(), ParsedFields::default());
        assert!(!plugin.is_user());
    }
}
