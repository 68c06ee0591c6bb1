//! Command sources: who invoked a command, at what level, and where replies go.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::info::Info;
use crate::permission::{PermissionLevel, PermissionResolver};

/// Identity of an invoker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// The supervisor's console.
    Console,
    /// A player, by name.
    Player(String),
    /// A plugin, by id.
    Plugin(String),
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Console => f.write_str("console"),
            SourceKind::Player(name) => write!(f, "player {name}"),
            SourceKind::Plugin(id) => write!(f, "plugin {id}"),
        }
    }
}

/// Delivers replies to the invoker: the console log, or a player's chat.
pub trait ReplySink: Send + Sync {
    fn reply(&self, source: &SourceKind, text: &str);
}

/// One command invocation's invoker.
///
/// The permission level is a snapshot taken at creation. Apart from the
/// reply buffer, which clones share, a source never changes.
#[derive(Clone)]
pub struct CommandSource {
    kind: SourceKind,
    level: PermissionLevel,
    info: Option<Arc<Info>>,
    sink: Option<Arc<dyn ReplySink>>,
    replies: Arc<Mutex<Vec<String>>>,
}

impl CommandSource {
    pub fn new(kind: SourceKind, level: PermissionLevel) -> Self {
        Self {
            kind,
            level,
            info: None,
            sink: None,
            replies: Arc::default(),
        }
    }

    /// Creates a source whose level is looked up now.
    pub fn resolve(kind: SourceKind, resolver: &dyn PermissionResolver) -> Self {
        let level = resolver.level_of(&kind);
        Self::new(kind, level)
    }

    /// Attaches the info this invocation came from.
    pub fn with_info(mut self, info: Arc<Info>) -> Self {
        self.info = Some(info);
        self
    }

    /// Routes replies to `sink` in addition to the buffer.
    pub fn with_sink(mut self, sink: Arc<dyn ReplySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn level(&self) -> PermissionLevel {
        self.level
    }

    pub fn has_permission(&self, level: PermissionLevel) -> bool {
        self.level >= level
    }

    pub fn is_console(&self) -> bool {
        matches!(self.kind, SourceKind::Console)
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, SourceKind::Player(_))
    }

    pub fn is_plugin(&self) -> bool {
        matches!(self.kind, SourceKind::Plugin(_))
    }

    pub fn player(&self) -> Option<&str> {
        match &self.kind {
            SourceKind::Player(name) => Some(name),
            _ => None,
        }
    }

    /// The info that carried this invocation, if any.
    pub fn info(&self) -> Option<&Arc<Info>> {
        self.info.as_ref()
    }

    /// Sends a reply and appends it to the reply buffer.
    pub fn reply(&self, text: impl Into<String>) {
        let text = text.into();
        if let Some(sink) = &self.sink {
            sink.reply(&self.kind, &text);
        }
        self.replies.lock().push(text);
    }

    /// Replies sent so far, in order.
    pub fn replies(&self) -> Vec<String> {
        self.replies.lock().clone()
    }
}

impl fmt::Debug for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSource")
            .field("kind", &self.kind)
            .field("level", &self.level)
            .field("replies", &self.replies.lock().len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}
