//! Regex pattern sets for the built-in dialects.
//!
//! Line patterns use named groups: `time`, `thread`, `logger`, `level` and
//! `body`. Chat, lifecycle and presence patterns are matched against the
//! body, never against the raw line.

use std::sync::LazyLock;

use chrono::NaiveTime;
use regex::Regex;

use crate::info::ParsedFields;

pub(super) struct PatternSet {
    line: Regex,
    chat: Option<Regex>,
    pub(super) started: Regex,
    pub(super) stopping: Regex,
    pub(super) joined: Regex,
    pub(super) left: Regex,
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in dialect regex")
}

/// Player names are what the game accepts: 3 to 16 word characters.
const CHAT: &str = r"^<(?P<player>[A-Za-z0-9_]{3,16})> (?P<message>.*)$";
const DONE_WITH_HELP: &str = r#"^Done \([0-9.]+s\)! For help, type "help""#;
const STOPPING_SERVER: &str = r"^Stopping (the )?server";
const JOINED_THE_GAME: &str = r"^(?P<name>\w{1,16}) joined the game$";
const LEFT_THE_GAME: &str = r"^(?P<name>\w{1,16}) left the game$";

pub(super) static VANILLA: LazyLock<PatternSet> = LazyLock::new(|| PatternSet {
    line: re(
        r"^\[(?P<time>\d{2}:\d{2}:\d{2})\] \[(?P<thread>.+?)/(?P<level>[A-Z]+)\]: (?P<body>.*)$",
    ),
    chat: Some(re(CHAT)),
    started: re(DONE_WITH_HELP),
    stopping: re(STOPPING_SERVER),
    joined: re(JOINED_THE_GAME),
    left: re(LEFT_THE_GAME),
});

pub(super) static BUKKIT: LazyLock<PatternSet> = LazyLock::new(|| PatternSet {
    line: re(r"^\[(?P<time>\d{2}:\d{2}:\d{2}) (?P<level>[A-Z]+)\]: (?P<body>.*)$"),
    chat: Some(re(CHAT)),
    started: re(DONE_WITH_HELP),
    stopping: re(STOPPING_SERVER),
    joined: re(JOINED_THE_GAME),
    left: re(LEFT_THE_GAME),
});

pub(super) static FORGE: LazyLock<PatternSet> = LazyLock::new(|| PatternSet {
    line: re(concat!(
        r"^\[(?:\d{2}[A-Za-z]{3}\d{4} )?(?P<time>\d{2}:\d{2}:\d{2}(?:\.\d{3})?)\] ",
        r"\[(?P<thread>.+?)/(?P<level>[A-Z]+)\] \[(?P<logger>[^\]]+)\]: (?P<body>.*)$",
    )),
    chat: Some(re(CHAT)),
    started: re(DONE_WITH_HELP),
    stopping: re(STOPPING_SERVER),
    joined: re(JOINED_THE_GAME),
    left: re(LEFT_THE_GAME),
});

pub(super) static BUNGEECORD: LazyLock<PatternSet> = LazyLock::new(|| PatternSet {
    line: re(r"^(?P<time>\d{2}:\d{2}:\d{2}) \[(?P<level>[A-Z]+)\] (?P<body>.*)$"),
    chat: None,
    started: re(r"^Listening on /"),
    stopping: re(r"^Closing listener"),
    joined: re(r"^\[(?P<name>\w{1,16})(?:,/[^\]]*)?\] <-> InitialHandler has connected$"),
    left: re(r"^\[(?P<name>\w{1,16})\] -> UpstreamBridge has disconnected$"),
});

pub(super) static VELOCITY: LazyLock<PatternSet> = LazyLock::new(|| PatternSet {
    line: re(r"^\[(?P<time>\d{2}:\d{2}:\d{2}) (?P<level>[A-Z]+)\]: (?P<body>.*)$"),
    chat: None,
    started: re(r"^Done \([0-9.]+s\)!"),
    stopping: re(r"^Shutting down the proxy"),
    joined: re(r"^\[connected player\] (?P<name>\w{1,16}) \(/[^)]*\) has connected$"),
    left: re(r"^\[connected player\] (?P<name>\w{1,16}) \(/[^)]*\) has disconnected$"),
});

impl PatternSet {
    pub(super) fn classify(&self, raw: &str) -> Option<ParsedFields> {
        let caps = self.line.captures(raw)?;
        let body = caps.name("body").map_or("", |m| m.as_str());
        let level = caps.name("level").map(|m| m.as_str().to_string());

        // Chat is only ever logged at INFO.
        let chat = self
            .chat
            .as_ref()
            .filter(|_| level.as_deref() == Some("INFO"))
            .and_then(|chat| chat.captures(body));
        let (player, content) = match chat {
            Some(c) => (
                c.name("player").map(|m| m.as_str().to_string()),
                c.name("message").map_or("", |m| m.as_str()).to_string(),
            ),
            None => (None, body.to_string()),
        };

        Some(ParsedFields {
            timestamp: caps
                .name("time")
                .and_then(|m| NaiveTime::parse_from_str(m.as_str(), "%H:%M:%S%.f").ok()),
            level,
            logger: caps
                .name("logger")
                .or_else(|| caps.name("thread"))
                .map(|m| m.as_str().to_string()),
            player,
            content: Some(content),
        })
    }
}

pub(super) fn capture_name(pattern: &Regex, content: &str) -> Option<String> {
    pattern
        .captures(content)
        .and_then(|c| c.name("name"))
        .map(|m| m.as_str().to_string())
}
