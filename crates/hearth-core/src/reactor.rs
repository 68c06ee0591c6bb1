//! The info reactor: raw lines in, [`Info`] and lifecycle events out.
//!
//! ```text
//!  raw line ──▶ classify ──▶ Info #n
//!                  │
//!                  ├─▶ started / stopping marker ──▶ SERVER_STARTUP / SERVER_STOPPING
//!                  └─▶ join / leave marker ───────▶ PLAYER_JOINED / PLAYER_LEFT
//! ```
//!
//! A [`Reaction`] lists the events in publish order: lifecycle first, then
//! player presence, then the content [`Info`] itself. Console and plugin
//! input is injected through the same reactor so every [`Info`] draws its id
//! from one counter.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{trace, warn};

use crate::classifier::{Dialect, TextClassifier};
use crate::event::{BoxedEvent, EventKind, LifecycleEvent, PlayerEvent, ServerPhase};
use crate::info::{Info, InfoSource, ParsedFields};

/// Everything the reactor derived from one server line.
#[derive(Debug, Clone)]
pub struct Reaction {
    /// Lifecycle and presence events, to be published before the info.
    pub events: Vec<(EventKind, BoxedEvent)>,
    /// The content info.
    pub info: Arc<Info>,
}

#[derive(Default)]
struct Detection {
    fields: Option<ParsedFields>,
    started: bool,
    stopping: bool,
    joined: Option<String>,
    left: Option<String>,
}

/// Converts raw lines into [`Info`] records and tracks the server phase.
pub struct InfoReactor {
    classifier: RwLock<Arc<dyn TextClassifier>>,
    next_id: AtomicU64,
    phase: Mutex<ServerPhase>,
}

impl InfoReactor {
    pub fn new(classifier: Arc<dyn TextClassifier>) -> Self {
        Self {
            classifier: RwLock::new(classifier),
            next_id: AtomicU64::new(1),
            phase: Mutex::new(ServerPhase::Stopped),
        }
    }

    /// Creates a reactor using a built-in dialect.
    pub fn with_dialect(dialect: Dialect) -> Self {
        Self::new(Arc::new(dialect.classifier()))
    }

    /// Swaps the active classifier. Sequence ids are unaffected.
    pub fn set_classifier(&self, classifier: Arc<dyn TextClassifier>) {
        *self.classifier.write() = classifier;
    }

    pub fn classifier_name(&self) -> String {
        self.classifier.read().name().to_string()
    }

    /// The currently tracked server phase.
    pub fn phase(&self) -> ServerPhase {
        *self.phase.lock()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns `true` if the phase changed.
    fn transition(&self, to: ServerPhase) -> bool {
        let mut phase = self.phase.lock();
        if *phase == to {
            return false;
        }
        *phase = to;
        true
    }

    fn detect(&self, raw: &str) -> Detection {
        let classifier = self.classifier.read().clone();
        let result = catch_unwind(AssertUnwindSafe(|| Detection {
            fields: classifier.classify(raw),
            started: classifier.is_server_started_line(raw),
            stopping: classifier.is_server_stopping_line(raw),
            joined: classifier.player_joined(raw),
            left: classifier.player_left(raw),
        }));
        match result {
            Ok(detection) => detection,
            Err(_) => {
                warn!(
                    classifier = classifier.name(),
                    line = raw,
                    "Classifier panicked, falling back to a raw info"
                );
                Detection::default()
            }
        }
    }

    /// Reacts to one line of server output.
    pub fn react(&self, raw: &str) -> Reaction {
        let detection = self.detect(raw);
        let info = Arc::new(Info::new(
            self.next_id(),
            InfoSource::Server,
            raw.to_string(),
            detection.fields.unwrap_or_default(),
        ));

        let mut events = Vec::new();
        if detection.started && self.transition(ServerPhase::Started) {
            events.push(lifecycle(EventKind::SERVER_STARTUP, ServerPhase::Started, &info));
        } else if detection.stopping && self.transition(ServerPhase::Stopping) {
            events.push(lifecycle(EventKind::SERVER_STOPPING, ServerPhase::Stopping, &info));
        }
        if let Some(player) = detection.joined {
            events.push(presence(EventKind::PLAYER_JOINED, player, &info));
        }
        if let Some(player) = detection.left {
            events.push(presence(EventKind::PLAYER_LEFT, player, &info));
        }

        trace!(id = info.id(), events = events.len(), "Reacted to server line");
        Reaction { events, info }
    }

    /// Creates an info for a line typed into the console.
    pub fn inject_console(&self, line: &str) -> Arc<Info> {
        self.inject(InfoSource::Console, line)
    }

    /// Creates an info for a line injected by a plugin.
    pub fn inject_plugin(&self, line: &str) -> Arc<Info> {
        self.inject(InfoSource::Plugin, line)
    }

    fn inject(&self, source: InfoSource, line: &str) -> Arc<Info> {
        let fields = ParsedFields {
            content: Some(line.to_string()),
            ..Default::default()
        };
        Arc::new(Info::new(self.next_id(), source, line.to_string(), fields))
    }

    /// Records that the server process was spawned.
    pub fn process_started(&self) -> LifecycleEvent {
        self.transition(ServerPhase::Starting);
        LifecycleEvent {
            phase: ServerPhase::Starting,
            trigger: None,
            exit_code: None,
        }
    }

    /// Records that the server process exited.
    pub fn process_exited(&self, exit_code: Option<i32>) -> LifecycleEvent {
        self.transition(ServerPhase::Stopped);
        LifecycleEvent {
            phase: ServerPhase::Stopped,
            trigger: None,
            exit_code,
        }
    }
}

fn lifecycle(kind: EventKind, phase: ServerPhase, info: &Arc<Info>) -> (EventKind, BoxedEvent) {
    let event = LifecycleEvent {
        phase,
        trigger: Some(info.clone()),
        exit_code: None,
    };
    (kind, BoxedEvent::new(event))
}

fn presence(kind: EventKind, player: String, info: &Arc<Info>) -> (EventKind, BoxedEvent) {
    let event = PlayerEvent {
        player,
        info: info.clone(),
    };
    (kind, BoxedEvent::new(event))
}

impl std::fmt::Debug for InfoReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfoReactor")
            .field("classifier", &self.classifier_name())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panicking;

    impl TextClassifier for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn classify(&self, _raw: &str) -> Option<ParsedFields> {
            panic!("boom")
        }

        fn is_server_started_line(&self, _raw: &str) -> bool {
            false
        }

        fn is_server_stopping_line(&self, _raw: &str) -> bool {
            false
        }
    }

    const DONE: &str = r#"[12:00:05] [Server thread/INFO]: Done (3.512s)! For help, type "help""#;

    #[test]
    fn test_unparsed_line_is_kept() {
        let reactor = InfoReactor::with_dialect(Dialect::Vanilla);
        let reaction = reactor.react("Loading libraries, please wait...");
        assert!(reaction.events.is_empty());
        assert_eq!(reaction.info.raw(), "Loading libraries, please wait...");
        assert_eq!(reaction.info.fields(), &ParsedFields::default());
    }

    #[test]
    fn test_lifecycle_event_precedes_info() {
        let reactor = InfoReactor::with_dialect(Dialect::Vanilla);
        reactor.process_started();
        assert_eq!(reactor.phase(), ServerPhase::Starting);

        let reaction = reactor.react(DONE);
        assert_eq!(reaction.events.len(), 1);
        let (kind, event) = &reaction.events[0];
        assert_eq!(kind, &EventKind::SERVER_STARTUP);
        let lifecycle = event.downcast_ref::<LifecycleEvent>().unwrap();
        assert_eq!(lifecycle.trigger.as_ref().map(|i| i.id()), Some(reaction.info.id()));
        assert_eq!(reactor.phase(), ServerPhase::Started);

        // A repeated marker does not re-emit.
        assert!(reactor.react(DONE).events.is_empty());
    }

    #[test]
    fn test_player_presence_events() {
        let reactor = InfoReactor::with_dialect(Dialect::Vanilla);
        let reaction = reactor.react("[12:00:09] [Server thread/INFO]: Steve joined the game");
        assert_eq!(reaction.events.len(), 1);
        assert_eq!(reaction.events[0].0, EventKind::PLAYER_JOINED);
        let event = reaction.events[0].1.downcast_ref::<PlayerEvent>().unwrap();
        assert_eq!(event.player, "Steve");
    }

    #[test]
    fn test_classifier_panic_degrades_to_raw() {
        let reactor = InfoReactor::new(Arc::new(Panicking));
        let reaction = reactor.react(DONE);
        assert!(reaction.events.is_empty());
        assert_eq!(reaction.info.raw(), DONE);
        assert!(reaction.info.player().is_none());
    }

    #[test]
    fn test_ids_increase_across_swaps_and_injection() {
        let reactor = InfoReactor::with_dialect(Dialect::Vanilla);
        let a = reactor.react("one").info.id();
        reactor.set_classifier(Arc::new(Dialect::Bukkit.classifier()));
        let b = reactor.inject_console("list").id();
        let c = reactor.inject_plugin("say hi").id();
        let d = reactor.react("two").info.id();
        assert!(a < b && b < c && c < d);
        assert_eq!(reactor.classifier_name(), "bukkit");
    }

    #[test]
    fn test_process_exit_resets_phase() {
        let reactor = InfoReactor::with_dialect(Dialect::Vanilla);
        reactor.process_started();
        reactor.react(DONE);
        let event = reactor.process_exited(Some(0));
        assert_eq!(event.exit_code, Some(0));
        assert_eq!(reactor.phase(), ServerPhase::Stopped);
    }
}
