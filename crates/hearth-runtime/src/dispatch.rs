//! The queue between the reactor and the single dispatch task.
//!
//! ```text
//!  reader tasks ──lines──▶ reactor task ──Work──▶ [ bounded queue ] ──▶ dispatch task
//!  console thread ─────────────────────────Work──▶        │                 │
//!  plugin commands ────────────────────────Work──▶        │                 │
//!                                                         │        EventBus · CommandTree
//!                                                         └─ "queue full" warning, throttled
//! ```
//!
//! Everything that reaches listeners goes through one queue and one task, so
//! events are published in the order the lines were read.

use std::sync::Arc;
use std::time::Duration;

use hearth_core::{
    BoxedEvent, CommandSource, DispatchMode, EventKind, Info, ProcessError, Reaction, ReplySink,
    SourceKind,
};
use hearth_framework::tellraw;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, info, trace, warn};

use crate::server::HearthServer;

/// One unit of work for the dispatch task.
#[derive(Debug)]
pub(crate) enum Work {
    /// A classified server line.
    Output(Reaction),
    /// A line typed into the console or injected by the embedder.
    Console(Arc<Info>),
    /// Command text sent by a plugin.
    Plugin { plugin: String, info: Arc<Info> },
    /// A process lifecycle event.
    Lifecycle {
        kind: EventKind,
        event: BoxedEvent,
        /// The daemon shuts down once the event has been delivered.
        shutdown: bool,
    },
    /// Answered once everything queued before it has been dispatched.
    Barrier(oneshot::Sender<()>),
}

/// Sending side of the bounded dispatch queue.
///
/// A full queue makes the producer wait; nothing is dropped.
#[derive(Clone)]
pub(crate) struct WorkQueue {
    tx: mpsc::Sender<Work>,
    warn_interval: Duration,
    last_warning: Arc<Mutex<Option<Instant>>>,
}

impl WorkQueue {
    pub(crate) fn new(capacity: usize, warn_interval: Duration) -> (Self, mpsc::Receiver<Work>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            warn_interval,
            last_warning: Arc::default(),
        };
        (queue, rx)
    }

    /// Enqueues `work`, waiting while the queue is full.
    ///
    /// Returns `false` once the dispatch task is gone.
    pub(crate) async fn push(&self, work: Work) -> bool {
        match self.tx.try_send(work) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(work)) => {
                self.warn_full();
                self.tx.send(work).await.is_ok()
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueues `work` without waiting.
    ///
    /// On a full queue the work is handed to a task that waits for room, so
    /// code running on the dispatch task never waits on itself. Returns
    /// `false` once the dispatch task is gone.
    pub(crate) fn push_detached(&self, work: Work) -> bool {
        match self.tx.try_send(work) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(work)) => {
                self.warn_full();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(work).await;
                });
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Waits until everything queued so far has been dispatched.
    pub(crate) async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.push(Work::Barrier(tx)).await {
            let _ = rx.await;
        }
    }

    /// Logs the "queue full" warning at most once per interval.
    fn warn_full(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_warning.lock();
        if last.is_some_and(|at| now.duration_since(at) < self.warn_interval) {
            return false;
        }
        *last = Some(now);
        warn!(
            capacity = self.tx.max_capacity(),
            "Dispatch queue is full, server output is waiting for listeners"
        );
        true
    }
}

/// Delivers replies to their source.
///
/// Console replies are logged. Player replies become `tellraw` lines,
/// written in order by the reply writer task.
pub(crate) struct ServerReplySink {
    outbox: mpsc::UnboundedSender<String>,
}

impl ServerReplySink {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (Self { outbox }, rx)
    }
}

impl ReplySink for ServerReplySink {
    fn reply(&self, source: &SourceKind, text: &str) {
        match source {
            SourceKind::Console => info!(target: "hearth::console", "{text}"),
            SourceKind::Player(player) => {
                if self.outbox.send(tellraw(player, text)).is_err() {
                    debug!(player = %player, "Reply writer stopped, reply dropped");
                }
            }
            SourceKind::Plugin(plugin) => debug!(plugin = %plugin, reply = text, "Plugin reply"),
        }
    }
}

/// Writes queued replies to the server's stdin.
pub(crate) async fn write_replies(
    server: Arc<HearthServer>,
    mut outbox: mpsc::UnboundedReceiver<String>,
    stop: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = stop.cancelled() => break,
            line = outbox.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        if let Err(e) = server.bridge().write(&line).await {
            debug!(error = %e, "Reply not delivered");
        }
    }
}

/// The dispatch task.
pub(crate) async fn dispatch(
    server: Arc<HearthServer>,
    mut queue: mpsc::Receiver<Work>,
    stop: CancellationToken,
) {
    loop {
        let work = tokio::select! {
            _ = stop.cancelled() => break,
            work = queue.recv() => match work {
                Some(work) => work,
                None => break,
            },
        };
        match work {
            Work::Output(reaction) => {
                for (kind, event) in reaction.events {
                    server
                        .bus()
                        .publish(&kind, event, DispatchMode::Blocking)
                        .await;
                }
                handle_info(&server, reaction.info).await;
            }
            Work::Console(info) => handle_info(&server, info).await,
            Work::Plugin { plugin, info } => run_plugin_command(&server, plugin, info).await,
            Work::Lifecycle {
                kind,
                event,
                shutdown,
            } => {
                server
                    .bus()
                    .publish(&kind, event, DispatchMode::Blocking)
                    .await;
                if shutdown {
                    info!("Server exited, shutting down");
                    server.request_shutdown();
                }
            }
            Work::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Dispatch task stopped");
}

/// Publishes an info, then runs it as a command or forwards it to the server.
async fn handle_info(server: &HearthServer, info: Arc<Info>) {
    let span = debug_span!("info", id = info.id(), source = ?info.source());
    async {
        let bus = server.bus();
        bus.publish(
            &EventKind::GENERAL_INFO,
            info.clone().into(),
            DispatchMode::Blocking,
        )
        .await;
        if info.is_user() {
            bus.publish(
                &EventKind::USER_INFO,
                info.clone().into(),
                DispatchMode::Blocking,
            )
            .await;
        }

        if info.is_cancelled() {
            trace!("Info cancelled by a listener");
            return;
        }

        if info.is_user() && server.commands().is_command(info.content()) {
            let kind = match info.player() {
                Some(player) => SourceKind::Player(player.to_string()),
                None => SourceKind::Console,
            };
            let source = CommandSource::resolve(kind, server.permissions().as_ref())
                .with_info(info.clone())
                .with_sink(server.reply_sink());
            server.plugins().tree().execute(&source, info.content()).await;
        } else if info.is_from_console() {
            match server.bridge().forward(&info).await {
                Ok(_) => {}
                Err(ProcessError::NotRunning | ProcessError::StdinClosed) => {
                    warn!(line = info.raw(), "Server is not running, console input dropped");
                }
                Err(e) => warn!(error = %e, "Failed to forward console input"),
            }
        }
    }
    .instrument(span)
    .await
}

/// Runs command text sent by a plugin. No info events are published for it.
async fn run_plugin_command(server: &HearthServer, plugin: String, info: Arc<Info>) {
    let span = debug_span!("plugin_command", id = info.id(), plugin = %plugin);
    async {
        let source =
            CommandSource::resolve(SourceKind::Plugin(plugin), server.permissions().as_ref())
                .with_info(info.clone())
                .with_sink(server.reply_sink());
        server.plugins().tree().execute(&source, info.content()).await;
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use hearth_core::{Dialect, InfoReactor};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_waits_and_throttles_warnings() {
        let (queue, mut rx) = WorkQueue::new(1, Duration::from_secs(5));
        let reactor = InfoReactor::with_dialect(Dialect::Vanilla);
        let info = || Work::Console(reactor.inject_console("list"));

        assert!(queue.push(info()).await);
        assert!(queue.warn_full());
        assert!(!queue.warn_full());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(queue.warn_full());

        let producer = {
            let queue = queue.clone();
            let work = info();
            tokio::spawn(async move { queue.push(work).await })
        };
        tokio::task::yield_now().await;
        assert!(!producer.is_finished());

        assert!(matches!(rx.recv().await, Some(Work::Console(_))));
        assert!(producer.await.unwrap());
        assert!(matches!(rx.recv().await, Some(Work::Console(_))));

        drop(rx);
        assert!(!queue.push(info()).await);
    }

    #[tokio::test]
    async fn test_detached_push_never_waits() {
        let (queue, mut rx) = WorkQueue::new(1, Duration::from_secs(5));
        let reactor = InfoReactor::with_dialect(Dialect::Vanilla);
        let plugin = |text: &str| Work::Plugin {
            plugin: "tester".to_string(),
            info: reactor.inject_plugin(text),
        };

        assert!(queue.push_detached(plugin("!!first")));
        assert!(queue.push_detached(plugin("!!second")));

        for expected in ["!!first", "!!second"] {
            match rx.recv().await {
                Some(Work::Plugin { plugin, info }) => {
                    assert_eq!(plugin, "tester");
                    assert_eq!(info.content(), expected);
                    assert!(info.is_from_plugin());
                }
                other => panic!("unexpected work: {other:?}"),
            }
        }

        drop(rx);
        assert!(!queue.push_detached(plugin("!!late")));
    }

    #[test]
    fn test_player_replies_become_tellraw() {
        let (sink, mut outbox) = ServerReplySink::new();
        sink.reply(&SourceKind::Player("Steve".into()), "hi");
        sink.reply(&SourceKind::Console, "only logged");
        assert_eq!(outbox.try_recv().unwrap(), r#"tellraw Steve {"text":"hi"}"#);
        assert!(outbox.try_recv().is_err());
    }
}
