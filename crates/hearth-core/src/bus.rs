//! The event bus: listener registry and dispatcher.
//!
//! Listeners are keyed by [`EventKind`] and owned by a plugin id. For one
//! event, listeners run in ascending priority and, within a priority, in
//! registration order.
//!
//! # Dispatch modes
//!
//! - [`DispatchMode::Blocking`]: the publisher waits for every listener. Each
//!   invocation runs as its own task under a watchdog, closure body included;
//!   a listener that fails, panics or hangs is recorded in the
//!   [`DispatchReport`] and delivery moves on to the next one.
//! - [`DispatchMode::Detached`]: the chain runs on a background task and the
//!   publisher returns at once. At most `detached_concurrency` detached chains
//!   run at the same time.
//!
//! ```text
//!  publish(kind, event) ──▶ snapshot listeners ──▶ for each (priority, seq):
//!                                                   cancelled? ─▶ stop
//!                                                   active?    ─▶ spawn + watchdog
//! ```
//!
//! A listener removed while a dispatch is in flight is skipped: its active
//! flag is checked right before it would be invoked.

use std::collections::HashMap;
use std::fmt;
use std::panic::resume_unwind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{Instrument, Level, debug, span, warn};

use crate::error::{BoxError, ListenerError, panic_message};
use crate::event::{BoxedEvent, Event, EventKind};
use crate::info::Info;

/// Priority given to listeners that do not ask for one. Lower runs first.
pub const DEFAULT_LISTENER_PRIORITY: i32 = 1000;

/// Default watchdog for one blocking listener invocation.
pub const DEFAULT_LISTENER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of detached dispatches that may run at once.
pub const DEFAULT_DETACHED_CONCURRENCY: usize = 4;

/// Callback invoked for each delivered event.
pub type ListenerFn =
    Arc<dyn Fn(EventContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

// =============================================================================
// Event Context
// =============================================================================

/// What a listener receives: the event, its kind and the listener's owner.
///
/// Cloning is cheap; the payload is shared, never copied.
#[derive(Clone)]
pub struct EventContext {
    kind: EventKind,
    event: BoxedEvent,
    plugin: Arc<str>,
}

impl EventContext {
    pub fn new(kind: EventKind, event: BoxedEvent, plugin: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            event,
            plugin: plugin.into(),
        }
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn event(&self) -> &BoxedEvent {
        &self.event
    }

    /// Id of the plugin owning the listener being invoked.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Views the payload as a concrete type.
    pub fn downcast<T: Event>(&self) -> Option<&T> {
        self.event.downcast_ref::<T>()
    }

    /// Shortcut for info events.
    pub fn info(&self) -> Option<&Info> {
        self.downcast::<Info>()
    }
}

impl fmt::Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("kind", &self.kind)
            .field("plugin", &self.plugin)
            .field("event", &self.event)
            .finish()
    }
}

// =============================================================================
// Listeners
// =============================================================================

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct EventListener {
    id: ListenerId,
    plugin: Arc<str>,
    priority: i32,
    callback: ListenerFn,
    active: AtomicBool,
}

impl EventListener {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// How [`EventBus::publish`] delivers an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Wait for every listener.
    #[default]
    Blocking,
    /// Run the chain in the background.
    Detached,
}

/// Outcome of one blocking dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Listeners that completed successfully, in invocation order.
    pub delivered: Vec<ListenerId>,
    /// Listeners that failed, panicked or timed out.
    pub failures: Vec<ListenerError>,
    /// Delivery stopped because the event was cancelled.
    pub cancelled: bool,
    /// The dispatch was detached; nothing was awaited.
    pub detached: bool,
}

impl DispatchReport {
    fn detached() -> Self {
        Self {
            detached: true,
            ..Default::default()
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &ListenerError> {
        self.failures.iter().filter(|e| !e.is_timeout())
    }

    pub fn timed_out(&self) -> impl Iterator<Item = &ListenerError> {
        self.failures.iter().filter(|e| e.is_timeout())
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Thread-safe listener registry and dispatcher.
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<Arc<EventListener>>>>,
    next_id: AtomicU64,
    timeout: Duration,
    detached: Arc<Semaphore>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_LISTENER_TIMEOUT, DEFAULT_DETACHED_CONCURRENCY)
    }
}

impl EventBus {
    /// Creates a bus with the given watchdog and detached concurrency limit.
    pub fn new(listener_timeout: Duration, detached_concurrency: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout: listener_timeout,
            detached: Arc::new(Semaphore::new(detached_concurrency.max(1))),
        }
    }

    pub fn listener_timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers a listener.
    pub fn subscribe<F>(
        &self,
        plugin: &str,
        kind: EventKind,
        priority: i32,
        callback: F,
    ) -> ListenerId
    where
        F: Fn(EventContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync + 'static,
    {
        self.subscribe_arc(plugin, kind, priority, Arc::new(callback))
    }

    /// Registers an already shared callback.
    pub fn subscribe_arc(
        &self,
        plugin: &str,
        kind: EventKind,
        priority: i32,
        callback: ListenerFn,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener = Arc::new(EventListener {
            id,
            plugin: Arc::from(plugin),
            priority,
            callback,
            active: AtomicBool::new(true),
        });

        let mut listeners = self.listeners.write();
        let list = listeners.entry(kind.clone()).or_default();
        // Ids grow monotonically, so inserting after equal priorities keeps
        // registration order.
        let pos = list.partition_point(|l| l.priority <= priority);
        list.insert(pos, listener);

        debug!(plugin, kind = %kind, priority, listener = %id, "Listener subscribed");
        id
    }

    /// Removes one listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let mut found = false;
        for list in listeners.values_mut() {
            list.retain(|l| {
                if l.id == id {
                    l.deactivate();
                    found = true;
                    false
                } else {
                    true
                }
            });
        }
        listeners.retain(|_, list| !list.is_empty());
        found
    }

    /// Removes every listener owned by `plugin` and returns how many there were.
    pub fn unsubscribe_all(&self, plugin: &str) -> usize {
        let mut listeners = self.listeners.write();
        let mut removed = 0;
        for list in listeners.values_mut() {
            list.retain(|l| {
                if &*l.plugin == plugin {
                    l.deactivate();
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        listeners.retain(|_, list| !list.is_empty());
        if removed > 0 {
            debug!(plugin, removed, "Listeners unsubscribed");
        }
        removed
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.listeners.read().get(kind).map_or(0, Vec::len)
    }

    /// Number of listeners owned by `plugin`, across all kinds.
    pub fn plugin_listener_count(&self, plugin: &str) -> usize {
        self.listeners
            .read()
            .values()
            .flatten()
            .filter(|l| &*l.plugin == plugin)
            .count()
    }

    fn snapshot(&self, kind: &EventKind) -> Vec<Arc<EventListener>> {
        self.listeners.read().get(kind).cloned().unwrap_or_default()
    }

    /// Publishes an event to every listener of `kind`.
    ///
    /// In [`DispatchMode::Detached`] the returned report is empty and only
    /// flags the dispatch as detached.
    pub async fn publish(
        &self,
        kind: &EventKind,
        event: BoxedEvent,
        mode: DispatchMode,
    ) -> DispatchReport {
        let listeners = self.snapshot(kind);
        if listeners.is_empty() {
            return match mode {
                DispatchMode::Blocking => DispatchReport::default(),
                DispatchMode::Detached => DispatchReport::detached(),
            };
        }

        let span = span!(Level::DEBUG, "dispatch", kind = %kind, listeners = listeners.len());
        match mode {
            DispatchMode::Blocking => {
                run_chain(kind.clone(), event, listeners, self.timeout)
                    .instrument(span)
                    .await
            }
            DispatchMode::Detached => {
                let semaphore = self.detached.clone();
                let kind = kind.clone();
                let timeout = self.timeout;
                tokio::spawn(
                    async move {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return;
                        };
                        run_chain(kind, event, listeners, timeout).await;
                    }
                    .instrument(span),
                );
                DispatchReport::detached()
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("EventBus")
            .field("kinds", &listeners.len())
            .field("listeners", &listeners.values().map(Vec::len).sum::<usize>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

async fn run_chain(
    kind: EventKind,
    event: BoxedEvent,
    listeners: Vec<Arc<EventListener>>,
    timeout: Duration,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for listener in listeners {
        if event.is_cancelled() {
            debug!(kind = %kind, "Event cancelled, stopping delivery");
            report.cancelled = true;
            break;
        }
        if !listener.is_active() {
            continue;
        }

        match invoke(&kind, &event, &listener, timeout).await {
            Ok(()) => report.delivered.push(listener.id),
            Err(err) => {
                warn!(listener = %listener.id, "{err}");
                report.failures.push(err);
            }
        }
    }

    report
}

async fn invoke(
    kind: &EventKind,
    event: &BoxedEvent,
    listener: &EventListener,
    timeout: Duration,
) -> Result<(), ListenerError> {
    let failed = |reason: String| ListenerError::Failed {
        plugin: listener.plugin.to_string(),
        kind: kind.to_string(),
        reason,
    };

    let ctx = EventContext {
        kind: kind.clone(),
        event: event.clone(),
        plugin: listener.plugin.clone(),
    };
    // The closure body may block its thread before it hands back a future,
    // so it runs on the blocking pool and the watchdog covers both halves.
    let callback = listener.callback.clone();
    let handle = tokio::spawn(async move {
        let future = match tokio::task::spawn_blocking(move || callback(ctx)).await {
            Ok(future) => future,
            Err(join) if join.is_panic() => resume_unwind(join.into_panic()),
            Err(join) => return Err(BoxError::from(join)),
        };
        future.await
    });
    let abort = handle.abort_handle();
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(failed(e.to_string())),
        Ok(Err(join)) if join.is_panic() => Err(failed(panic_message(&*join.into_panic()))),
        Ok(Err(join)) => Err(failed(join.to_string())),
        Err(_) => {
            abort.abort();
            Err(ListenerError::TimedOut {
                plugin: listener.plugin.to_string(),
                kind: kind.to_string(),
                timeout,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    use super::*;
    use crate::info::{InfoSource, ParsedFields};

    #[derive(Debug)]
    struct Ping;

    impl Event for Ping {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    const PING: EventKind = EventKind::from_static("test.ping");

    fn record(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> ListenerFn {
        let log = log.clone();
        Arc::new(move |_ctx: EventContext| -> BoxFuture<'static, Result<(), BoxError>> {
            log.lock().push(name);
            Box::pin(async { Ok(()) })
        })
    }

    async fn explode() -> Result<(), BoxError> {
        panic!("listener exploded")
    }

    fn info() -> Arc<Info> {
        Arc::new(Info::new(1, InfoSource::Console, "hi".into(), ParsedFields::default()))
    }

    #[tokio::test]
    async fn test_priority_then_registration_order() {
        let bus = EventBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe_arc("a", PING, DEFAULT_LISTENER_PRIORITY, record(&log, "default-1"));
        bus.subscribe_arc("b", PING, 10, record(&log, "early"));
        bus.subscribe_arc("c", PING, DEFAULT_LISTENER_PRIORITY, record(&log, "default-2"));
        bus.subscribe_arc("d", PING, 5000, record(&log, "late"));

        let report = bus.publish(&PING, BoxedEvent::new(Ping), DispatchMode::Blocking).await;
        assert_eq!(report.delivered.len(), 4);
        assert!(report.is_clean());
        assert_eq!(*log.lock(), vec!["early", "default-1", "default-2", "late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_and_hung_listeners_do_not_block_delivery() {
        let bus = EventBus::new(Duration::from_secs(1), 4);
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe("thrower", PING, 1, |_ctx| {
            Box::pin(async { Err::<(), BoxError>("nope".into()) })
        });
        bus.subscribe("panicker", PING, 2, |_ctx| Box::pin(explode()));
        bus.subscribe("hung", PING, 3, |_ctx| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        });
        let counter = count.clone();
        bus.subscribe("third", PING, 4, move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });

        let report = bus.publish(&PING, BoxedEvent::new(Ping), DispatchMode::Blocking).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.failed().count(), 2);
        assert_eq!(report.timed_out().count(), 1);
        assert_eq!(report.timed_out().next().unwrap().plugin(), "hung");
        assert!(
            report
                .failed()
                .any(|e| e.to_string().contains("listener exploded"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_listener_blocking_before_its_future_is_abandoned() {
        let bus = EventBus::new(Duration::from_millis(100), 4);
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("sleeper", PING, 1, |_ctx| {
            std::thread::sleep(Duration::from_secs(3));
            Box::pin(async { Ok(()) })
        });
        bus.subscribe_arc("next", PING, 2, record(&log, "next"));

        let started = std::time::Instant::now();
        let report = bus.publish(&PING, BoxedEvent::new(Ping), DispatchMode::Blocking).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.timed_out().count(), 1);
        assert_eq!(report.timed_out().next().unwrap().plugin(), "sleeper");
        assert_eq!(*log.lock(), vec!["next"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_later_listeners() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe("canceller", EventKind::USER_INFO, 1, |ctx| {
            if let Some(info) = ctx.info() {
                info.cancel();
            }
            Box::pin(async { Ok(()) })
        });
        let counter = count.clone();
        bus.subscribe("late", EventKind::USER_INFO, 2, move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });

        let info = info();
        let report = bus
            .publish(&EventKind::USER_INFO, info.clone().into(), DispatchMode::Blocking)
            .await;
        assert!(report.cancelled);
        assert!(info.is_cancelled());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_during_dispatch_is_skipped() {
        let bus = Arc::new(EventBus::default());
        let count = Arc::new(AtomicUsize::new(0));

        let handle = bus.clone();
        bus.subscribe("remover", PING, 1, move |_ctx| {
            handle.unsubscribe_all("victim");
            Box::pin(async { Ok(()) })
        });
        let counter = count.clone();
        bus.subscribe("victim", PING, 2, move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });

        bus.publish(&PING, BoxedEvent::new(Ping), DispatchMode::Blocking).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.plugin_listener_count("victim"), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_all_is_exact() {
        let bus = EventBus::default();
        let noop = |_ctx: EventContext| -> BoxFuture<'static, Result<(), BoxError>> {
            Box::pin(async { Ok(()) })
        };
        bus.subscribe("p", PING, 1, noop);
        bus.subscribe("p", EventKind::GENERAL_INFO, 1, noop);
        let kept = bus.subscribe("q", PING, 1, noop);

        assert_eq!(bus.unsubscribe_all("p"), 2);
        assert_eq!(bus.listener_count(&PING), 1);
        assert_eq!(bus.listener_count(&EventKind::GENERAL_INFO), 0);
        assert!(bus.unsubscribe(kept));
        assert!(!bus.unsubscribe(kept));
    }

    #[tokio::test]
    async fn test_detached_does_not_wait() {
        let bus = EventBus::default();
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        bus.subscribe("p", PING, 1, move |ctx| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(ctx.plugin().to_string());
                }
                Ok(())
            })
        });

        let report = bus.publish(&PING, BoxedEvent::new(Ping), DispatchMode::Detached).await;
        assert!(report.detached);
        assert!(report.delivered.is_empty());
        assert_eq!(rx.await.unwrap(), "p");
    }
}
