//! Synchronous typed publish/subscribe bus
//!
//! Delivery order for a single emit is: listeners registered with
//! [`EventBus::on`], then [`EventBus::once`] listeners (removed as a batch
//! before any of them runs), then wildcard listeners from
//! [`EventBus::on_any`]. Listener lists are snapshotted and the lock is
//! released before any callback runs, so listeners may freely subscribe,
//! unsubscribe or emit from inside a callback.

use crate::event::{EventPayload, EventType};
use mcp_runtime_core::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

type Listener = Arc<dyn Fn(&EventPayload) + Send + Sync>;
type OnceListener = Box<dyn FnOnce(&EventPayload) + Send>;

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Soft cap per event type; exceeding it only logs a warning
    pub max_listeners: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { max_listeners: 100 }
    }
}

struct Registered {
    id: u64,
    listener: Listener,
}

struct RegisteredOnce {
    id: u64,
    listener: OnceListener,
}

#[derive(Default)]
struct BusState {
    typed: HashMap<EventType, Vec<Registered>>,
    once: HashMap<EventType, Vec<RegisteredOnce>>,
    any: Vec<Registered>,
    paused: bool,
    flushing: bool,
    queue: VecDeque<EventPayload>,
}

impl BusState {
    fn count_for(&self, event_type: EventType) -> usize {
        self.typed.get(&event_type).map_or(0, Vec::len)
            + self.once.get(&event_type).map_or(0, Vec::len)
    }
}

struct Inner {
    config: EventBusConfig,
    state: Mutex<BusState>,
    next_id: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Typed(EventType),
    Once(EventType),
    Any,
}

impl Inner {
    fn remove(&self, slot: Slot, id: u64) {
        let mut state = self.state.lock();
        match slot {
            Slot::Typed(event_type) => {
                if let Some(list) = state.typed.get_mut(&event_type) {
                    list.retain(|entry| entry.id != id);
                    if list.is_empty() {
                        state.typed.remove(&event_type);
                    }
                }
            }
            Slot::Once(event_type) => {
                if let Some(list) = state.once.get_mut(&event_type) {
                    list.retain(|entry| entry.id != id);
                    if list.is_empty() {
                        state.once.remove(&event_type);
                    }
                }
            }
            Slot::Any => state.any.retain(|entry| entry.id != id),
        }
    }
}

/// Handle returned by every subscription call
pub struct Subscription {
    id: u64,
    slot: Slot,
    active: AtomicBool,
    bus: Weak<Inner>,
}

impl Subscription {
    /// Remove the listener. Calling this more than once is harmless.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.slot, self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Unsubscribes when dropped; keeps `wait_for` from leaking its listener
struct SubscriptionGuard(Subscription);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

/// Typed event bus shared by every runtime component
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(BusState::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    fn subscription(&self, id: u64, slot: Slot) -> Subscription {
        Subscription {
            id,
            slot,
            active: AtomicBool::new(true),
            bus: Arc::downgrade(&self.inner),
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn check_listener_cap(&self, label: &dyn std::fmt::Display, count: usize) {
        let max = self.inner.config.max_listeners;
        if count > max {
            warn!(
                "Event bus has {} listeners for {} (max {}); possible subscription leak",
                count, label, max
            );
        }
    }

    /// Subscribe to every event of `event_type`
    pub fn on<F>(&self, event_type: EventType, listener: F) -> Subscription
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let count = {
            let mut state = self.inner.state.lock();
            state.typed.entry(event_type).or_default().push(Registered {
                id,
                listener: Arc::new(listener),
            });
            state.count_for(event_type)
        };
        self.check_listener_cap(&event_type, count);
        self.subscription(id, Slot::Typed(event_type))
    }

    /// Subscribe to the next event of `event_type` only
    pub fn once<F>(&self, event_type: EventType, listener: F) -> Subscription
    where
        F: FnOnce(&EventPayload) + Send + 'static,
    {
        let id = self.next_id();
        let count = {
            let mut state = self.inner.state.lock();
            state.once.entry(event_type).or_default().push(RegisteredOnce {
                id,
                listener: Box::new(listener),
            });
            state.count_for(event_type)
        };
        self.check_listener_cap(&event_type, count);
        self.subscription(id, Slot::Once(event_type))
    }

    /// Subscribe to every event regardless of type
    pub fn on_any<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let count = {
            let mut state = self.inner.state.lock();
            state.any.push(Registered {
                id,
                listener: Arc::new(listener),
            });
            state.any.len()
        };
        self.check_listener_cap(&"wildcard subscribers", count);
        self.subscription(id, Slot::Any)
    }

    /// Deliver `event` to listeners, or queue it while the bus is paused
    pub fn emit(&self, event: EventPayload) {
        {
            let mut state = self.inner.state.lock();
            if state.paused || state.flushing {
                state.queue.push_back(event);
                return;
            }
        }
        self.dispatch(&event);
    }

    fn dispatch(&self, event: &EventPayload) {
        let event_type = event.event_type();
        let (typed, once, any) = {
            let mut state = self.inner.state.lock();
            let typed: Vec<Listener> = state
                .typed
                .get(&event_type)
                .map(|list| list.iter().map(|entry| entry.listener.clone()).collect())
                .unwrap_or_default();
            let once = state.once.remove(&event_type).unwrap_or_default();
            let any: Vec<Listener> = state
                .any
                .iter()
                .map(|entry| entry.listener.clone())
                .collect();
            (typed, once, any)
        };

        for listener in typed {
            invoke(event_type, || listener(event));
        }
        for entry in once {
            let listener = entry.listener;
            invoke(event_type, move || listener(event));
        }
        for listener in any {
            invoke(event_type, || listener(event));
        }
    }

    /// Queue emitted events until [`resume`](Self::resume)
    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if !state.paused {
            debug!("Event bus paused");
            state.paused = true;
        }
    }

    /// Flush queued events in arrival order and resume direct delivery
    pub fn resume(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.paused {
                return;
            }
            state.paused = false;
            if state.flushing {
                // An outer resume is already draining the queue
                return;
            }
            debug!("Event bus resumed with {} queued events", state.queue.len());
            state.flushing = true;
        }

        loop {
            let next = {
                let mut state = self.inner.state.lock();
                if state.paused {
                    state.flushing = false;
                    return;
                }
                match state.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        state.flushing = false;
                        return;
                    }
                }
            };
            self.dispatch(&next);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Events waiting for a resume
    pub fn queued_events(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Wait for the next event of `event_type`.
    ///
    /// With a timeout, fails with [`Error::Timeout`] once it elapses; the
    /// temporary listener is removed whichever way the wait ends, including
    /// when the returned future is dropped.
    pub async fn wait_for(
        &self,
        event_type: EventType,
        timeout: Option<Duration>,
    ) -> Result<EventPayload> {
        let (tx, rx) = oneshot::channel();
        let _guard = SubscriptionGuard(self.once(event_type, move |event| {
            let _ = tx.send(event.clone());
        }));

        let operation = format!("wait_for {}", event_type);
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| Error::timeout(operation.clone(), limit.as_millis() as u64))?,
            None => rx.await,
        };
        received.map_err(|_| Error::cancelled(operation))
    }

    /// Listener count for one type (typed plus once), or every listener
    /// including wildcards when `event_type` is `None`
    pub fn listener_count(&self, event_type: Option<EventType>) -> usize {
        let state = self.inner.state.lock();
        match event_type {
            Some(event_type) => state.count_for(event_type),
            None => {
                state.typed.values().map(Vec::len).sum::<usize>()
                    + state.once.values().map(Vec::len).sum::<usize>()
                    + state.any.len()
            }
        }
    }

    /// Event types that currently have at least one typed or once listener
    pub fn event_types(&self) -> Vec<EventType> {
        let state = self.inner.state.lock();
        let mut types: Vec<EventType> = state
            .typed
            .keys()
            .chain(state.once.keys())
            .copied()
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// Drop listeners for one type, or every listener when `None`
    pub fn remove_all_listeners(&self, event_type: Option<EventType>) {
        let mut state = self.inner.state.lock();
        match event_type {
            Some(event_type) => {
                state.typed.remove(&event_type);
                state.once.remove(&event_type);
            }
            None => {
                state.typed.clear();
                state.once.clear();
                state.any.clear();
            }
        }
    }
}

fn invoke<F: FnOnce()>(event_type: EventType, call: F) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(call)) {
        error!(
            "Event listener for {} panicked: {}",
            event_type,
            panic_message(panic.as_ref())
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mcp_runtime_core::{SessionId, TransportKind};

    fn created() -> EventPayload {
        EventPayload::session_created(SessionId::new(), TransportKind::Stdio)
    }

    fn request(id: &str) -> EventPayload {
        EventPayload::request_started(SessionId::new(), id, "tools/list")
    }

    fn request_id(event: &EventPayload) -> String {
        match event.data() {
            crate::EventData::Request(data) => data.request_id.clone(),
            other => panic!("unexpected data: {:?}", other),
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&EventPayload) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |event: &EventPayload| {
            sink.lock().push(request_id(event))
        })
    }

    #[test]
    fn test_delivery_order_typed_once_any() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        bus.on_any(move |_| o.lock().push("any"));
        let o = order.clone();
        bus.once(EventType::SessionCreated, move |_| o.lock().push("once"));
        let o = order.clone();
        bus.on(EventType::SessionCreated, move |_| o.lock().push("typed"));

        bus.emit(created());
        assert_eq!(*order.lock(), vec!["typed", "once", "any"]);
    }

    #[test]
    fn test_ordering_survives_pause_and_resume() {
        let bus = EventBus::new();
        let (seen, listener) = recorder();
        bus.on(EventType::RequestStart, listener);

        bus.emit(request("1"));
        bus.pause();
        bus.emit(request("2"));
        assert_eq!(bus.queued_events(), 1);
        assert_eq!(*seen.lock(), vec!["1"]);
        bus.resume();
        bus.emit(request("3"));

        assert_eq!(*seen.lock(), vec!["1", "2", "3"]);
        assert!(!bus.is_paused());
    }

    #[test]
    fn test_emit_during_flush_keeps_order() {
        let bus = EventBus::new();
        let (seen, listener) = recorder();
        bus.on(EventType::RequestStart, listener);

        let reentrant = bus.clone();
        bus.once(EventType::RequestStart, move |_| reentrant.emit(request("late")));

        bus.pause();
        bus.emit(request("a"));
        bus.emit(request("b"));
        bus.resume();

        assert_eq!(*seen.lock(), vec!["a", "b", "late"]);
    }

    #[test]
    fn test_once_fires_exactly_once() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        bus.once(EventType::SessionCreated, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(created());
        bus.emit(created());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(Some(EventType::SessionCreated)), 0);
    }

    #[test]
    fn test_resubscribing_once_listener_skips_current_event() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        fn arm(bus: &EventBus, hits: Arc<AtomicU64>) {
            let again = bus.clone();
            bus.once(EventType::SessionCreated, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                arm(&again, hits.clone());
            });
        }
        arm(&bus, hits.clone());

        bus.emit(created());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(Some(EventType::SessionCreated)), 1);

        bus.emit(created());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        bus.on(EventType::SessionCreated, |_| panic!("listener bug"));
        let h = hits.clone();
        bus.on(EventType::SessionCreated, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h = hits.clone();
        bus.on_any(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(created());
        bus.emit(created());
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let first = bus.on(EventType::SessionCreated, |_| {});
        let _second = bus.on(EventType::SessionCreated, |_| {});
        assert_eq!(bus.listener_count(Some(EventType::SessionCreated)), 2);

        first.unsubscribe();
        first.unsubscribe();
        assert!(!first.is_active());
        assert_eq!(bus.listener_count(Some(EventType::SessionCreated)), 1);
    }

    #[test]
    fn test_introspection_and_cleanup() {
        let bus = EventBus::new();
        bus.on(EventType::SessionDestroyed, |_| {});
        bus.once(EventType::SessionCreated, |_| {});
        bus.on_any(|_| {});

        assert_eq!(
            bus.event_types(),
            vec![EventType::SessionCreated, EventType::SessionDestroyed]
        );
        assert_eq!(bus.listener_count(None), 3);

        bus.remove_all_listeners(Some(EventType::SessionCreated));
        assert_eq!(bus.event_types(), vec![EventType::SessionDestroyed]);

        bus.remove_all_listeners(None);
        assert_eq!(bus.listener_count(None), 0);
    }

    #[test]
    fn test_listener_cap_only_warns() {
        let bus = EventBus::with_config(EventBusConfig { max_listeners: 2 });
        for _ in 0..5 {
            bus.on(EventType::ServerLog, |_| {});
        }
        assert_eq!(bus.listener_count(Some(EventType::ServerLog)), 5);
        assert_eq!(bus.config().max_listeners, 2);
    }

    #[tokio::test]
    async fn test_wait_for_resolves_with_next_event() {
        let bus = EventBus::new();
        let emitter = bus.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            emitter.emit(request("42"));
        });

        let event = bus
            .wait_for(EventType::RequestStart, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(request_id(&event), "42");
        assert_eq!(bus.listener_count(None), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_timeout_removes_listener() {
        let bus = EventBus::new();
        let result = bus
            .wait_for(EventType::SessionCreated, Some(Duration::from_millis(250)))
            .await;

        assert_matches!(result, Err(Error::Timeout { timeout_ms: 250, .. }));
        assert_eq!(bus.listener_count(Some(EventType::SessionCreated)), 0);
    }

    #[tokio::test]
    async fn test_wait_for_cancelled_when_listeners_removed() {
        let bus = EventBus::new();
        let cleaner = bus.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            cleaner.remove_all_listeners(None);
        });

        let result = bus.wait_for(EventType::SessionCreated, None).await;
        assert_matches!(result, Err(Error::Cancelled { .. }));
    }
}
