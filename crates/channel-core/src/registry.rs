use std::{
    any::Any,
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use serde_json::Value;
use tracing::warn;

use crate::error::{ChannelError, ChannelErrorCategory};

/// Infallible listener registered through `subscribe`.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;
/// Return type of handlers registered through `on`.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
/// Fallible handler registered through `on`.
pub type Handler = Arc<dyn Fn(&Value) -> HandlerResult + Send + Sync>;

/// Per-frame delivery summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Invocations that returned normally.
    pub delivered: usize,
    /// Invocations that panicked or returned an error.
    pub failed: usize,
}

struct ListenerEntry {
    id: u64,
    listener: Listener,
    active: Arc<AtomicBool>,
}

struct HandlerEntry {
    handler: Handler,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    listeners: HashMap<String, Vec<ListenerEntry>>,
    handlers: HashMap<String, Vec<HandlerEntry>>,
}

/// Two independent registries keyed by event type.
///
/// `subscribe` registrations are capability tokens: every call creates a new
/// registration, even for the same listener, and each [`Subscription`] removes
/// exactly its own. `on`/`off` registrations are keyed by handler identity
/// (`Arc` pointer): registering the same handler twice for a type is a no-op
/// and `off` removes it.
///
/// Callbacks run outside the registry lock, so they may subscribe or
/// unsubscribe while a frame is being dispatched.
#[derive(Clone, Default)]
pub struct EventRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock_inner(&self.inner);
        f.debug_struct("EventRegistry")
            .field("listener_types", &inner.listeners.len())
            .field("handler_types", &inner.handlers.len())
            .finish()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `kind`.
    pub fn subscribe<F>(&self, kind: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_shared(kind, Arc::new(listener))
    }

    /// Register an already shared listener. Registering the same `Arc` twice
    /// yields two registrations.
    pub fn subscribe_shared(&self, kind: impl Into<String>, listener: Listener) -> Subscription {
        let kind = kind.into();
        let active = Arc::new(AtomicBool::new(true));

        let mut inner = lock_inner(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .listeners
            .entry(kind.clone())
            .or_default()
            .push(ListenerEntry {
                id,
                listener,
                active: Arc::clone(&active),
            });

        Subscription {
            registry: Arc::downgrade(&self.inner),
            kind,
            id,
            active,
        }
    }

    /// Register `handler` for `kind`. Returns `false` when this handler is
    /// already registered for the type.
    pub fn on(&self, kind: impl Into<String>, handler: Handler) -> bool {
        let mut inner = lock_inner(&self.inner);
        let entries = inner.handlers.entry(kind.into()).or_default();
        if entries
            .iter()
            .any(|entry| same_handler(&entry.handler, &handler))
        {
            return false;
        }
        entries.push(HandlerEntry {
            handler,
            active: Arc::new(AtomicBool::new(true)),
        });
        true
    }

    /// Remove `handler` from `kind`. Returns `false` when it was not registered.
    pub fn off(&self, kind: &str, handler: &Handler) -> bool {
        let mut inner = lock_inner(&self.inner);
        let Some(entries) = inner.handlers.get_mut(kind) else {
            return false;
        };
        let Some(index) = entries
            .iter()
            .position(|entry| same_handler(&entry.handler, handler))
        else {
            return false;
        };

        let removed = entries.remove(index);
        removed.active.store(false, Ordering::Release);
        let now_empty = entries.is_empty();
        if now_empty {
            inner.handlers.remove(kind);
        }
        true
    }

    pub fn listener_count(&self, kind: &str) -> usize {
        lock_inner(&self.inner)
            .listeners
            .get(kind)
            .map_or(0, Vec::len)
    }

    pub fn handler_count(&self, kind: &str) -> usize {
        lock_inner(&self.inner)
            .handlers
            .get(kind)
            .map_or(0, Vec::len)
    }

    /// Drop every registration. Outstanding [`Subscription`]s become no-ops.
    pub fn clear(&self) {
        let mut inner = lock_inner(&self.inner);
        for entry in inner.listeners.values().flatten() {
            entry.active.store(false, Ordering::Release);
        }
        for entry in inner.handlers.values().flatten() {
            entry.active.store(false, Ordering::Release);
        }
        inner.listeners.clear();
        inner.handlers.clear();
    }

    /// Deliver `payload` to every listener, then every handler, registered
    /// for `kind`.
    ///
    /// Each invocation is isolated: a panic or handler error is logged and
    /// counted, and delivery continues with the next callback. A registration
    /// removed mid-dispatch is skipped if it has not run yet.
    pub fn dispatch(&self, kind: &str, payload: &Value) -> DispatchReport {
        let (listeners, handlers) = {
            let inner = lock_inner(&self.inner);
            let listeners: Vec<(Listener, Arc<AtomicBool>)> = inner
                .listeners
                .get(kind)
                .into_iter()
                .flatten()
                .map(|entry| (Arc::clone(&entry.listener), Arc::clone(&entry.active)))
                .collect();
            let handlers: Vec<(Handler, Arc<AtomicBool>)> = inner
                .handlers
                .get(kind)
                .into_iter()
                .flatten()
                .map(|entry| (Arc::clone(&entry.handler), Arc::clone(&entry.active)))
                .collect();
            (listeners, handlers)
        };

        let mut report = DispatchReport::default();

        for (listener, active) in listeners {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        event_type = kind,
                        panic = %panic_message(panic.as_ref()),
                        "listener panicked during dispatch"
                    );
                }
            }
        }

        for (handler, active) in handlers {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    let err = ChannelError::new(
                        ChannelErrorCategory::Listener,
                        "handler_failed",
                        err.to_string(),
                    );
                    warn!(event_type = kind, error = %err, "handler failed during dispatch");
                }
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        event_type = kind,
                        panic = %panic_message(panic.as_ref()),
                        "handler panicked during dispatch"
                    );
                }
            }
        }

        report
    }
}

/// Capability returned by `subscribe`; removes exactly one registration.
#[must_use = "dropping a Subscription keeps the listener registered"]
pub struct Subscription {
    registry: Weak<Mutex<RegistryInner>>,
    kind: String,
    id: u64,
    active: Arc<AtomicBool>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// `false` once unsubscribed or cleared from the registry.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove this registration. No further invocations start after this
    /// returns. A no-op if the registry was cleared or dropped.
    pub fn unsubscribe(self) {
        self.active.store(false, Ordering::Release);

        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut inner = lock_inner(&registry);
        let now_empty = match inner.listeners.get_mut(&self.kind) {
            Some(entries) => {
                entries.retain(|entry| entry.id != self.id);
                entries.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.listeners.remove(&self.kind);
        }
    }
}

fn lock_inner(inner: &Mutex<RegistryInner>) -> MutexGuard<'_, RegistryInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn counting_listener(count: &Arc<AtomicUsize>) -> impl Fn(&Value) + Send + Sync + 'static {
        let count = Arc::clone(count);
        move |_: &Value| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn delivers_only_to_listeners_of_matching_type() {
        let registry = EventRegistry::new();
        let sessions = counter();
        let progress = counter();
        let _a = registry.subscribe("session.created", counting_listener(&sessions));
        let _b = registry.subscribe("progress.updated", counting_listener(&progress));

        let report = registry.dispatch("session.created", &json!({ "id": 1 }));

        assert_eq!(report, DispatchReport { delivered: 1, failed: 0 });
        assert_eq!(sessions.load(Ordering::SeqCst), 1);
        assert_eq!(progress.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn passes_payload_through_unchanged() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = registry.subscribe("notification", move |payload| {
            sink.lock().expect("lock").push(payload.clone());
        });

        registry.dispatch("notification", &json!({ "title": "New drawing uploaded" }));

        assert_eq!(
            *seen.lock().expect("lock"),
            vec![json!({ "title": "New drawing uploaded" })]
        );
    }

    #[test]
    fn duplicate_subscriptions_are_independent() {
        let registry = EventRegistry::new();
        let count = counter();
        let listener: Listener = Arc::new(counting_listener(&count));

        let first = registry.subscribe_shared("session.created", Arc::clone(&listener));
        let second = registry.subscribe_shared("session.created", listener);
        assert_eq!(registry.listener_count("session.created"), 2);

        registry.dispatch("session.created", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        first.unsubscribe();
        registry.dispatch("session.created", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 3);

        second.unsubscribe();
        registry.dispatch("session.created", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(registry.listener_count("session.created"), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = EventRegistry::new();
        let count = counter();
        let sub = registry.subscribe("progress.updated", counting_listener(&count));

        registry.dispatch("progress.updated", &Value::Null);
        assert!(sub.is_active());
        sub.unsubscribe();

        for _ in 0..10 {
            registry.dispatch("progress.updated", &Value::Null);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_after_clear_or_drop_is_noop() {
        let registry = EventRegistry::new();
        let cleared = registry.subscribe("a", |_| {});
        registry.clear();
        assert!(!cleared.is_active());
        cleared.unsubscribe();

        let orphan = registry.subscribe("b", |_| {});
        drop(registry);
        orphan.unsubscribe();
    }

    #[test]
    fn panicking_listener_does_not_block_siblings_or_later_frames() {
        let registry = EventRegistry::new();
        let count = counter();
        let _bad = registry.subscribe("session.created", |_| panic!("listener exploded"));
        let _good = registry.subscribe("session.created", counting_listener(&count));

        let report = registry.dispatch("session.created", &Value::Null);
        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });

        registry.dispatch("session.created", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handlers_run_after_listeners_and_errors_are_isolated() {
        let registry = EventRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let listener_order = Arc::clone(&order);
        let _sub = registry.subscribe("notification", move |_| {
            listener_order.lock().expect("lock").push("listener");
        });

        let failing: Handler = Arc::new(|_: &Value| Err("handler refused".into()));
        let handler_order = Arc::clone(&order);
        let recording: Handler = Arc::new(move |_: &Value| {
            handler_order.lock().expect("lock").push("handler");
            Ok(())
        });
        assert!(registry.on("notification", failing));
        assert!(registry.on("notification", recording));

        let report = registry.dispatch("notification", &Value::Null);

        assert_eq!(report, DispatchReport { delivered: 2, failed: 1 });
        assert_eq!(*order.lock().expect("lock"), vec!["listener", "handler"]);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let registry = EventRegistry::new();
        let count = counter();
        let panicking: Handler = Arc::new(|_: &Value| panic!("handler exploded"));
        let counting = Arc::clone(&count);
        let ok: Handler = Arc::new(move |_: &Value| {
            counting.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        registry.on("progress.updated", panicking);
        registry.on("progress.updated", ok);

        let report = registry.dispatch("progress.updated", &Value::Null);
        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_deduplicates_by_handler_identity_and_off_removes() {
        let registry = EventRegistry::new();
        let count = counter();
        let counting = Arc::clone(&count);
        let handler: Handler = Arc::new(move |_: &Value| {
            counting.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(registry.on("session.created", Arc::clone(&handler)));
        assert!(!registry.on("session.created", Arc::clone(&handler)));
        assert_eq!(registry.handler_count("session.created"), 1);

        registry.dispatch("session.created", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(registry.off("session.created", &handler));
        assert!(!registry.off("session.created", &handler));
        registry.dispatch("session.created", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handler_count("session.created"), 0);
    }

    #[test]
    fn equal_looking_closures_are_distinct_handlers() {
        let registry = EventRegistry::new();
        let a: Handler = Arc::new(|_: &Value| Ok(()));
        let b: Handler = Arc::new(|_: &Value| Ok(()));
        assert!(registry.on("x", a));
        assert!(registry.on("x", Arc::clone(&b)));
        assert_eq!(registry.handler_count("x"), 2);
        assert!(registry.off("x", &b));
        assert_eq!(registry.handler_count("x"), 1);
    }

    #[test]
    fn listener_removed_mid_dispatch_is_skipped() {
        let registry = EventRegistry::new();
        let count = counter();
        let pending: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let to_remove = Arc::clone(&pending);
        let _first = registry.subscribe("notification", move |_| {
            if let Some(sub) = to_remove.lock().expect("lock").take() {
                sub.unsubscribe();
            }
        });
        let second = registry.subscribe("notification", counting_listener(&count));
        *pending.lock().expect("lock") = Some(second);

        let report = registry.dispatch("notification", &Value::Null);
        assert_eq!(report.delivered, 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callbacks_may_register_during_dispatch() {
        let registry = EventRegistry::new();
        let inner_registry = registry.clone();
        let _sub = registry.subscribe("session.created", move |_| {
            let late = inner_registry.subscribe("session.created", |_| {});
            late.unsubscribe();
        });

        let report = registry.dispatch("session.created", &Value::Null);
        assert_eq!(report.delivered, 1);
    }
}
