//! Event Bus Module
//!
//! Typed publish/subscribe registry used by caches and operation queues to
//! notify observers. Each event family (cache events, queue events) is a
//! closed enum whose variants carry their own payload, and each family is
//! dispatched through its own bus instance.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

// == Event Trait ==
/// An event that can be routed by an [`EventBus`].
pub trait Event: Send + Sync + 'static {
    /// Payload-free discriminant used as the subscription key.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Returns the kind this event is delivered under.
    fn kind(&self) -> Self::Kind;
}

// == Cache Events ==
/// Notifications emitted by caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Keys removed by a prune pass, oldest first
    ItemsEvicted(Vec<String>),
    /// A read missed and nothing could populate the key
    KeyNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
    ItemsEvicted,
    KeyNotFound,
}

impl Event for CacheEvent {
    type Kind = CacheEventKind;

    fn kind(&self) -> CacheEventKind {
        match self {
            CacheEvent::ItemsEvicted(_) => CacheEventKind::ItemsEvicted,
            CacheEvent::KeyNotFound(_) => CacheEventKind::KeyNotFound,
        }
    }
}

// == Queue Events ==
/// Notifications emitted by operation queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// The operation for a key is about to run
    OperationStart(String),
    /// The operation for a key settled, successfully or not
    OperationEnd(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueEventKind {
    OperationStart,
    OperationEnd,
}

impl Event for QueueEvent {
    type Kind = QueueEventKind;

    fn kind(&self) -> QueueEventKind {
        match self {
            QueueEvent::OperationStart(_) => QueueEventKind::OperationStart,
            QueueEvent::OperationEnd(_) => QueueEventKind::OperationEnd,
        }
    }
}

// == Subscription ==
/// Token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

// == Event Bus ==
/// Routes events to every handler subscribed to their kind.
pub struct EventBus<E: Event> {
    handlers: Mutex<HashMap<E::Kind, Vec<(SubscriptionId, Handler<E>)>>>,
    next_id: AtomicU64,
}

impl<E: Event> EventBus<E> {
    // == Constructor ==
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    // == Subscribe ==
    /// Registers a handler for an event kind.
    ///
    /// Registrations are not deduplicated: subscribing the same closure
    /// twice invokes it twice.
    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    // == Unsubscribe ==
    /// Removes one handler. Returns whether it was registered.
    pub fn unsubscribe(&self, kind: E::Kind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        match handlers.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                list.len() != before
            }
            None => false,
        }
    }

    // == Unsubscribe All ==
    /// Clears handlers for one kind, or for every kind when `kind` is `None`.
    pub fn unsubscribe_all(&self, kind: Option<E::Kind>) {
        let mut handlers = self.handlers.lock();
        match kind {
            Some(kind) => {
                handlers.remove(&kind);
            }
            None => handlers.clear(),
        }
    }

    // == Has Subscribers ==
    pub fn has_subscribers(&self, kind: E::Kind) -> bool {
        self.handlers
            .lock()
            .get(&kind)
            .is_some_and(|list| !list.is_empty())
    }

    // == Emit ==
    /// Invokes every handler subscribed to the event's kind, in registration
    /// order. Returns whether any handler existed.
    ///
    /// Handlers are snapshotted before dispatch, so handlers may subscribe or
    /// unsubscribe from inside a callback without affecting this pass.
    pub fn emit(&self, event: E) -> bool {
        let snapshot: Vec<Handler<E>> = match self.handlers.lock().get(&event.kind()) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return false,
        };

        if snapshot.is_empty() {
            return false;
        }
        for handler in &snapshot {
            handler(&event);
        }
        true
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.lock();
        let counts: HashMap<&E::Kind, usize> =
            handlers.iter().map(|(kind, list)| (kind, list.len())).collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&CacheEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &CacheEvent| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::<CacheEvent>::new();
        assert!(!bus.emit(CacheEvent::KeyNotFound("k".into())));
    }

    #[test]
    fn test_emit_routes_by_kind() {
        let bus = EventBus::<CacheEvent>::new();
        let (evicted, on_evicted) = counter();
        let (missing, on_missing) = counter();

        bus.subscribe(CacheEventKind::ItemsEvicted, on_evicted);
        bus.subscribe(CacheEventKind::KeyNotFound, on_missing);

        assert!(bus.emit(CacheEvent::ItemsEvicted(vec!["a".into()])));
        assert_eq!(evicted.load(Ordering::SeqCst), 1);
        assert_eq!(missing.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_duplicate_subscriptions_both_fire() {
        let bus = EventBus::<CacheEvent>::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let count = Arc::clone(&count);
            bus.subscribe(CacheEventKind::KeyNotFound, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(CacheEvent::KeyNotFound("k".into()));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::<QueueEvent>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe(QueueEventKind::OperationStart, move |_| order.lock().push(i));
        }

        bus.emit(QueueEvent::OperationStart("k".into()));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::<CacheEvent>::new();
        let (count, handler) = counter();
        let id = bus.subscribe(CacheEventKind::KeyNotFound, handler);

        assert!(bus.unsubscribe(CacheEventKind::KeyNotFound, id));
        assert!(!bus.unsubscribe(CacheEventKind::KeyNotFound, id));
        assert!(!bus.unsubscribe(CacheEventKind::ItemsEvicted, id));

        assert!(!bus.emit(CacheEvent::KeyNotFound("k".into())));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_all() {
        let bus = EventBus::<CacheEvent>::new();
        let (_, a) = counter();
        let (_, b) = counter();
        bus.subscribe(CacheEventKind::KeyNotFound, a);
        bus.subscribe(CacheEventKind::ItemsEvicted, b);

        bus.unsubscribe_all(Some(CacheEventKind::KeyNotFound));
        assert!(!bus.has_subscribers(CacheEventKind::KeyNotFound));
        assert!(bus.has_subscribers(CacheEventKind::ItemsEvicted));

        bus.unsubscribe_all(None);
        assert!(!bus.has_subscribers(CacheEventKind::ItemsEvicted));
    }

    #[test]
    fn test_subscribe_during_emit_does_not_affect_current_pass() {
        let bus = Arc::new(EventBus::<CacheEvent>::new());
        let (late, on_late) = counter();
        let on_late = Arc::new(on_late);

        let inner_bus = Arc::clone(&bus);
        bus.subscribe(CacheEventKind::KeyNotFound, move |_| {
            let on_late = Arc::clone(&on_late);
            inner_bus.subscribe(CacheEventKind::KeyNotFound, move |e| (*on_late)(e));
        });

        bus.emit(CacheEvent::KeyNotFound("k".into()));
        assert_eq!(late.load(Ordering::SeqCst), 0);

        bus.emit(CacheEvent::KeyNotFound("k".into()));
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }
}
