//! Typed event bus with RAII subscriptions.
//!
//! Handlers are keyed by event type. [`EventBus::subscribe`] registers a
//! callback and returns a [`Subscription`] guard; dropping the guard removes
//! the callback. [`EventBus::listen`] returns a [`Listener`] whose callback
//! queues events into a mailbox that its owner drains between frames, which
//! lets components react with `&mut self` access instead of capturing
//! themselves in a closure.
//!
//! # Example
//!
//! ```
//! use umbra_core::events::{EventBus, WindowResize};
//!
//! let bus = EventBus::new();
//! let listener = bus.listen::<WindowResize>();
//! bus.dispatch(WindowResize { width: 800, height: 600 });
//! assert_eq!(listener.drain(), vec![WindowResize { width: 800, height: 600 }]);
//! drop(listener);
//! assert_eq!(bus.subscriber_count::<WindowResize>(), 0);
//! ```

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::asset::{AssetId, AssetKind};

/// Marker for types that can travel over the bus.
pub trait Event: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Event for T {}

/// The window (or presentation surface) changed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowResize {
    pub width: u32,
    pub height: u32,
}

/// The window gained or lost input focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFocus {
    pub focused: bool,
}

/// An asset finished loading or was reloaded in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLoaded {
    pub id: AssetId,
    pub kind: AssetKind,
    pub path: String,
}

type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: u64,
    handlers: HashMap<TypeId, Vec<(u64, Callback)>>,
}

/// Cloneable handle to a shared event bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of type `E`.
    ///
    /// The handler stays registered for as long as the returned guard lives.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<E: Event>(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let callback: Callback = Arc::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<E>() {
                handler(event);
            }
        });

        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .handlers
            .entry(TypeId::of::<E>())
            .or_default()
            .push((id, callback));

        Subscription {
            id,
            type_id: TypeId::of::<E>(),
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Registers a mailbox for events of type `E`.
    #[must_use = "dropping the listener unsubscribes immediately"]
    pub fn listen<E: Event>(&self) -> Listener<E> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let sink = Arc::clone(&queue);
        let subscription = self.subscribe::<E>(move |event| sink.lock().push_back(event.clone()));
        Listener {
            queue,
            _subscription: subscription,
        }
    }

    /// Delivers `event` synchronously to every handler of its type.
    ///
    /// Handlers run outside the bus lock, so they may subscribe or dispatch.
    /// Returns the number of handlers invoked.
    pub fn dispatch<E: Event>(&self, event: E) -> usize {
        let callbacks: Vec<Callback> = {
            let inner = self.inner.lock();
            match inner.handlers.get(&TypeId::of::<E>()) {
                Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return 0,
            }
        };
        for callback in &callbacks {
            callback(&event as &dyn Any);
        }
        callbacks.len()
    }

    /// Number of live subscriptions for events of type `E`.
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.inner
            .lock()
            .handlers
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }
}

/// Guard that unsubscribes its handler when dropped.
pub struct Subscription {
    id: u64,
    type_id: TypeId,
    bus: Weak<Mutex<BusInner>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut inner = bus.lock();
        if let Some(list) = inner.handlers.get_mut(&self.type_id) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                inner.handlers.remove(&self.type_id);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// A subscription that buffers events until its owner drains them.
pub struct Listener<E: Event> {
    queue: Arc<Mutex<VecDeque<E>>>,
    _subscription: Subscription,
}

impl<E: Event> Listener<E> {
    /// Takes every queued event, oldest first.
    pub fn drain(&self) -> Vec<E> {
        self.queue.lock().drain(..).collect()
    }

    /// Takes only the most recent event, discarding older ones.
    pub fn latest(&self) -> Option<E> {
        let mut queue = self.queue.lock();
        let last = queue.pop_back();
        queue.clear();
        last
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl<E: Event> std::fmt::Debug for Listener<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("queued", &self.queue.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn subscribe_and_dispatch() {
        let bus = EventBus::new();
        let total = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&total);
        let _sub = bus.subscribe::<WindowResize>(move |e| {
            sink.fetch_add(e.width, Ordering::SeqCst);
        });

        assert_eq!(bus.dispatch(WindowResize { width: 3, height: 1 }), 1);
        assert_eq!(bus.dispatch(WindowResize { width: 4, height: 1 }), 1);
        assert_eq!(total.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn dropping_guard_unsubscribes() {
        let bus = EventBus::new();
        let sub = bus.subscribe::<WindowFocus>(|_| {});
        assert_eq!(bus.subscriber_count::<WindowFocus>(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count::<WindowFocus>(), 0);
        assert_eq!(bus.dispatch(WindowFocus { focused: true }), 0);
    }

    #[test]
    fn events_are_routed_by_type() {
        let bus = EventBus::new();
        let resize = bus.listen::<WindowResize>();
        let focus = bus.listen::<WindowFocus>();
        bus.dispatch(WindowFocus { focused: false });
        assert!(resize.is_empty());
        assert_eq!(focus.drain(), vec![WindowFocus { focused: false }]);
    }

    #[test]
    fn listener_latest_discards_older() {
        let bus = EventBus::new();
        let listener = bus.listen::<WindowResize>();
        bus.dispatch(WindowResize { width: 1, height: 1 });
        bus.dispatch(WindowResize { width: 2, height: 2 });
        assert_eq!(listener.latest(), Some(WindowResize { width: 2, height: 2 }));
        assert!(listener.is_empty());
    }

    #[test]
    fn handler_may_dispatch_reentrantly() {
        let bus = EventBus::new();
        let focus = bus.listen::<WindowFocus>();
        let inner_bus = bus.clone();
        let _sub = bus.subscribe::<WindowResize>(move |_| {
            inner_bus.dispatch(WindowFocus { focused: true });
        });
        bus.dispatch(WindowResize { width: 1, height: 1 });
        assert_eq!(focus.drain().len(), 1);
    }

    #[test]
    fn guard_outliving_bus_is_harmless() {
        let bus = EventBus::new();
        let sub = bus.subscribe::<WindowFocus>(|_| {});
        drop(bus);
        drop(sub);
    }
}
