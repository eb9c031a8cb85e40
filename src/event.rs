//! Thread-safe event/listener dispatch primitive
//!
//! [`EventHandler`] decouples producers of "run this on the loop thread"
//! requests from the loop's own execution, and doubles as a general pub/sub
//! mechanism. Listeners are either one-shot (removed after their first
//! firing) or persistent (fire on every dispatch until removed).
//!
//! # Dispatch semantics
//!
//! `dispatch()` snapshots the registration table under the lock, then fires
//! the callbacks outside it, in registration order. A callback may therefore
//! register or remove listeners (including itself) without deadlocking. A
//! panicking callback is isolated and logged; the remaining callbacks in the
//! same dispatch still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::error::panic_message;

/// Identity of a registered listener.
///
/// Monotonically increasing per handler; never reused within a handler's
/// lifetime. A restarted simulator builds a fresh handler, so ids are not
/// unique across process instances.
pub type ListenerId = u64;

type Callback = Box<dyn FnMut() + Send>;

struct Registration {
    callback: Arc<Mutex<Callback>>,
    persistent: bool,
}

struct Registry {
    next_id: ListenerId,
    // Insertion order is dispatch order
    listeners: Vec<(ListenerId, Registration)>,
}

/// Generic, thread-safe publish/dispatch primitive.
///
/// All registry mutation and the snapshot step of [`dispatch`] share one
/// mutex; callback execution happens outside it.
///
/// [`dispatch`]: EventHandler::dispatch
pub struct EventHandler {
    name: String,
    registry: Mutex<Registry>,
}

impl EventHandler {
    /// Create a named handler; the name only shows up in log output
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: Mutex::new(Registry {
                next_id: 1,
                listeners: Vec::new(),
            }),
        }
    }

    /// Register a one-shot listener; it is removed after its first firing
    pub fn do_once(&self, callback: impl FnMut() + Send + 'static) -> ListenerId {
        self.register(Box::new(callback), false)
    }

    /// Register a persistent listener; it fires on every dispatch until removed
    pub fn do_persistent(&self, callback: impl FnMut() + Send + 'static) -> ListenerId {
        self.register(Box::new(callback), true)
    }

    fn register(&self, callback: Callback, persistent: bool) -> ListenerId {
        let mut registry = self.lock_registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((
            id,
            Registration {
                callback: Arc::new(Mutex::new(callback)),
                persistent,
            },
        ));
        id
    }

    /// Remove a listener by id. Idempotent; unknown ids are a no-op.
    pub fn remove(&self, id: ListenerId) {
        self.lock_registry().listeners.retain(|(lid, _)| *lid != id);
    }

    /// Whether the given id is currently registered
    pub fn is_registered(&self, id: ListenerId) -> bool {
        self.lock_registry()
            .listeners
            .iter()
            .any(|(lid, _)| *lid == id)
    }

    /// Ids of all current registrations, in registration order
    pub fn listener_ids(&self) -> Vec<ListenerId> {
        self.lock_registry()
            .listeners
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of current registrations
    pub fn listener_count(&self) -> usize {
        self.lock_registry().listeners.len()
    }

    /// Fire all currently-registered listeners once each, in registration
    /// order.
    ///
    /// The registration set is snapshotted up front, so listeners added from
    /// within a callback fire on the next dispatch, and removals from within
    /// a callback never corrupt the iteration. Non-persistent listeners are
    /// removed after they fire.
    pub fn dispatch(&self) {
        let snapshot: Vec<(ListenerId, Arc<Mutex<Callback>>, bool)> = {
            let registry = self.lock_registry();
            registry
                .listeners
                .iter()
                .map(|(id, reg)| (*id, Arc::clone(&reg.callback), reg.persistent))
                .collect()
        };

        for (id, callback, persistent) in snapshot {
            // A listener removed mid-dispatch by an earlier callback must not fire
            if !self.is_registered(id) {
                continue;
            }

            let result = catch_unwind(AssertUnwindSafe(|| {
                let mut callback = callback.lock().unwrap_or_else(|e| e.into_inner());
                (callback)();
            }));

            if let Err(payload) = result {
                tracing::error!(
                    handler = %self.name,
                    listener = id,
                    "Error while running listener: {}",
                    panic_message(payload.as_ref())
                );
            }

            if !persistent {
                self.remove(id);
            }
        }
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler")
            .field("name", &self.name)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicU32>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicU32::new(0));
        let clone = count.clone();
        (count, move || {
            clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_once_listener_fires_exactly_once() {
        let handler = EventHandler::new("test");
        let (count, cb) = counter();
        handler.do_once(cb);

        handler.dispatch();
        handler.dispatch();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(handler.listener_count(), 0);
    }

    #[test]
    fn test_persistent_listener_fires_every_dispatch() {
        let handler = EventHandler::new("test");
        let (count, cb) = counter();
        let id = handler.do_persistent(cb);

        handler.dispatch();
        handler.dispatch();
        handler.dispatch();
        assert_eq!(count.load(Ordering::SeqCst), 3);

        handler.remove(id);
        handler.dispatch();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let handler = EventHandler::new("test");
        let (_, cb) = counter();
        let id = handler.do_once(cb);

        handler.remove(id);
        handler.remove(id);
        assert_eq!(handler.listener_count(), 0);

        // Removing an id that never existed is also a no-op
        handler.remove(9999);
    }

    #[test]
    fn test_ids_are_monotonic_and_not_reused() {
        let handler = EventHandler::new("test");
        let a = handler.do_once(|| {});
        let b = handler.do_once(|| {});
        assert!(b > a);

        handler.dispatch();
        let c = handler.do_once(|| {});
        assert!(c > b);
    }

    #[test]
    fn test_dispatch_order_is_registration_order() {
        let handler = EventHandler::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = order.clone();
            handler.do_once(move || order.lock().unwrap().push(i));
        }

        handler.dispatch();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_panicking_listener_does_not_abort_dispatch() {
        let handler = EventHandler::new("test");
        let (count, cb) = counter();

        handler.do_once(|| panic!("listener exploded"));
        handler.do_once(cb);

        handler.dispatch();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // The panicking one-shot is still consumed
        assert_eq!(handler.listener_count(), 0);
    }

    #[test]
    fn test_listener_can_remove_itself() {
        let handler = Arc::new(EventHandler::new("test"));
        let (count, mut cb) = counter();

        let id_slot = Arc::new(Mutex::new(0));
        let handler_clone = handler.clone();
        let id_slot_clone = id_slot.clone();
        let id = handler.do_persistent(move || {
            cb();
            handler_clone.remove(*id_slot_clone.lock().unwrap());
        });
        *id_slot.lock().unwrap() = id;

        handler.dispatch();
        handler.dispatch();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_can_register_another() {
        let handler = Arc::new(EventHandler::new("test"));
        let (count, cb) = counter();

        let handler_clone = handler.clone();
        let cb_slot = Arc::new(Mutex::new(Some(cb)));
        handler.do_once(move || {
            let cb = cb_slot.lock().unwrap().take().unwrap();
            handler_clone.do_once(cb);
        });

        // First dispatch registers, second fires
        handler.dispatch();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        handler.dispatch();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_removed_by_earlier_callback_does_not_fire() {
        let handler = Arc::new(EventHandler::new("test"));
        let (victim_count, victim_cb) = counter();

        let victim_id = Arc::new(Mutex::new(0));
        let handler_clone = handler.clone();
        let victim_id_clone = victim_id.clone();
        handler.do_once(move || handler_clone.remove(*victim_id_clone.lock().unwrap()));
        *victim_id.lock().unwrap() = handler.do_persistent(victim_cb);

        // Both are in the snapshot, but the first callback removes the second
        // before it gets its turn.
        handler.dispatch();
        assert_eq!(victim_count.load(Ordering::SeqCst), 0);
        assert_eq!(handler.listener_count(), 0);
    }

    #[test]
    fn test_cross_thread_registration() {
        let handler = Arc::new(EventHandler::new("test"));
        let (count, cb) = counter();

        let handler_clone = handler.clone();
        let join = std::thread::spawn(move || {
            handler_clone.do_once(cb);
        });
        join.join().unwrap();

        handler.dispatch();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
