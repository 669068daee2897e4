#![forbid(unsafe_code)]

//! Per-object bookkeeping: subscribers, raw listeners, pending changes.
//!
//! Every [`Observable`](crate::Observable) owns exactly one
//! [`Administration`]. Writes are [`report`](Administration::report)ed to it;
//! when nobody subscribes or listens the report returns immediately, which
//! keeps wrapping inert objects cheap.
//!
//! # Invariants
//!
//! 1. A subscriber is handed to the scheduler at most once per flush, however
//!    many of its interesting keys changed.
//! 2. Subscribers are held strongly until they are unsubscribed, either
//!    directly or when their tracked function is disposed.
//! 3. Listeners are held strongly and run synchronously inside `report`.
//! 4. No `RefCell` borrow is held while a listener runs.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use tracing::trace;

use crate::key::PropertyKey;
use crate::runtime::Runtime;
use crate::value::Value;

static NEXT_ADMIN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an [`Administration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdminId(pub u64);

// ---------------------------------------------------------------------------
// Callback handles
// ---------------------------------------------------------------------------

/// Something the scheduler can invoke.
pub trait Notify {
    fn notify(&self);
}

impl<F: Fn()> Notify for F {
    fn notify(&self) {
        self()
    }
}

/// A re-invocation target. Identity is the allocation, so clones compare
/// equal and two separately created subscribers never do.
#[derive(Clone)]
pub struct Subscriber(Rc<dyn Notify>);

impl Subscriber {
    pub fn new(f: impl Fn() + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub(crate) fn from_rc(target: Rc<dyn Notify>) -> Self {
        Self(target)
    }

    pub fn invoke(&self) {
        self.0.notify();
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Subscriber {}

impl std::hash::Hash for Subscriber {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscriber({:#x})", self.addr())
    }
}

type ListenerFn = dyn Fn(&PropertyKey, &Value);

/// A raw change listener, called with `(property, new_value)` on every
/// reported write.
#[derive(Clone)]
pub struct Listener(Rc<ListenerFn>);

impl Listener {
    pub fn new(f: impl Fn(&PropertyKey, &Value) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, property: &PropertyKey, value: &Value) {
        (self.0)(property, value);
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Listener {}

impl std::hash::Hash for Listener {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:#x})", self.addr())
    }
}

// ---------------------------------------------------------------------------
// Administration
// ---------------------------------------------------------------------------

struct Interest {
    /// Keeps the callback, and with it the address key, alive.
    target: Subscriber,
    /// Properties whose writes re-invoke `target`.
    keys: IndexSet<PropertyKey>,
}

#[derive(Default)]
struct AdminState {
    /// Interest sets keyed by subscriber address, in subscription order.
    subscribers: IndexMap<usize, Interest>,
    /// Raw listeners, run synchronously on every reported write.
    listeners: IndexSet<Listener>,
    /// Properties written since the last flush.
    pending: IndexSet<PropertyKey>,
}

struct AdminInner {
    /// Process-unique identity, stable across clones.
    id: AdminId,
    /// Class name of the wrapped instance, if any.
    name: Option<Rc<str>>,
    /// Mutable bookkeeping. Never borrowed across a callback.
    state: RefCell<AdminState>,
}

/// Bookkeeping record of one observable object.
#[derive(Clone)]
pub struct Administration {
    inner: Rc<AdminInner>,
}

/// Non-owning handle used by the engine's read log and the flush queue.
#[derive(Clone)]
pub struct WeakAdministration {
    id: AdminId,
    inner: Weak<AdminInner>,
}

impl WeakAdministration {
    #[must_use]
    pub fn id(&self) -> AdminId {
        self.id
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<Administration> {
        self.inner.upgrade().map(|inner| Administration { inner })
    }
}

impl Administration {
    #[must_use]
    pub fn new(name: Option<&str>) -> Self {
        Self {
            inner: Rc::new(AdminInner {
                id: AdminId(NEXT_ADMIN_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.map(Rc::from),
                state: RefCell::new(AdminState::default()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> AdminId {
        self.inner.id
    }

    /// Class name of the wrapped instance, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakAdministration {
        WeakAdministration {
            id: self.inner.id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Register `subscriber` for `keys`, replacing any earlier interest set.
    pub fn subscribe<K: Into<PropertyKey>>(
        &self,
        subscriber: &Subscriber,
        keys: impl IntoIterator<Item = K>,
    ) {
        let keys: IndexSet<PropertyKey> = keys.into_iter().map(Into::into).collect();
        trace!(admin = self.inner.id.0, keys = keys.len(), "observa.subscribe");
        self.inner.state.borrow_mut().subscribers.insert(
            subscriber.addr(),
            Interest {
                target: subscriber.clone(),
                keys,
            },
        );
    }

    /// Remove `subscriber`. Returns whether it was registered.
    pub fn unsubscribe(&self, subscriber: &Subscriber) -> bool {
        self.inner
            .state
            .borrow_mut()
            .subscribers
            .shift_remove(&subscriber.addr())
            .is_some()
    }

    /// Add a raw listener. Returns `false` if it was already present.
    pub fn listen(&self, listener: &Listener) -> bool {
        self.inner.state.borrow_mut().listeners.insert(listener.clone())
    }

    /// Remove a raw listener. Returns whether it was present.
    pub fn unlisten(&self, listener: &Listener) -> bool {
        self.inner.state.borrow_mut().listeners.shift_remove(listener)
    }

    /// Record a write of `property`.
    ///
    /// Runs listeners synchronously and asks the runtime for a flush. A panic
    /// in a listener propagates to the writer.
    pub fn report(&self, property: &PropertyKey, value: &Value) {
        let listeners: Vec<Listener> = {
            let mut state = self.inner.state.borrow_mut();
            if state.subscribers.is_empty() && state.listeners.is_empty() {
                return;
            }
            state.pending.insert(property.clone());
            state.listeners.iter().cloned().collect()
        };
        trace!(admin = self.inner.id.0, key = %property, "observa.report");
        for listener in &listeners {
            listener.call(property, value);
        }
        Runtime::global().request_flush(self);
    }

    /// Hand every subscriber interested in a pending change to the runtime,
    /// once each, then clear the pending set. Returns how many were handed on.
    pub(crate) fn flush(&self, runtime: &Runtime) -> usize {
        let due: Vec<Subscriber> = {
            let mut state = self.inner.state.borrow_mut();
            let changes = std::mem::take(&mut state.pending);
            let mut notified = IndexSet::new();
            let mut due = Vec::new();
            for change in &changes {
                for (addr, interest) in &state.subscribers {
                    if interest.keys.contains(change) && notified.insert(*addr) {
                        due.push(interest.target.clone());
                    }
                }
            }
            due
        };
        for subscriber in &due {
            runtime.notify(subscriber);
        }
        due.len()
    }

    /// Whether anyone would hear a write.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        let state = self.inner.state.borrow();
        !state.subscribers.is_empty() || !state.listeners.is_empty()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.borrow().subscribers.len()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.state.borrow().listeners.len()
    }

    /// Keys `subscriber` is currently interested in.
    #[must_use]
    pub fn interest(&self, subscriber: &Subscriber) -> Option<IndexSet<PropertyKey>> {
        self.inner
            .state
            .borrow()
            .subscribers
            .get(&subscriber.addr())
            .map(|interest| interest.keys.clone())
    }

    /// Keys written since the last flush.
    #[must_use]
    pub fn pending_changes(&self) -> Vec<PropertyKey> {
        self.inner.state.borrow().pending.iter().cloned().collect()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Administration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Administration")
            .field("id", &self.inner.id.0)
            .field("name", &self.inner.name)
            .field("subscribers", &state.subscribers.len())
            .field("listeners", &state.listeners.len())
            .field("pending", &state.pending)
            .finish()
    }
}
