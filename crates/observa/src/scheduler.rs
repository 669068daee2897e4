#![forbid(unsafe_code)]

//! Notification scheduler.
//!
//! Collects administrations with pending changes and subscribers due for
//! re-invocation, deduplicated, behind one coalescing deadline. Every
//! request rearms the deadline to `now + window`, so a burst of writes
//! produces a single flush once the burst goes quiet (trailing edge).
//!
//! The scheduler only holds state; [`Runtime`](crate::Runtime) drives it,
//! because invoking subscribers must happen with no borrow outstanding.

use std::cell::Cell;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use web_time::{Duration, Instant};

use crate::admin::{AdminId, Subscriber, WeakAdministration};

// ---------------------------------------------------------------------------
// Time source
// ---------------------------------------------------------------------------

/// Time source for the coalescing deadline.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    /// Wall-clock time.
    #[default]
    System,
    /// Manually advanced time for deterministic tests.
    Manual(ManualClock),
}

impl Clock {
    #[must_use]
    pub fn now(&self) -> Instant {
        match self {
            Self::System => Instant::now(),
            Self::Manual(clock) => clock.now(),
        }
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same offset.
#[derive(Debug, Clone)]
pub struct ManualClock {
    epoch: Instant,
    offset: Rc<Cell<Duration>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.offset.set(self.offset.get() + delta);
    }

    #[must_use]
    pub fn now(&self) -> Instant {
        self.epoch + self.offset.get()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Scheduler state
// ---------------------------------------------------------------------------

/// Work collected for the next flush window.
pub(crate) struct Window {
    pub(crate) administrations: Vec<WeakAdministration>,
}

pub(crate) struct Scheduler {
    /// Time source for deadlines.
    clock: Clock,
    /// Quiet period that closes a window.
    window: Duration,
    /// Administrations with unflushed changes.
    dirty: IndexMap<AdminId, WeakAdministration>,
    /// Subscribers due at the next flush, deduplicated.
    pending: IndexSet<Subscriber>,
    /// Trailing-edge deadline, re-armed by every request.
    deadline: Option<Instant>,
    /// Windows flushed so far.
    flushes: u64,
}

impl Scheduler {
    pub(crate) fn new(clock: Clock, window: Duration) -> Self {
        Self {
            clock,
            window,
            dirty: IndexMap::new(),
            pending: IndexSet::new(),
            deadline: None,
            flushes: 0,
        }
    }

    fn rearm(&mut self) {
        self.deadline = Some(self.clock.now() + self.window);
    }

    /// Queue an administration whose pending changes need distributing.
    pub(crate) fn request_flush(&mut self, admin: WeakAdministration) {
        self.dirty.insert(admin.id(), admin);
        self.rearm();
    }

    /// Queue a subscriber; duplicates within a window collapse.
    pub(crate) fn notify(&mut self, subscriber: &Subscriber) -> bool {
        let fresh = self.pending.insert(subscriber.clone());
        self.rearm();
        fresh
    }

    pub(crate) fn cancel(&mut self, subscriber: &Subscriber) -> bool {
        self.pending.shift_remove(subscriber)
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.dirty.is_empty() || !self.pending.is_empty()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_due(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| self.clock.now() >= deadline)
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn flushes(&self) -> u64 {
        self.flushes
    }

    pub(crate) fn begin_window(&mut self) -> Window {
        self.flushes += 1;
        Window {
            administrations: std::mem::take(&mut self.dirty).into_values().collect(),
        }
    }

    /// Subscribers to invoke for the current window. Disarms the deadline;
    /// anything queued after this belongs to the next window.
    pub(crate) fn take_pending(&mut self) -> Vec<Subscriber> {
        self.deadline = None;
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}
