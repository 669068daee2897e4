#![forbid(unsafe_code)]

//! Dependency-tracking engine state.
//!
//! Holds the call stack of running tracked functions and, per tracked
//! function, the log of `(administration, property)` pairs it read during
//! its latest execution. The orchestration (running the body, wiring
//! subscriptions, disposal) lives on [`Runtime`](crate::Runtime); this module
//! owns the state transitions.
//!
//! # State machine
//!
//! ```text
//! Idle --begin--> Running --(body returns / fails / panics)--> Idle
//!                   |
//!                   +-- every tracked read appends to the read log
//! ```
//!
//! The read log is replaced, not merged, when a run begins, so keys not read
//! by the latest run drop out on their own.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};

use crate::admin::{AdminId, Administration, Subscriber, WeakAdministration};
use crate::error::Exception;
use crate::key::PropertyKey;
use crate::object::Observable;
use crate::value::Value;

/// Result of one tracked execution.
pub type Outcome = std::result::Result<Value, Exception>;

/// Identity of a tracked function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkId(pub usize);

/// A function that can run under tracking.
///
/// Identity is the allocation: clones are the same tracked function.
#[derive(Clone)]
pub struct Work(Rc<dyn Fn() -> Outcome>);

impl Work {
    pub fn new(f: impl Fn() -> Outcome + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Wrap a body that cannot fail (other than by panicking).
    pub fn infallible<R: Into<Value>>(f: impl Fn() -> R + 'static) -> Self {
        Self(Rc::new(move || Ok(f().into())))
    }

    #[must_use]
    pub fn id(&self) -> WorkId {
        WorkId(Rc::as_ptr(&self.0) as *const () as usize)
    }

    pub(crate) fn run(&self) -> Outcome {
        (self.0)()
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Work({:#x})", self.id().0)
    }
}

// ---------------------------------------------------------------------------
// Read set
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ReadEntry {
    /// The administration read; weak so the log never keeps objects alive.
    admin: WeakAdministration,
    /// Properties read on it, in first-read order.
    keys: IndexSet<PropertyKey>,
}

/// The `(administration, property)` pairs read during one execution.
#[derive(Clone, Default)]
pub struct ReadSet {
    entries: IndexMap<AdminId, ReadEntry>,
}

impl ReadSet {
    /// Number of `(administration, property)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(|entry| entry.keys.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn admins(&self) -> impl Iterator<Item = AdminId> + '_ {
        self.entries.keys().copied()
    }

    #[must_use]
    pub fn keys(&self, admin: AdminId) -> Option<&IndexSet<PropertyKey>> {
        self.entries.get(&admin).map(|entry| &entry.keys)
    }

    #[must_use]
    pub fn contains(&self, admin: AdminId, key: &PropertyKey) -> bool {
        self.keys(admin).is_some_and(|keys| keys.contains(key))
    }

    /// Whether `key` of `object` was read.
    #[must_use]
    pub fn reads(&self, object: &Observable, key: impl Into<PropertyKey>) -> bool {
        self.contains(object.admin().id(), &key.into())
    }

    fn record(&mut self, admin: &Administration, key: &PropertyKey) -> bool {
        self.entries
            .entry(admin.id())
            .or_insert_with(|| ReadEntry {
                admin: admin.downgrade(),
                keys: IndexSet::new(),
            })
            .keys
            .insert(key.clone())
    }

    /// Administrations still alive, with the keys read from each.
    pub(crate) fn live(&self) -> Vec<(Administration, IndexSet<PropertyKey>)> {
        self.entries
            .values()
            .filter_map(|entry| entry.admin.upgrade().map(|admin| (admin, entry.keys.clone())))
            .collect()
    }
}

impl fmt::Debug for ReadSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(id, entry)| (id.0, &entry.keys)))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Frame {
    Tracked(WorkId),
    /// Reads inside an `untracked` section are not attributed.
    Untracked,
}

/// Bookkeeping for one tracked function.
pub(crate) struct TrackEntry {
    /// Pins the function so its address stays a valid identity.
    pub(crate) _work: Work,
    /// Distinguishes this entry from later ones for the same function.
    pub(crate) generation: u64,
    /// Successful runs so far.
    pub(crate) count: u64,
    /// Reads of the current or most recent run.
    pub(crate) read: ReadSet,
    /// Administrations the callback is currently subscribed to.
    pub(crate) wired: IndexMap<AdminId, WeakAdministration>,
    /// Callback wired by the last successful run.
    pub(crate) callback: Option<Subscriber>,
    /// Failure of the most recent run, cleared by the next success.
    pub(crate) exception: Option<Exception>,
    /// Return value of the last successful run.
    pub(crate) result: Value,
}

#[derive(Default)]
pub(crate) struct Engine {
    /// Innermost frame last.
    stack: Vec<Frame>,
    /// Live entries by function identity.
    track: AHashMap<WorkId, TrackEntry>,
    /// Source of entry generations.
    next_generation: u64,
}

impl Engine {
    /// Prepare `work` for a run: create its entry if needed and clear its
    /// read log. Returns the entry generation.
    pub(crate) fn begin(&mut self, work: &Work) -> u64 {
        let next_generation = &mut self.next_generation;
        let entry = self.track.entry(work.id()).or_insert_with(|| {
            *next_generation += 1;
            TrackEntry {
                _work: work.clone(),
                generation: *next_generation,
                count: 0,
                read: ReadSet::default(),
                wired: IndexMap::new(),
                callback: None,
                exception: None,
                result: Value::Undefined,
            }
        });
        entry.read = ReadSet::default();
        entry.generation
    }

    pub(crate) fn push(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        self.stack.pop()
    }

    /// Attribute a read to the innermost running tracked function.
    /// Returns whether the read was new for that function.
    pub(crate) fn record_read(&mut self, admin: &Administration, key: &PropertyKey) -> bool {
        let Some(Frame::Tracked(id)) = self.stack.last() else {
            return false;
        };
        match self.track.get_mut(id) {
            Some(entry) => entry.read.record(admin, key),
            None => false,
        }
    }

    pub(crate) fn top(&self) -> Option<Frame> {
        self.stack.last().copied()
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn entry(&self, id: WorkId) -> Option<&TrackEntry> {
        self.track.get(&id)
    }

    /// The entry for `id`, only if it is still the generation that began.
    pub(crate) fn entry_mut(&mut self, id: WorkId, generation: u64) -> Option<&mut TrackEntry> {
        self.track
            .get_mut(&id)
            .filter(|entry| entry.generation == generation)
    }

    pub(crate) fn remove(&mut self, id: WorkId, generation: u64) -> Option<TrackEntry> {
        if self.entry_mut(id, generation).is_some() {
            self.track.remove(&id)
        } else {
            None
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.track.len()
    }
}

/// Pops the frame it pushed, also when the section unwinds.
pub(crate) struct FrameGuard<'a> {
    engine: &'a RefCell<Engine>,
}

impl<'a> FrameGuard<'a> {
    pub(crate) fn enter(engine: &'a RefCell<Engine>, frame: Frame) -> Self {
        engine.borrow_mut().push(frame);
        Self { engine }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.engine.borrow_mut().pop();
    }
}
