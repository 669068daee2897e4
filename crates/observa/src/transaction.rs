#![forbid(unsafe_code)]

//! Public entry points: [`transaction`], [`autorun`] and disposal.
//!
//! ```
//! use observa::{Observable, Runtime, autorun};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let state = Observable::from_fields([("count", 0)]);
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let dispose = autorun({
//!     let (state, log) = (state.clone(), Rc::clone(&log));
//!     move || log.borrow_mut().push(state.get("count").to_string())
//! });
//! assert_eq!(*log.borrow(), ["0"]);
//!
//! state.set("count", 1);
//! Runtime::global().flush();
//! assert_eq!(*log.borrow(), ["0", "1"]);
//!
//! // Same value again: no notification.
//! state.set("count", 1);
//! Runtime::global().flush();
//! assert_eq!(log.borrow().len(), 2);
//!
//! dispose.dispose();
//! ```

use std::fmt;
use std::rc::{Rc, Weak};

use crate::admin::{Notify, Subscriber};
use crate::engine::{Outcome, ReadSet, TrackEntry, Work, WorkId};
use crate::error::Exception;
use crate::runtime::Runtime;
use crate::value::Value;

/// Idempotent handle removing a tracked function's bookkeeping.
///
/// Disposing removes the tracking entry, unsubscribes the callback from
/// every administration it was wired to, and drops it from the pending
/// notification set.
#[derive(Clone)]
pub struct Dispose {
    runtime: Runtime,
    work: WorkId,
    generation: u64,
}

impl Dispose {
    pub(crate) fn new(runtime: Runtime, work: WorkId, generation: u64) -> Self {
        Self {
            runtime,
            work,
            generation,
        }
    }

    /// Returns `true` the first time, `false` on every later call.
    pub fn dispose(&self) -> bool {
        self.runtime.dispose(self.work, self.generation)
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        !self.runtime.is_live(self.work, self.generation)
    }
}

impl fmt::Debug for Dispose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispose")
            .field("work", &self.work)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Statistics of a tracked function after its latest run.
#[derive(Debug, Clone)]
pub struct TransactionStats {
    /// Successful runs so far.
    pub count: u64,
    /// What the latest run read.
    pub read: ReadSet,
    /// Failure of the latest run, if it failed.
    pub exception: Option<Exception>,
    /// Return value of the latest successful run.
    pub result: Value,
    pub dispose: Dispose,
}

impl TransactionStats {
    pub(crate) fn snapshot(entry: &TrackEntry, dispose: Dispose) -> Self {
        Self {
            count: entry.count,
            read: entry.read.clone(),
            exception: entry.exception.clone(),
            result: entry.result.clone(),
            dispose,
        }
    }

    /// Statistics for a run whose entry was disposed while it executed.
    pub(crate) fn detached(outcome: Outcome, dispose: Dispose) -> Self {
        let (result, exception) = match outcome {
            Ok(value) => (value, None),
            Err(exception) => (Value::Undefined, Some(exception)),
        };
        Self {
            count: 0,
            read: ReadSet::default(),
            exception,
            result,
            dispose,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.exception.is_none()
    }
}

/// Run `work` once under tracking on the global runtime and subscribe
/// `callback` to everything it read.
pub fn transaction(work: &Work, callback: &Subscriber) -> TransactionStats {
    Runtime::global().transaction(work, callback)
}

/// Self-scheduling re-run target of an autorun.
struct Rerun {
    work: Work,
    this: Weak<Rerun>,
}

impl Notify for Rerun {
    fn notify(&self) {
        let runtime = Runtime::global();
        if !runtime.is_tracked(&self.work) {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            runtime.transaction(&self.work, &Subscriber::from_rc(this));
        }
    }
}

fn start(work: Work) -> Dispose {
    let rerun = Rc::new_cyclic(|this| Rerun {
        work: work.clone(),
        this: this.clone(),
    });
    transaction(&work, &Subscriber::from_rc(rerun)).dispose
}

/// Run `f` now and again, under tracking, whenever anything it read
/// changes. Dependencies are rewired on every run.
pub fn autorun(f: impl Fn() + 'static) -> Dispose {
    start(Work::infallible(f))
}

/// [`autorun`] for bodies that can fail. A failing run keeps the
/// subscriptions of the last successful one.
pub fn autorun_fallible(f: impl Fn() -> Result<(), Exception> + 'static) -> Dispose {
    start(Work::new(move || f().map(Value::from)))
}

/// Run `f` on the global runtime with reads not attributed.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    Runtime::global().untracked(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Observable;
    use std::cell::{Cell, RefCell};

    fn hits() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let hits = Rc::new(Cell::new(0));
        (Rc::clone(&hits), hits)
    }

    #[test]
    fn concrete_counter_scenario() {
        let runtime = Runtime::global();
        let state = Observable::from_fields([("count", 0)]);
        let log = Rc::new(RefCell::new(Vec::new()));

        let _dispose = autorun({
            let (state, log) = (state.clone(), Rc::clone(&log));
            move || log.borrow_mut().push(state.get("count"))
        });
        assert_eq!(*log.borrow(), [Value::from(0)]);

        state.set("count", 1);
        assert_eq!(log.borrow().len(), 1, "notifications are deferred");
        runtime.flush();
        assert_eq!(*log.borrow(), [Value::from(0), Value::from(1)]);

        state.set("count", 1);
        runtime.flush();
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn transaction_reports_reads_and_result() {
        let state = Observable::from_fields([("a", 1), ("b", 2)]);
        let work = Work::new({
            let state = state.clone();
            move || {
                let a = state.get("a").as_f64().unwrap_or_default();
                let b = state.get("b").as_f64().unwrap_or_default();
                Ok(Value::from(a + b))
            }
        });
        let stats = transaction(&work, &Subscriber::new(|| {}));
        assert_eq!(stats.count, 1);
        assert_eq!(stats.result, Value::from(3));
        assert!(stats.read.reads(&state, "a"));
        assert!(stats.read.reads(&state, "b"));
        assert_eq!(stats.read.len(), 2);
        assert!(stats.is_ok());

        let again = transaction(&work, &Subscriber::new(|| {}));
        assert_eq!(again.count, 2);
    }

    #[test]
    fn callback_fires_once_per_window() {
        let runtime = Runtime::global();
        let state = Observable::from_fields([("a", 1), ("b", 2)]);
        let (counter, seen) = hits();
        let callback = Subscriber::new(move || counter.set(counter.get() + 1));
        let work = Work::infallible({
            let state = state.clone();
            move || {
                state.get("b");
                state.get("a")
            }
        });
        let _stats = transaction(&work, &callback);

        state.set("a", 10);
        state.set("b", 20);
        state.set("a", 11);
        runtime.flush();
        assert_eq!(seen.get(), 1);

        runtime.flush();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn failed_run_wires_nothing_and_is_not_rethrown() {
        let runtime = Runtime::global();
        let state = Observable::from_fields([("x", 0)]);
        let (counter, seen) = hits();
        let callback = Subscriber::new(move || counter.set(counter.get() + 1));
        let work = Work::new({
            let state = state.clone();
            move || {
                state.get("x");
                Err(Exception::thrown("bad"))
            }
        });

        let stats = transaction(&work, &callback);
        assert_eq!(stats.exception, Some(Exception::thrown("bad")));
        assert_eq!(stats.count, 0);
        assert_eq!(state.admin().subscriber_count(), 0);

        state.set("x", 1);
        runtime.flush();
        assert_eq!(seen.get(), 0);
    }

    #[test]
    fn panics_are_captured() {
        let stats = transaction(
            &Work::infallible(|| -> Value { panic!("kaboom") }),
            &Subscriber::new(|| {}),
        );
        assert_eq!(stats.exception, Some(Exception::Panicked("kaboom".into())));
        assert_eq!(Runtime::global().depth(), 0);
    }

    #[test]
    fn dispose_is_idempotent_and_purges() {
        let runtime = Runtime::global();
        let state = Observable::from_fields([("x", 0)]);
        let (counter, seen) = hits();
        let dispose = autorun({
            let state = state.clone();
            move || {
                state.get("x");
                counter.set(counter.get() + 1);
            }
        });
        assert_eq!(seen.get(), 1);
        assert_eq!(runtime.tracked_count(), 1);

        state.set("x", 1);
        assert!(dispose.dispose());
        assert!(!dispose.dispose());
        assert!(dispose.is_disposed());
        assert_eq!(runtime.tracked_count(), 0);
        assert_eq!(state.admin().subscriber_count(), 0);

        runtime.flush();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn stale_dispose_handles_do_not_touch_new_entries() {
        let runtime = Runtime::global();
        let work = Work::infallible(|| ());
        let first = transaction(&work, &Subscriber::new(|| {})).dispose;
        assert!(first.dispose());

        let second = transaction(&work, &Subscriber::new(|| {})).dispose;
        assert!(!first.dispose());
        assert!(runtime.is_tracked(&work));
        assert!(second.dispose());
    }

    #[test]
    fn autorun_rewires_conditional_dependencies() {
        let runtime = Runtime::global();
        let gate = Observable::from_fields([("even", true)]);
        let other = Observable::from_fields([("p", 0)]);
        let (counter, runs) = hits();
        let _dispose = autorun({
            let (gate, other) = (gate.clone(), other.clone());
            move || {
                counter.set(counter.get() + 1);
                if gate.get("even") == Value::Bool(true) {
                    other.get("p");
                }
            }
        });
        assert_eq!(runs.get(), 1);
        assert_eq!(other.admin().subscriber_count(), 1);

        gate.set("even", false);
        runtime.flush();
        assert_eq!(runs.get(), 2);
        assert_eq!(other.admin().subscriber_count(), 0);

        other.set("p", 1);
        runtime.flush();
        assert_eq!(runs.get(), 2, "stale dependency must not fire");
    }

    #[test]
    fn untracked_reads_are_not_dependencies() {
        let state = Observable::from_fields([("a", 1), ("b", 2)]);
        let work = Work::infallible({
            let state = state.clone();
            move || {
                state.get("a");
                untracked(|| state.get("b"))
            }
        });
        let stats = transaction(&work, &Subscriber::new(|| {}));
        assert!(stats.read.reads(&state, "a"));
        assert!(!stats.read.reads(&state, "b"));
    }

    #[test]
    fn nested_transactions_attribute_reads_separately() {
        let state = Observable::from_fields([("outer", 1), ("inner", 2)]);
        let inner_work = Work::infallible({
            let state = state.clone();
            move || state.get("inner")
        });
        let inner_stats = Rc::new(RefCell::new(None));
        let outer_work = Work::infallible({
            let (state, inner_work, inner_stats) =
                (state.clone(), inner_work.clone(), Rc::clone(&inner_stats));
            move || {
                state.get("outer");
                *inner_stats.borrow_mut() =
                    Some(transaction(&inner_work, &Subscriber::new(|| {})));
            }
        });
        let outer = transaction(&outer_work, &Subscriber::new(|| {}));
        assert!(outer.read.reads(&state, "outer"));
        assert!(!outer.read.reads(&state, "inner"));

        let inner = inner_stats.borrow_mut().take().unwrap();
        assert!(inner.read.reads(&state, "inner"));
        assert!(!inner.read.reads(&state, "outer"));
    }

    #[test]
    fn fallible_autorun_keeps_last_good_wiring() {
        let runtime = Runtime::global();
        let state = Observable::from_fields([("n", 1)]);
        let (counter, runs) = hits();
        let _dispose = autorun_fallible({
            let state = state.clone();
            move || {
                counter.set(counter.get() + 1);
                match state.get("n").as_f64() {
                    Some(n) if n < 0.0 => Err(Exception::thrown("negative")),
                    _ => Ok(()),
                }
            }
        });

        state.set("n", -1);
        runtime.flush();
        assert_eq!(runs.get(), 2);

        // Still subscribed through the first run's wiring.
        state.set("n", 2);
        runtime.flush();
        assert_eq!(runs.get(), 3);
    }
}
