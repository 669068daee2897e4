#![forbid(unsafe_code)]

//! The runtime: tracking engine plus notification scheduler.
//!
//! One [`Runtime`] is published per event-loop thread under [`RUNTIME_KEY`].
//! Every observable, administration and entry point on that thread reaches
//! the same instance through [`Runtime::global`], so independently created
//! components never split into isolated islands of state.
//!
//! # Event-loop integration
//!
//! Writes never notify synchronously. The host decides when a coalescing
//! window closes:
//!
//! - [`poll`](Runtime::poll) once per loop turn flushes when the window has
//!   gone quiet;
//! - [`flush`](Runtime::flush) closes the current window immediately;
//! - [`run_until_idle`](Runtime::run_until_idle) keeps flushing until writes
//!   made by subscribers settle.
//!
//! # Failure Modes
//!
//! - **Tracked body fails or panics**: captured as an [`Exception`] in the
//!   statistics; the previous subscriptions stay in place.
//! - **Listener or subscriber panics**: not caught; unwinds out of `report`
//!   or `flush`. Subscribers queued after the failing one in that window are
//!   dropped.
//! - **Subscribers keep writing**: `run_until_idle` stops after
//!   `max_flush_rounds` with [`ReactiveError::FlushLimitExceeded`].

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, debug_span, trace, warn};

use crate::admin::{AdminId, Administration, Subscriber, WeakAdministration};
use crate::config::RuntimeConfig;
use crate::engine::{Engine, Frame, FrameGuard, Outcome, Work, WorkId};
use crate::error::{Exception, ReactiveError, Result};
use crate::global;
use crate::key::PropertyKey;
use crate::scheduler::Scheduler;
use crate::transaction::{Dispose, TransactionStats};

/// Well-known key the runtime is published under.
pub const RUNTIME_KEY: &str = "ObservableTransactions";

struct RuntimeInner {
    /// Configuration the runtime was published with.
    config: RuntimeConfig,
    /// Frame stack and track entries.
    engine: RefCell<Engine>,
    /// Dirty administrations and due subscribers.
    scheduler: RefCell<Scheduler>,
}

impl RuntimeInner {
    fn new(config: RuntimeConfig) -> Self {
        let scheduler = Scheduler::new(config.clock.clone(), config.coalesce_window);
        Self {
            config,
            engine: RefCell::new(Engine::default()),
            scheduler: RefCell::new(scheduler),
        }
    }
}

/// Handle to the per-thread reactive runtime. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// The published runtime, created from [`RuntimeConfig::from_env`] on
    /// first use.
    ///
    /// # Panics
    ///
    /// Panics if something other than a runtime was published under
    /// [`RUNTIME_KEY`].
    #[must_use]
    pub fn global() -> Self {
        Self::try_global().unwrap_or_else(|err| panic!("observa runtime unavailable: {err}"))
    }

    pub fn try_global() -> Result<Self> {
        Self::global_or_install(RuntimeConfig::from_env)
    }

    /// Reuse the published runtime; `config` only runs when none exists.
    fn global_or_install(config: impl FnOnce() -> RuntimeConfig) -> Result<Self> {
        match global::lookup::<RuntimeInner>(RUNTIME_KEY)? {
            Some(inner) => Ok(Self { inner }),
            None => Self::install(config()),
        }
    }

    /// Publish a runtime built from `config` unless one already exists.
    ///
    /// Returns the published runtime either way; inspect
    /// [`config`](Runtime::config) to see which configuration won.
    pub fn install(config: RuntimeConfig) -> Result<Self> {
        global::publish(RUNTIME_KEY, || {
            debug!(
                window_us = config.coalesce_window.as_micros() as u64,
                max_rounds = config.max_flush_rounds,
                "observa.runtime.init"
            );
            RuntimeInner::new(config)
        })
        .map(|inner| Self { inner })
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Tracking ─────────────────────────────────────────────────────

    /// Run `work` once under tracking and wire `callback` to what it read.
    ///
    /// On success the callback is subscribed to every administration read,
    /// for exactly the keys read, and unsubscribed from administrations the
    /// previous run read but this one did not. On failure nothing is wired
    /// and the exception is recorded in the returned statistics.
    pub fn transaction(&self, work: &Work, callback: &Subscriber) -> TransactionStats {
        let id = work.id();
        let span = debug_span!("observa.transaction", work = id.0);
        let _enter = span.enter();

        let generation = self.inner.engine.borrow_mut().begin(work);
        let outcome = {
            let _frame = FrameGuard::enter(&self.inner.engine, Frame::Tracked(id));
            panic::catch_unwind(AssertUnwindSafe(|| work.run()))
                .unwrap_or_else(|payload| Err(Exception::from_panic(payload)))
        };
        self.settle(id, generation, outcome, callback)
    }

    fn settle(
        &self,
        id: WorkId,
        generation: u64,
        outcome: Outcome,
        callback: &Subscriber,
    ) -> TransactionStats {
        let dispose = Dispose::new(self.clone(), id, generation);
        let mut subscribe = Vec::new();
        let mut unsubscribe: Vec<(Administration, Subscriber)> = Vec::new();

        let stats = {
            let mut engine = self.inner.engine.borrow_mut();
            let Some(entry) = engine.entry_mut(id, generation) else {
                // Disposed while running.
                debug!(work = id.0, "observa.transaction.detached");
                return TransactionStats::detached(outcome, dispose);
            };
            match outcome {
                Ok(value) => {
                    entry.count += 1;
                    entry.result = value;
                    entry.exception = None;

                    let live = entry.read.live();
                    let wired: IndexMap<AdminId, WeakAdministration> = live
                        .iter()
                        .map(|(admin, _)| (admin.id(), admin.downgrade()))
                        .collect();
                    let previous_wiring = std::mem::replace(&mut entry.wired, wired);
                    let previous_callback = entry.callback.replace(callback.clone());
                    for (admin_id, weak) in previous_wiring {
                        let Some(admin) = weak.upgrade() else {
                            continue;
                        };
                        match &previous_callback {
                            Some(old) if old != callback => unsubscribe.push((admin, old.clone())),
                            _ if !entry.wired.contains_key(&admin_id) => {
                                unsubscribe.push((admin, callback.clone()));
                            }
                            _ => {}
                        }
                    }
                    debug!(
                        work = id.0,
                        count = entry.count,
                        reads = entry.read.len(),
                        dropped = unsubscribe.len(),
                        "observa.transaction.wired"
                    );
                    subscribe = live;
                }
                Err(exception) => {
                    warn!(work = id.0, error = %exception, "observa.transaction.failed");
                    entry.exception = Some(exception);
                }
            }
            TransactionStats::snapshot(entry, dispose)
        };

        for (admin, subscriber) in unsubscribe {
            admin.unsubscribe(&subscriber);
        }
        for (admin, keys) in subscribe {
            admin.subscribe(callback, keys);
        }
        stats
    }

    /// Latest statistics of a tracked function, if it is still tracked.
    #[must_use]
    pub fn stats(&self, work: &Work) -> Option<TransactionStats> {
        let engine = self.inner.engine.borrow();
        let entry = engine.entry(work.id())?;
        let dispose = Dispose::new(self.clone(), work.id(), entry.generation);
        Some(TransactionStats::snapshot(entry, dispose))
    }

    #[must_use]
    pub fn is_tracked(&self, work: &Work) -> bool {
        self.inner.engine.borrow().entry(work.id()).is_some()
    }

    /// Number of functions with live tracking entries.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.inner.engine.borrow().len()
    }

    /// Whether a read right now would be attributed to a tracked function.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        matches!(self.inner.engine.borrow().top(), Some(Frame::Tracked(_)))
    }

    /// Depth of the tracking call stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.engine.borrow().depth()
    }

    /// Run `f` with reads not attributed to any tracked function.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = FrameGuard::enter(&self.inner.engine, Frame::Untracked);
        f()
    }

    pub(crate) fn report_read(&self, admin: &Administration, key: &PropertyKey) {
        if !key.is_trackable() {
            return;
        }
        if self.inner.engine.borrow_mut().record_read(admin, key) {
            trace!(admin = admin.id().0, key = %key, "observa.read");
        }
    }

    /// Remove a tracking entry and purge its live subscriptions.
    pub(crate) fn dispose(&self, id: WorkId, generation: u64) -> bool {
        let Some(entry) = self.inner.engine.borrow_mut().remove(id, generation) else {
            return false;
        };
        if let Some(callback) = &entry.callback {
            for weak in entry.wired.values() {
                if let Some(admin) = weak.upgrade() {
                    admin.unsubscribe(callback);
                }
            }
            self.inner.scheduler.borrow_mut().cancel(callback);
        }
        debug!(work = id.0, wired = entry.wired.len(), "observa.dispose");
        drop(entry);
        true
    }

    pub(crate) fn is_live(&self, id: WorkId, generation: u64) -> bool {
        self.inner
            .engine
            .borrow()
            .entry(id)
            .is_some_and(|entry| entry.generation == generation)
    }

    // ── Scheduling ───────────────────────────────────────────────────

    pub(crate) fn request_flush(&self, admin: &Administration) {
        self.inner
            .scheduler
            .borrow_mut()
            .request_flush(admin.downgrade());
    }

    /// Queue `subscriber` for the next flush; repeated calls within one
    /// window collapse into a single invocation.
    pub fn notify(&self, subscriber: &Subscriber) {
        self.inner.scheduler.borrow_mut().notify(subscriber);
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.inner.scheduler.borrow().has_pending()
    }

    /// Subscribers already queued for invocation.
    #[must_use]
    pub fn pending_notifications(&self) -> usize {
        self.inner.scheduler.borrow().pending_len()
    }

    /// Whether the coalescing deadline has passed.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.inner.scheduler.borrow().is_due()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<web_time::Instant> {
        self.inner.scheduler.borrow().deadline()
    }

    /// Windows flushed so far.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.inner.scheduler.borrow().flushes()
    }

    /// Close the current window: distribute pending changes and invoke each
    /// due subscriber once. Returns the number of subscribers invoked.
    pub fn flush(&self) -> usize {
        let window = self.inner.scheduler.borrow_mut().begin_window();
        let span = debug_span!("observa.flush", admins = window.administrations.len());
        let _enter = span.enter();

        for weak in &window.administrations {
            if let Some(admin) = weak.upgrade() {
                admin.flush(self);
            }
        }
        let due = self.inner.scheduler.borrow_mut().take_pending();
        debug!(subscribers = due.len(), "observa.flush.invoke");
        for subscriber in &due {
            subscriber.invoke();
        }
        due.len()
    }

    /// Flush if the coalescing window has gone quiet.
    pub fn poll(&self) -> usize {
        if self.is_due() { self.flush() } else { 0 }
    }

    /// Flush repeatedly until nothing is pending. Returns the number of
    /// rounds.
    pub fn run_until_idle(&self) -> Result<usize> {
        let limit = self.inner.config.max_flush_rounds;
        let mut rounds = 0;
        while self.has_pending() {
            if rounds >= limit {
                warn!(rounds, "observa.flush.limit");
                return Err(ReactiveError::FlushLimitExceeded { rounds });
            }
            self.flush();
            rounds += 1;
        }
        Ok(rounds)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = self.inner.engine.borrow();
        let scheduler = self.inner.scheduler.borrow();
        f.debug_struct("Runtime")
            .field("tracked", &engine.len())
            .field("depth", &engine.depth())
            .field("pending", &scheduler.pending_len())
            .field("flushes", &scheduler.flushes())
            .finish()
    }
}
