#![forbid(unsafe_code)]

//! Fine-grained reactive dependency tracking for observable objects.
//!
//! - [`Observable`]: a plain object whose property reads are attributed to
//!   the running tracked function and whose writes are reported to its
//!   [`Administration`].
//! - [`Container`]: lists, maps, sets and dates bound to a field of an
//!   observable, with a per-kind operation table.
//! - [`transaction`] / [`autorun`]: run a function under tracking and
//!   re-invoke a callback (or the function itself) when something it read
//!   changes.
//! - [`Runtime`]: the per-thread engine and coalescing scheduler every
//!   component shares.
//!
//! # Architecture
//!
//! Everything is single-threaded (`Rc`/`RefCell`). The runtime is published
//! once per thread under [`RUNTIME_KEY`]. Writes queue their administration
//! for a flush; the host closes coalescing windows with
//! [`Runtime::poll`], [`Runtime::flush`] or [`Runtime::run_until_idle`].
//!
//! # Invariants
//!
//! 1. A read is attributed only to the innermost running tracked function.
//! 2. Writing a value identical to the current one notifies nobody.
//! 3. A callback runs at most once per flush window, however many of its
//!    dependencies changed.
//! 4. A failed run keeps the subscriptions of the last successful run.
//! 5. Disposing is idempotent and stops all further invocations.

pub mod admin;
pub mod class;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod global;
pub mod key;
pub mod object;
pub mod runtime;
pub mod scheduler;
pub mod transaction;
pub mod value;

pub use admin::{AdminId, Administration, Listener, Notify, Subscriber, WeakAdministration};
pub use class::{Class, ClassBuilder};
pub use config::RuntimeConfig;
pub use container::{
    Container, ContainerKind, DateField, MAX_LIST_INDEX, ObservableDate, ObservableList,
    ObservableMap, ObservableSet, OpClass, classify,
};
pub use engine::{Outcome, ReadSet, Work, WorkId};
pub use error::{Exception, ReactiveError, Result};
pub use key::{PropertyKey, Symbol};
pub use object::Observable;
pub use runtime::{RUNTIME_KEY, Runtime};
pub use scheduler::{Clock, ManualClock};
pub use transaction::{
    Dispose, TransactionStats, autorun, autorun_fallible, transaction, untracked,
};
pub use value::{Data, Function, Value};
