#![forbid(unsafe_code)]

//! Keyed global slots with check-and-publish semantics.
//!
//! The slot table plays the role of a shared global object: independent
//! components that agree on a well-known key reach the same instance. The
//! first successful [`publish`] wins; later initialisers are discarded and
//! receive the published value instead.
//!
//! State is per thread, matching the single-threaded execution model of the
//! values stored here (`Rc`, not `Send`).

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::error::{ReactiveError, Result};

thread_local! {
    static SLOTS: RefCell<AHashMap<&'static str, Rc<dyn Any>>> = RefCell::new(AHashMap::new());
}

fn downcast<T: 'static>(key: &'static str, slot: Rc<dyn Any>) -> Result<Rc<T>> {
    slot.downcast::<T>()
        .map_err(|_| ReactiveError::SlotTypeMismatch { key })
}

/// Look up the value published under `key`.
pub fn lookup<T: 'static>(key: &'static str) -> Result<Option<Rc<T>>> {
    let slot = SLOTS.with(|slots| slots.borrow().get(key).cloned());
    slot.map(|slot| downcast(key, slot)).transpose()
}

/// Return the value under `key`, publishing `init()` first if the slot is
/// empty.
///
/// `init` runs with no borrow held, so it may itself publish. If the slot
/// was filled while `init` ran, that value wins and `init`'s is dropped.
pub fn publish<T: 'static>(key: &'static str, init: impl FnOnce() -> T) -> Result<Rc<T>> {
    if let Some(existing) = lookup::<T>(key)? {
        return Ok(existing);
    }
    let candidate: Rc<dyn Any> = Rc::new(init());
    let slot = SLOTS.with(|slots| {
        Rc::clone(
            slots
                .borrow_mut()
                .entry(key)
                .or_insert(candidate),
        )
    });
    downcast(key, slot)
}

#[must_use]
pub fn is_published(key: &'static str) -> bool {
    SLOTS.with(|slots| slots.borrow().contains_key(key))
}
