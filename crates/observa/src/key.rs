#![forbid(unsafe_code)]

//! Property keys.
//!
//! A key is either a name or a [`Symbol`]. Named keys are tracked; symbol
//! keys are reserved for bookkeeping and are never attributed to a tracked
//! function.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Registry behind [`Symbol::for_key`].
    static SYMBOL_REGISTRY: RefCell<AHashMap<Rc<str>, Symbol>> = RefCell::new(AHashMap::new());
}

/// A unique, non-trackable property key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    id: u64,
    description: Rc<str>,
}

impl Symbol {
    /// Create a fresh symbol, distinct from every other symbol.
    #[must_use]
    pub fn new(description: &str) -> Self {
        Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: Rc::from(description),
        }
    }

    /// Return the registered symbol for `key`, creating it on first use.
    #[must_use]
    pub fn for_key(key: &str) -> Self {
        SYMBOL_REGISTRY.with(|registry| {
            registry
                .borrow_mut()
                .entry(Rc::from(key))
                .or_insert_with(|| Self::new(key))
                .clone()
        })
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})#{}", self.description, self.id)
    }
}

/// Key of an observable property.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Name(Rc<str>),
    Symbol(Symbol),
}

impl PropertyKey {
    #[must_use]
    pub fn name(name: &str) -> Self {
        Self::Name(Rc::from(name))
    }

    /// Whether reads of this key may be attributed to a tracked function.
    #[must_use]
    pub fn is_trackable(&self) -> bool {
        matches!(self, Self::Name(_))
    }

    /// `<self>.<entry>`, the per-entry key used by map containers.
    #[must_use]
    pub fn qualified(&self, entry: &dyn fmt::Display) -> Self {
        Self::Name(Rc::from(format!("{self}.{entry}")))
    }

    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Symbol(_) => None,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Symbol(symbol) => write!(f, "Symbol({})", symbol.description),
        }
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name:?}"),
            Self::Symbol(symbol) => symbol.fmt(f),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        Self::name(name)
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        Self::Name(Rc::from(name))
    }
}

impl From<&String> for PropertyKey {
    fn from(name: &String) -> Self {
        Self::name(name)
    }
}

impl From<Symbol> for PropertyKey {
    fn from(symbol: Symbol) -> Self {
        Self::Symbol(symbol)
    }
}

impl From<&PropertyKey> for PropertyKey {
    fn from(key: &PropertyKey) -> Self {
        key.clone()
    }
}
