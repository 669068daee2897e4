#![forbid(unsafe_code)]

//! Container wrappers for lists, maps, sets and dates.
//!
//! A [`Container`] is bound to the field of the observable object that holds
//! it. Reads and writes made through the container are attributed to that
//! `(owner, field)` pair, except for maps, which track individual entries as
//! `field.entry`.
//!
//! Every operation a container understands is classified in one table
//! ([`classify`]):
//!
//! | kind | mutation | tracked read | ignored |
//! |------|----------|--------------|---------|
//! | list | `push pop shift unshift splice reverse sort fill copy_within set` | `includes index_of slice join to_vec` | `get len` |
//! | set  | `add delete clear` | `has values len` | |
//! | map  | `set delete` (entry), `clear` (field) | `get has` (entry) | `keys values entries len` |
//! | date | `set_time set_full_year set_month set_date set_hours set_minutes set_seconds set_milliseconds` | `get_*` counterparts, `get_day value_of to_iso_string` | |
//!
//! Ignored operations are raw data reads: they neither track nor report.
//! Date operations follow their prefix: every `set_*` is a mutation, the rest
//! are reads. Calendar fields are UTC and months count from zero.
//! Elements stored in a container are not wrapped.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Timelike};
use indexmap::{IndexMap, IndexSet};

use crate::admin::Administration;
use crate::error::{ReactiveError, Result};
use crate::key::PropertyKey;
use crate::object::{Observable, snapshot_value};
use crate::runtime::Runtime;
use crate::value::{Data, Value};

use OpClass::{Ignored, Mutation, Read};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    List,
    Map,
    Set,
    Date,
}

impl ContainerKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Map => "map",
            Self::Set => "set",
            Self::Date => "date",
        }
    }
}

/// How an operation interacts with tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// Reports a write once applied.
    Mutation,
    /// Records a tracked read.
    Read,
    /// Neither.
    Ignored,
}

/// Handler behind a named operation.
type Handler<V> = fn(&V, &str, &[Value]) -> Result<Value>;

/// One row of an operation table: name, tracking class, handler.
type OpRow<V> = (&'static str, OpClass, Handler<V>);

fn row<V: 'static>(table: &'static [OpRow<V>], op: &str) -> Option<&'static OpRow<V>> {
    table.iter().find(|(name, _, _)| *name == op)
}

/// Classify `op` for `kind`. `None` means the operation does not exist.
#[must_use]
pub fn classify(kind: ContainerKind, op: &str) -> Option<OpClass> {
    let class = match kind {
        ContainerKind::List => row(LIST_OPS, op)?.1,
        ContainerKind::Map => row(MAP_OPS, op)?.1,
        ContainerKind::Set => row(SET_OPS, op)?.1,
        ContainerKind::Date => row(DATE_OPS, op)?.1,
    };
    Some(class)
}

enum Store {
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<IndexMap<Value, Value>>>),
    Set(Rc<RefCell<IndexSet<Value>>>),
    Date(Rc<Cell<i64>>),
}

struct ContainerInner {
    /// Field of the owner this container was stored under.
    field: PropertyKey,
    /// Administration reads and writes are attributed to.
    owner: Administration,
    /// The wrapped data.
    store: Store,
}

/// A list, map, set or date bound to a field of an observable object.
#[derive(Clone)]
pub struct Container {
    inner: Rc<ContainerInner>,
}

/// Wrap raw data stored under `field` of `owner`.
pub(crate) fn wrap_data(data: Data, field: &PropertyKey, owner: &Administration) -> Value {
    let store = match data {
        Data::Record(fields) => return Value::Object(Observable::from_record(fields)),
        Data::List(items) => Store::List(Rc::new(RefCell::new(items))),
        Data::Map(entries) => Store::Map(Rc::new(RefCell::new(entries))),
        Data::Set(items) => Store::Set(Rc::new(RefCell::new(items))),
        Data::Date(millis) => Store::Date(Rc::new(Cell::new(millis))),
    };
    Value::Container(Container {
        inner: Rc::new(ContainerInner {
            field: field.clone(),
            owner: owner.clone(),
            store,
        }),
    })
}

impl Container {
    #[must_use]
    pub fn kind(&self) -> ContainerKind {
        match self.inner.store {
            Store::List(_) => ContainerKind::List,
            Store::Map(_) => ContainerKind::Map,
            Store::Set(_) => ContainerKind::Set,
            Store::Date(_) => ContainerKind::Date,
        }
    }

    /// The field of the owning object this container is bound to.
    #[must_use]
    pub fn field(&self) -> &PropertyKey {
        &self.inner.field
    }

    #[must_use]
    pub fn owner(&self) -> &Administration {
        &self.inner.owner
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    #[must_use]
    pub fn as_list(&self) -> Option<ObservableList> {
        match &self.inner.store {
            Store::List(items) => Some(ObservableList {
                container: self.clone(),
                items: Rc::clone(items),
            }),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<ObservableMap> {
        match &self.inner.store {
            Store::Map(entries) => Some(ObservableMap {
                container: self.clone(),
                entries: Rc::clone(entries),
            }),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_set(&self) -> Option<ObservableSet> {
        match &self.inner.store {
            Store::Set(items) => Some(ObservableSet {
                container: self.clone(),
                items: Rc::clone(items),
            }),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<ObservableDate> {
        match &self.inner.store {
            Store::Date(millis) => Some(ObservableDate {
                container: self.clone(),
                millis: Rc::clone(millis),
            }),
            _ => None,
        }
    }

    /// Invoke an operation by name.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::UnknownOperation`] for names missing from the
    /// operation table, [`ReactiveError::InvalidArgument`] for arguments of
    /// the wrong type.
    pub fn call(&self, op: &str, args: &[Value]) -> Result<Value> {
        match &self.inner.store {
            Store::List(items) => self.run(
                LIST_OPS,
                &ObservableList {
                    container: self.clone(),
                    items: Rc::clone(items),
                },
                op,
                args,
            ),
            Store::Map(entries) => self.run(
                MAP_OPS,
                &ObservableMap {
                    container: self.clone(),
                    entries: Rc::clone(entries),
                },
                op,
                args,
            ),
            Store::Set(items) => self.run(
                SET_OPS,
                &ObservableSet {
                    container: self.clone(),
                    items: Rc::clone(items),
                },
                op,
                args,
            ),
            Store::Date(millis) => self.run(
                DATE_OPS,
                &ObservableDate {
                    container: self.clone(),
                    millis: Rc::clone(millis),
                },
                op,
                args,
            ),
        }
    }

    fn run<V: 'static>(
        &self,
        table: &'static [OpRow<V>],
        view: &V,
        op: &str,
        args: &[Value],
    ) -> Result<Value> {
        let (_, _, handler) = row(table, op).ok_or_else(|| ReactiveError::UnknownOperation {
            kind: self.kind().name(),
            op: op.to_string(),
        })?;
        handler(view, op, args)
    }

    /// Raw copy of the contents, without tracking.
    #[must_use]
    pub fn snapshot(&self) -> Data {
        match &self.inner.store {
            Store::List(items) => Data::List(items.borrow().iter().map(snapshot_value).collect()),
            Store::Map(entries) => Data::Map(
                entries
                    .borrow()
                    .iter()
                    .map(|(key, value)| (key.clone(), snapshot_value(value)))
                    .collect(),
            ),
            Store::Set(items) => Data::Set(items.borrow().iter().cloned().collect()),
            Store::Date(millis) => Data::Date(millis.get()),
        }
    }

    fn track(&self, key: &PropertyKey) {
        Runtime::global().report_read(&self.inner.owner, key);
    }

    fn changed(&self, key: &PropertyKey) {
        self.inner
            .owner
            .report(key, &Value::Container(self.clone()));
    }

    fn track_field(&self) {
        self.track(&self.inner.field);
    }

    fn changed_field(&self) {
        self.changed(&self.inner.field);
    }

    fn entry_key(&self, entry: &Value) -> PropertyKey {
        self.inner.field.qualified(entry)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("kind", &self.kind())
            .field("field", &self.inner.field)
            .field("owner", &self.inner.owner.id().0)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn int_arg(op: &str, args: &[Value], index: usize) -> Result<Option<i64>> {
    match args.get(index) {
        None | Some(Value::Undefined) => Ok(None),
        Some(Value::Number(n)) if n.is_finite() => Ok(Some(n.trunc() as i64)),
        Some(other) => Err(ReactiveError::invalid(
            op,
            format!("argument {index} must be an integer, got {}", other.type_name()),
        )),
    }
}

fn index_arg(op: &str, args: &[Value], index: usize) -> Result<usize> {
    match int_arg(op, args, index)? {
        Some(n) if n >= 0 => usize::try_from(n)
            .map_err(|_| ReactiveError::invalid(op, format!("index {n} is out of range"))),
        Some(n) => Err(ReactiveError::invalid(op, format!("index {n} is negative"))),
        None => Err(ReactiveError::invalid(op, format!("argument {index} is required"))),
    }
}

/// Resolve a possibly negative position against `len`, clamped to `0..=len`.
fn relative(position: Option<i64>, len: usize, default: usize) -> usize {
    match position {
        None => default,
        Some(n) if n < 0 => len.saturating_sub(n.unsigned_abs() as usize),
        Some(n) => (n as usize).min(len),
    }
}

fn values(items: Vec<Value>) -> Value {
    Value::from(Data::List(items))
}

fn optional(value: Option<Value>) -> Value {
    value.unwrap_or_default()
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// Largest index a list accepts.
pub const MAX_LIST_INDEX: usize = u32::MAX as usize - 1;

/// Typed view of a list container.
#[derive(Clone)]
pub struct ObservableList {
    container: Container,
    items: Rc<RefCell<Vec<Value>>>,
}

impl ObservableList {
    #[must_use]
    pub fn container(&self) -> &Container {
        &self.container
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Element at `index`. Untracked.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    /// Indexed write. Reports the field only when the element changed; writing
    /// past the end pads with `Undefined`.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::InvalidArgument`] when `index` exceeds
    /// [`MAX_LIST_INDEX`] or the padding cannot be allocated.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        {
            let mut items = self.items.borrow_mut();
            if items.get(index) == Some(&value) {
                return Ok(false);
            }
            if index >= items.len() {
                if index > MAX_LIST_INDEX {
                    return Err(ReactiveError::invalid(
                        "set",
                        format!("index {index} exceeds {MAX_LIST_INDEX}"),
                    ));
                }
                let len = index + 1;
                let additional = len - items.len();
                items
                    .try_reserve(additional)
                    .map_err(|err| ReactiveError::invalid("set", format!("index {index}: {err}")))?;
                items.resize(len, Value::Undefined);
            }
            items[index] = value;
        }
        self.container.changed_field();
        Ok(true)
    }

    /// Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let len = {
            let mut items = self.items.borrow_mut();
            items.push(value.into());
            items.len()
        };
        self.container.changed_field();
        len
    }

    pub fn pop(&self) -> Option<Value> {
        let popped = self.items.borrow_mut().pop();
        self.container.changed_field();
        popped
    }

    pub fn shift(&self) -> Option<Value> {
        let shifted = {
            let mut items = self.items.borrow_mut();
            (!items.is_empty()).then(|| items.remove(0))
        };
        self.container.changed_field();
        shifted
    }

    /// Prepend `values` in order. Returns the new length.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let len = {
            let mut items = self.items.borrow_mut();
            let mut front: Vec<Value> = values.into_iter().collect();
            front.append(&mut items);
            *items = front;
            items.len()
        };
        self.container.changed_field();
        len
    }

    /// Remove `delete_count` elements at `start` and insert `insert` in their
    /// place. Returns the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        insert: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        let removed = {
            let mut items = self.items.borrow_mut();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            let removed: Vec<Value> = items.splice(start..end, insert).collect();
            removed
        };
        self.container.changed_field();
        removed
    }

    pub fn reverse(&self) {
        self.items.borrow_mut().reverse();
        self.container.changed_field();
    }

    /// Stable sort by string form, `Undefined` last.
    pub fn sort(&self) {
        self.items.borrow_mut().sort_by(|a, b| match (a, b) {
            (Value::Undefined, Value::Undefined) => Ordering::Equal,
            (Value::Undefined, _) => Ordering::Greater,
            (_, Value::Undefined) => Ordering::Less,
            _ => a.to_string().cmp(&b.to_string()),
        });
        self.container.changed_field();
    }

    /// Overwrite `start..end` (clamped) with `value`.
    pub fn fill(&self, value: impl Into<Value>, start: usize, end: usize) {
        let value = value.into();
        {
            let mut items = self.items.borrow_mut();
            let end = end.min(items.len());
            let start = start.min(end);
            for item in &mut items[start..end] {
                *item = value.clone();
            }
        }
        self.container.changed_field();
    }

    /// Copy `start..end` over the elements beginning at `target`, without
    /// changing the length.
    pub fn copy_within(&self, target: usize, start: usize, end: usize) {
        {
            let mut items = self.items.borrow_mut();
            let len = items.len();
            let end = end.min(len);
            let start = start.min(end);
            let target = target.min(len);
            let count = (end - start).min(len - target);
            let copied: Vec<Value> = items[start..start + count].to_vec();
            items[target..target + count].clone_from_slice(&copied);
        }
        self.container.changed_field();
    }

    #[must_use]
    pub fn includes(&self, value: &Value) -> bool {
        self.container.track_field();
        self.items.borrow().contains(value)
    }

    #[must_use]
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.container.track_field();
        self.items.borrow().iter().position(|item| item == value)
    }

    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> Vec<Value> {
        self.container.track_field();
        let items = self.items.borrow();
        let end = end.min(items.len());
        let start = start.min(end);
        items[start..end].to_vec()
    }

    #[must_use]
    pub fn join(&self, separator: &str) -> String {
        self.container.track_field();
        self.items
            .borrow()
            .iter()
            .map(|item| {
                if item.is_nullish() {
                    String::new()
                } else {
                    item.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(separator)
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.container.track_field();
        self.items.borrow().clone()
    }
}

static LIST_OPS: &[OpRow<ObservableList>] = &[
    ("push", Mutation, |list, _, args| {
        list.items.borrow_mut().extend(args.iter().cloned());
        list.container.changed_field();
        Ok(Value::from(list.len()))
    }),
    ("pop", Mutation, |list, _, _| Ok(optional(list.pop()))),
    ("shift", Mutation, |list, _, _| Ok(optional(list.shift()))),
    ("unshift", Mutation, |list, _, args| {
        Ok(Value::from(list.unshift(args.iter().cloned())))
    }),
    ("splice", Mutation, |list, op, args| {
        let len = list.len();
        let start = relative(int_arg(op, args, 0)?, len, 0);
        let delete_count = match int_arg(op, args, 1)? {
            Some(n) => usize::try_from(n.max(0)).unwrap_or(usize::MAX),
            None if args.len() < 2 => len - start,
            None => 0,
        };
        Ok(values(list.splice(start, delete_count, args.iter().skip(2).cloned())))
    }),
    ("reverse", Mutation, |list, _, _| {
        list.reverse();
        Ok(Value::Undefined)
    }),
    ("sort", Mutation, |list, _, _| {
        list.sort();
        Ok(Value::Undefined)
    }),
    ("fill", Mutation, |list, op, args| {
        let len = list.len();
        let start = relative(int_arg(op, args, 1)?, len, 0);
        let end = relative(int_arg(op, args, 2)?, len, len);
        list.fill(arg(args, 0), start, end);
        Ok(Value::Undefined)
    }),
    ("copy_within", Mutation, |list, op, args| {
        let len = list.len();
        let target = relative(int_arg(op, args, 0)?, len, 0);
        let start = relative(int_arg(op, args, 1)?, len, 0);
        let end = relative(int_arg(op, args, 2)?, len, len);
        list.copy_within(target, start, end);
        Ok(Value::Undefined)
    }),
    ("set", Mutation, |list, op, args| {
        list.set(index_arg(op, args, 0)?, arg(args, 1)).map(Value::from)
    }),
    ("includes", Read, |list, _, args| Ok(Value::from(list.includes(&arg(args, 0))))),
    ("index_of", Read, |list, _, args| {
        Ok(list
            .index_of(&arg(args, 0))
            .map_or(Value::from(-1), Value::from))
    }),
    ("slice", Read, |list, op, args| {
        let len = list.len();
        let start = relative(int_arg(op, args, 0)?, len, 0);
        let end = relative(int_arg(op, args, 1)?, len, len);
        Ok(values(list.slice(start, end)))
    }),
    ("join", Read, |list, _, args| {
        let separator = match args.first() {
            None | Some(Value::Undefined) => ",".to_string(),
            Some(separator) => separator.to_string(),
        };
        Ok(Value::from(list.join(&separator)))
    }),
    ("to_vec", Read, |list, _, _| Ok(values(list.to_vec()))),
    ("get", Ignored, |list, op, args| Ok(optional(list.get(index_arg(op, args, 0)?)))),
    ("len", Ignored, |list, _, _| Ok(Value::from(list.len()))),
];

impl fmt::Debug for ObservableList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.borrow().iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

/// Typed view of a map container. Entries are tracked individually.
#[derive(Clone)]
pub struct ObservableMap {
    container: Container,
    entries: Rc<RefCell<IndexMap<Value, Value>>>,
}

impl ObservableMap {
    #[must_use]
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Tracked read of the `field.key` entry.
    pub fn get(&self, key: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        self.container.track(&self.container.entry_key(&key));
        self.entries.borrow().get(&key).cloned()
    }

    /// Tracked read of the `field.key` entry.
    pub fn has(&self, key: impl Into<Value>) -> bool {
        let key = key.into();
        self.container.track(&self.container.entry_key(&key));
        self.entries.borrow().contains_key(&key)
    }

    /// Returns the previous value. Reports the `field.key` entry.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let entry = self.container.entry_key(&key);
        let previous = self.entries.borrow_mut().insert(key, value.into());
        self.container.changed(&entry);
        previous
    }

    /// Returns the removed value. Reports the `field.key` entry.
    pub fn delete(&self, key: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let entry = self.container.entry_key(&key);
        let removed = self.entries.borrow_mut().shift_remove(&key);
        self.container.changed(&entry);
        removed
    }

    /// Reports the whole field.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
        self.container.changed_field();
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.entries.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.entries.borrow().values().cloned().collect()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.entries
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

static MAP_OPS: &[OpRow<ObservableMap>] = &[
    ("set", Mutation, |map, _, args| {
        map.set(arg(args, 0), arg(args, 1));
        Ok(Value::Container(map.container.clone()))
    }),
    ("delete", Mutation, |map, _, args| Ok(Value::from(map.delete(arg(args, 0)).is_some()))),
    ("clear", Mutation, |map, _, _| {
        map.clear();
        Ok(Value::Undefined)
    }),
    ("get", Read, |map, _, args| Ok(optional(map.get(arg(args, 0))))),
    ("has", Read, |map, _, args| Ok(Value::from(map.has(arg(args, 0))))),
    ("keys", Ignored, |map, _, _| Ok(values(map.keys()))),
    ("values", Ignored, |map, _, _| Ok(values(map.values()))),
    ("entries", Ignored, |map, _, _| {
        Ok(values(
            map.entries()
                .into_iter()
                .map(|(key, value)| values(vec![key, value]))
                .collect(),
        ))
    }),
    ("len", Ignored, |map, _, _| Ok(Value::from(map.len()))),
];

impl fmt::Debug for ObservableMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.borrow().iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Set
// ---------------------------------------------------------------------------

/// Typed view of a set container. Tracked as a whole field.
#[derive(Clone)]
pub struct ObservableSet {
    container: Container,
    items: Rc<RefCell<IndexSet<Value>>>,
}

impl ObservableSet {
    #[must_use]
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Returns whether the value was newly inserted.
    pub fn add(&self, value: impl Into<Value>) -> bool {
        let inserted = self.items.borrow_mut().insert(value.into());
        self.container.changed_field();
        inserted
    }

    /// Returns whether the value was present.
    pub fn delete(&self, value: &Value) -> bool {
        let removed = self.items.borrow_mut().shift_remove(value);
        self.container.changed_field();
        removed
    }

    pub fn clear(&self) {
        self.items.borrow_mut().clear();
        self.container.changed_field();
    }

    #[must_use]
    pub fn has(&self, value: &Value) -> bool {
        self.container.track_field();
        self.items.borrow().contains(value)
    }

    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.container.track_field();
        self.items.borrow().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.container.track_field();
        self.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static SET_OPS: &[OpRow<ObservableSet>] = &[
    ("add", Mutation, |set, _, args| {
        set.add(arg(args, 0));
        Ok(Value::Container(set.container.clone()))
    }),
    ("delete", Mutation, |set, _, args| Ok(Value::from(set.delete(&arg(args, 0))))),
    ("clear", Mutation, |set, _, _| {
        set.clear();
        Ok(Value::Undefined)
    }),
    ("has", Read, |set, _, args| Ok(Value::from(set.has(&arg(args, 0))))),
    ("values", Read, |set, _, _| Ok(values(set.values()))),
    ("len", Read, |set, _, _| Ok(Value::from(set.len()))),
];

impl fmt::Debug for ObservableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.items.borrow().iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Date
// ---------------------------------------------------------------------------

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Calendar fields of a date, largest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateField {
    Year,
    /// Zero-based.
    Month,
    /// Day of the month, one-based.
    Day,
    Hours,
    Minutes,
    Seconds,
    Millis,
}

impl DateField {
    /// How many fields a setter starting here accepts: `set_full_year` takes
    /// year, month and day, `set_hours` takes hours down to milliseconds.
    fn span(self) -> usize {
        match self {
            Self::Year | Self::Minutes => 3,
            Self::Month | Self::Seconds => 2,
            Self::Day | Self::Millis => 1,
            Self::Hours => 4,
        }
    }

    fn setter(self) -> &'static str {
        match self {
            Self::Year => "set_full_year",
            Self::Month => "set_month",
            Self::Day => "set_date",
            Self::Hours => "set_hours",
            Self::Minutes => "set_minutes",
            Self::Seconds => "set_seconds",
            Self::Millis => "set_milliseconds",
        }
    }
}

/// UTC calendar fields of `millis`, indexed by [`DateField`].
fn calendar(millis: i64) -> Option<[i64; 7]> {
    let at = DateTime::from_timestamp_millis(millis)?;
    Some([
        i64::from(at.year()),
        i64::from(at.month0()),
        i64::from(at.day()),
        i64::from(at.hour()),
        i64::from(at.minute()),
        i64::from(at.second()),
        i64::from(at.timestamp_subsec_millis()),
    ])
}

/// Inverse of [`calendar`]. Out-of-range fields carry into the larger ones,
/// so month 12 is January of the next year and day 0 the last day of the
/// previous month.
fn timestamp([year, month, day, hours, minutes, seconds, millis]: [i64; 7]) -> Option<i64> {
    let year = i32::try_from(year.checked_add(month.div_euclid(12))?).ok()?;
    let month = u32::try_from(month.rem_euclid(12)).ok()? + 1;
    let first = NaiveDate::from_ymd_opt(year, month, 1)?
        .and_hms_opt(0, 0, 0)?
        .and_utc()
        .timestamp_millis();
    let total = [
        (day.checked_sub(1)?, MILLIS_PER_DAY),
        (hours, 3_600_000),
        (minutes, 60_000),
        (seconds, 1_000),
        (millis, 1),
    ]
    .into_iter()
    .try_fold(first, |acc, (n, unit)| acc.checked_add(n.checked_mul(unit)?))?;
    DateTime::from_timestamp_millis(total).map(|_| total)
}

/// Typed view of a date container (milliseconds since the Unix epoch).
#[derive(Clone)]
pub struct ObservableDate {
    container: Container,
    millis: Rc<Cell<i64>>,
}

impl ObservableDate {
    #[must_use]
    pub fn container(&self) -> &Container {
        &self.container
    }

    #[must_use]
    pub fn get_time(&self) -> i64 {
        self.container.track_field();
        self.millis.get()
    }

    #[must_use]
    pub fn value_of(&self) -> i64 {
        self.get_time()
    }

    pub fn set_time(&self, millis: i64) {
        self.millis.set(millis);
        self.container.changed_field();
    }

    /// UTC calendar field. `None` when the timestamp lies outside the
    /// representable calendar range.
    #[must_use]
    pub fn field(&self, field: DateField) -> Option<i64> {
        calendar(self.get_time()).map(|fields| fields[field as usize])
    }

    /// Day of the week, `0` for Sunday.
    #[must_use]
    pub fn weekday(&self) -> Option<i64> {
        DateTime::from_timestamp_millis(self.get_time())
            .map(|at| i64::from(at.weekday().num_days_from_sunday()))
    }

    /// RFC 3339 form with millisecond precision, e.g.
    /// `2024-03-01T12:00:00.000Z`.
    #[must_use]
    pub fn to_iso_string(&self) -> Option<String> {
        DateTime::from_timestamp_millis(self.get_time())
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Overwrite `values.len()` consecutive fields starting at `first` and
    /// return the new timestamp.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::InvalidArgument`] when no value or more than the
    /// setter accepts is given, or the result leaves the calendar range.
    pub fn set_fields(&self, first: DateField, values: &[i64]) -> Result<i64> {
        let op = first.setter();
        if values.is_empty() || values.len() > first.span() {
            return Err(ReactiveError::invalid(
                op,
                format!("expected 1 to {} values, got {}", first.span(), values.len()),
            ));
        }
        let mut fields = calendar(self.millis.get())
            .ok_or_else(|| ReactiveError::invalid(op, "current time is out of range"))?;
        for (slot, value) in fields[first as usize..].iter_mut().zip(values) {
            *slot = *value;
        }
        let millis =
            timestamp(fields).ok_or_else(|| ReactiveError::invalid(op, "date is out of range"))?;
        self.set_time(millis);
        Ok(millis)
    }
}

fn read_field(date: &ObservableDate, field: DateField) -> Result<Value> {
    Ok(date
        .field(field)
        .map_or(Value::from(f64::NAN), Value::from))
}

fn write_fields(date: &ObservableDate, first: DateField, op: &str, args: &[Value]) -> Result<Value> {
    let mut fields = Vec::with_capacity(first.span());
    for index in 0..args.len().min(first.span()) {
        match int_arg(op, args, index)? {
            Some(n) => fields.push(n),
            None => break,
        }
    }
    if fields.is_empty() {
        return Err(ReactiveError::invalid(op, "a value is required"));
    }
    date.set_fields(first, &fields).map(Value::from)
}

static DATE_OPS: &[OpRow<ObservableDate>] = &[
    ("set_time", Mutation, |date, op, args| {
        let millis = int_arg(op, args, 0)?
            .ok_or_else(|| ReactiveError::invalid(op, "a timestamp is required"))?;
        date.set_time(millis);
        Ok(Value::from(millis))
    }),
    ("set_full_year", Mutation, |date, op, args| write_fields(date, DateField::Year, op, args)),
    ("set_month", Mutation, |date, op, args| write_fields(date, DateField::Month, op, args)),
    ("set_date", Mutation, |date, op, args| write_fields(date, DateField::Day, op, args)),
    ("set_hours", Mutation, |date, op, args| write_fields(date, DateField::Hours, op, args)),
    ("set_minutes", Mutation, |date, op, args| write_fields(date, DateField::Minutes, op, args)),
    ("set_seconds", Mutation, |date, op, args| write_fields(date, DateField::Seconds, op, args)),
    ("set_milliseconds", Mutation, |date, op, args| {
        write_fields(date, DateField::Millis, op, args)
    }),
    ("get_time", Read, |date, _, _| Ok(Value::from(date.get_time()))),
    ("value_of", Read, |date, _, _| Ok(Value::from(date.value_of()))),
    ("get_full_year", Read, |date, _, _| read_field(date, DateField::Year)),
    ("get_month", Read, |date, _, _| read_field(date, DateField::Month)),
    ("get_date", Read, |date, _, _| read_field(date, DateField::Day)),
    ("get_hours", Read, |date, _, _| read_field(date, DateField::Hours)),
    ("get_minutes", Read, |date, _, _| read_field(date, DateField::Minutes)),
    ("get_seconds", Read, |date, _, _| read_field(date, DateField::Seconds)),
    ("get_milliseconds", Read, |date, _, _| read_field(date, DateField::Millis)),
    ("get_day", Read, |date, _, _| {
        Ok(date.weekday().map_or(Value::from(f64::NAN), Value::from))
    }),
    ("to_iso_string", Read, |date, _, _| Ok(optional(date.to_iso_string().map(Value::from)))),
];

impl fmt::Debug for ObservableDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObservableDate({})", self.millis.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{Listener, Subscriber};
    use crate::engine::{ReadSet, Work};

    fn holder(field: &str, value: Value) -> (Observable, Container) {
        let object = Observable::new();
        object.set(field, value);
        let container = object.get(field).as_container().cloned();
        (object, container.expect("field holds a container"))
    }

    fn reads(body: impl Fn() + 'static) -> ReadSet {
        Runtime::global()
            .transaction(&Work::infallible(body), &Subscriber::new(|| {}))
            .read
    }

    fn reported(object: &Observable, f: impl FnOnce()) -> Vec<String> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let listener = Listener::new(move |key, _| seen_clone.borrow_mut().push(key.to_string()));
        object.admin().listen(&listener);
        f();
        object.admin().unlisten(&listener);
        Runtime::global().flush();
        seen.take()
    }

    #[test]
    fn table_covers_every_kind() {
        assert_eq!(classify(ContainerKind::List, "push"), Some(OpClass::Mutation));
        assert_eq!(classify(ContainerKind::List, "includes"), Some(OpClass::Read));
        assert_eq!(classify(ContainerKind::List, "len"), Some(OpClass::Ignored));
        assert_eq!(classify(ContainerKind::Set, "clear"), Some(OpClass::Mutation));
        assert_eq!(classify(ContainerKind::Map, "entries"), Some(OpClass::Ignored));
        assert_eq!(classify(ContainerKind::Date, "set_time"), Some(OpClass::Mutation));
        assert_eq!(classify(ContainerKind::Date, "get_time"), Some(OpClass::Read));
        assert_eq!(classify(ContainerKind::Map, "push"), None);
    }

    #[test]
    fn unknown_operations_are_rejected() {
        let (_object, list) = holder("items", Value::list([1]));
        assert_eq!(
            list.call("frobnicate", &[]),
            Err(ReactiveError::UnknownOperation {
                kind: "list",
                op: "frobnicate".into()
            })
        );
    }

    #[test]
    fn every_operation_behaves_as_classified() {
        // Operations that need no arguments, per kind.
        let cases: [(&str, Value, &[&str]); 4] = [
            (
                "items",
                Value::list([3, 1, 2]),
                &[
                    "push", "pop", "shift", "unshift", "splice", "reverse", "sort", "fill",
                    "copy_within", "includes", "index_of", "slice", "join", "to_vec", "len",
                ],
            ),
            (
                "tags",
                Value::set(["a"]),
                &["add", "delete", "clear", "has", "values", "len"],
            ),
            (
                "lookup",
                Value::map([("k", 1)]),
                &["clear", "keys", "values", "entries", "len"],
            ),
            (
                "when",
                Value::date(0),
                &[
                    "get_time", "value_of", "get_full_year", "get_month", "get_date", "get_day",
                    "get_hours", "get_minutes", "get_seconds", "get_milliseconds",
                    "to_iso_string",
                ],
            ),
        ];

        for (field, data, ops) in cases {
            let (object, container) = holder(field, data);
            for op in ops {
                let class = classify(container.kind(), op).unwrap();

                let target = container.clone();
                let op_name = op.to_string();
                let observed = reads(move || {
                    let _ = target.call(&op_name, &[]);
                });
                assert_eq!(
                    observed.reads(&object, field),
                    class == OpClass::Read,
                    "{field}.{op} read tracking"
                );

                let writes = reported(&object, || {
                    let _ = container.call(op, &[]);
                });
                assert_eq!(
                    !writes.is_empty(),
                    class == OpClass::Mutation,
                    "{field}.{op} write reporting"
                );
            }
        }
    }

    #[test]
    fn list_operations() {
        let (_object, container) = holder("items", Value::list([1, 2, 3]));
        let list = container.as_list().unwrap();

        assert_eq!(list.push(4), 4);
        assert_eq!(list.shift(), Some(Value::from(1)));
        assert_eq!(list.unshift([Value::from(0)]), 4);
        // [0, 2, 3, 4]
        let removed = container.call("splice", &[Value::from(1), Value::from(2)]).unwrap();
        assert!(matches!(removed.as_data(), Some(Data::List(items)) if items.len() == 2));
        assert_eq!(list.to_vec(), vec![Value::from(0), Value::from(4)]);

        assert_eq!(container.call("index_of", &[Value::from(4)]), Ok(Value::from(1)));
        assert_eq!(container.call("index_of", &[Value::from(9)]), Ok(Value::from(-1)));
        assert_eq!(container.call("join", &[Value::from("-")]), Ok(Value::from("0-4")));
        assert_eq!(container.call("len", &[]), Ok(Value::from(2)));

        list.push(10);
        list.sort();
        // String order, like a default sort.
        assert_eq!(list.join(","), "0,10,4");

        list.fill(Value::Null, 1, 99);
        assert_eq!(list.join(","), "0,,");
        assert_eq!(list.pop(), Some(Value::Null));
    }

    #[test]
    fn list_negative_positions_count_from_the_end() {
        let (_object, container) = holder("items", Value::list([1, 2, 3, 4]));
        let tail = container.call("slice", &[Value::from(-2)]).unwrap();
        assert!(matches!(tail.as_data(), Some(Data::List(items)) if items.len() == 2));

        container
            .call("copy_within", &[Value::from(0), Value::from(-2)])
            .unwrap();
        let list = container.as_list().unwrap();
        assert_eq!(list.join(","), "3,4,3,4");
    }

    #[test]
    fn list_index_writes_report_only_changes() {
        let (object, container) = holder("items", Value::list([1, 2]));
        let list = container.as_list().unwrap();
        assert!(reported(&object, || assert_eq!(list.set(0, 1), Ok(false))).is_empty());
        assert_eq!(reported(&object, || assert_eq!(list.set(0, 5), Ok(true))), ["items"]);
        assert_eq!(list.set(3, 7), Ok(true));
        assert_eq!(list.len(), 4);
        assert_eq!(list.get(2), Some(Value::Undefined));
    }

    #[test]
    fn oversized_list_indices_are_rejected() {
        let (_object, container) = holder("items", Value::list([1]));
        for index in [1e18, 4_294_967_295.0] {
            assert!(matches!(
                container.call("set", &[Value::from(index), Value::from(1)]),
                Err(ReactiveError::InvalidArgument { .. })
            ));
        }
        let list = container.as_list().unwrap();
        assert!(list.set(usize::MAX, 2).is_err());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn list_data_reads_are_untracked() {
        let (object, container) = holder("items", Value::list([1, 2]));
        let list = container.as_list().unwrap();
        let observed = reads(move || {
            let _ = list.get(0);
            let _ = list.len();
        });
        assert!(!observed.reads(&object, "items"));
    }

    #[test]
    fn invalid_arguments_are_reported() {
        let (_object, container) = holder("items", Value::list([1]));
        assert!(matches!(
            container.call("set", &[Value::from("x"), Value::from(1)]),
            Err(ReactiveError::InvalidArgument { .. })
        ));
        assert!(matches!(
            container.call("get", &[Value::from(-1)]),
            Err(ReactiveError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn map_entries_are_tracked_individually() {
        let (object, container) = holder("lookup", Value::map([("a", 1), ("b", 2)]));
        let map = container.as_map().unwrap();

        let view = map.clone();
        let observed = reads(move || {
            let _ = view.get("a");
            let _ = view.has("c");
        });
        assert!(observed.reads(&object, "lookup.a"));
        assert!(observed.reads(&object, "lookup.c"));
        assert!(!observed.reads(&object, "lookup"));
        assert!(!observed.reads(&object, "lookup.b"));

        assert_eq!(reported(&object, || { map.set("b", 3); }), ["lookup.b"]);
        assert_eq!(reported(&object, || { map.delete("a"); }), ["lookup.a"]);
        assert_eq!(reported(&object, || map.clear()), ["lookup"]);
        assert!(map.is_empty());
    }

    #[test]
    fn map_keys_use_string_forms() {
        let (object, container) = holder("scores", Value::map([(1, "one")]));
        let written = reported(&object, || {
            container.call("set", &[Value::from(2), Value::from("two")]).unwrap();
        });
        assert_eq!(written, ["scores.2"]);
        let map = container.as_map().unwrap();
        assert_eq!(map.get(2), Some(Value::from("two")));
        assert_eq!(map.keys(), vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn set_mutations_report_the_field() {
        let (object, container) = holder("tags", Value::set(["a"]));
        let set = container.as_set().unwrap();
        assert_eq!(reported(&object, || assert!(set.add("b"))), ["tags"]);
        assert_eq!(reported(&object, || assert!(set.delete(&Value::from("a")))), ["tags"]);
        assert_eq!(reported(&object, || set.clear()), ["tags"]);
        assert!(set.is_empty());
    }

    #[test]
    fn date_setters_mutate() {
        let (object, container) = holder("when", Value::date(1_000));
        let date = container.as_date().unwrap();
        assert_eq!(date.get_time(), 1_000);
        let written = reported(&object, || {
            assert_eq!(container.call("set_time", &[Value::from(2_000)]), Ok(Value::from(2_000)));
        });
        assert_eq!(written, ["when"]);
        assert_eq!(date.value_of(), 2_000);
        assert!(container.call("set_time", &[]).is_err());
    }

    #[test]
    fn date_operations_follow_their_prefix() {
        for (name, class, _) in DATE_OPS {
            assert_eq!(*class == Mutation, name.starts_with("set_"), "{name}");
        }
        assert_eq!(classify(ContainerKind::Date, "set_hours"), Some(OpClass::Mutation));
        assert_eq!(classify(ContainerKind::Date, "get_hours"), Some(OpClass::Read));
        assert_eq!(classify(ContainerKind::Date, "set_weekday"), None);
    }

    #[test]
    fn date_calendar_fields_carry_over() {
        let (object, container) = holder("when", Value::date(0));
        let date = container.as_date().unwrap();
        assert_eq!(date.field(DateField::Year), Some(1970));
        assert_eq!(container.call("get_day", &[]), Ok(Value::from(4)));

        let written = reported(&object, || {
            assert_eq!(
                container.call("set_hours", &[Value::from(25)]),
                Ok(Value::from(90_000_000))
            );
        });
        assert_eq!(written, ["when"]);
        assert_eq!(date.field(DateField::Day), Some(2));
        assert_eq!(date.field(DateField::Hours), Some(1));

        // Day zero is the last day of the previous month.
        container
            .call("set_full_year", &[Value::from(2024), Value::from(2), Value::from(0)])
            .unwrap();
        assert_eq!(date.to_iso_string().as_deref(), Some("2024-02-29T01:00:00.000Z"));

        container.call("set_month", &[Value::from(12)]).unwrap();
        assert_eq!(date.to_iso_string().as_deref(), Some("2025-01-29T01:00:00.000Z"));
        assert_eq!(container.call("get_month", &[]), Ok(Value::from(0)));
    }

    #[test]
    fn date_setters_validate_their_arguments() {
        let (_object, container) = holder("when", Value::date(0));
        let date = container.as_date().unwrap();
        assert!(container.call("set_hours", &[]).is_err());
        assert!(date.set_fields(DateField::Day, &[1, 2]).is_err());
        assert!(matches!(
            container.call("set_full_year", &[Value::from(1e9)]),
            Err(ReactiveError::InvalidArgument { .. })
        ));
        assert_eq!(date.value_of(), 0);
    }

    #[test]
    fn snapshot_copies_contents() {
        let (_object, container) = holder("items", Value::list([1, 2]));
        let Data::List(items) = container.snapshot() else {
            panic!("list snapshot");
        };
        assert_eq!(items, vec![Value::from(1), Value::from(2)]);
        assert_eq!(container.kind(), ContainerKind::List);
        assert!(container.as_map().is_none());
    }
}
