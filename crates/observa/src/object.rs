#![forbid(unsafe_code)]

//! The plain-object wrapper.
//!
//! [`Observable`] stands in for a plain object: every property access goes
//! through it, so reads can be attributed to the running tracked function and
//! writes can be reported to the object's [`Administration`].
//!
//! # Read rules
//!
//! - functions come back bound to the wrapper and are not tracked;
//! - classes come back as-is and are not tracked;
//! - everything else is tracked, including reads of missing keys.
//!
//! # Write rules
//!
//! - writing the identical value is a no-op;
//! - raw records and containers are wrapped on the way in (lazily, only
//!   when written or defined), already wrapped values are stored as they are.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::admin::{AdminId, Administration};
use crate::class::Class;
use crate::container::wrap_data;
use crate::error::{ReactiveError, Result};
use crate::key::PropertyKey;
use crate::runtime::Runtime;
use crate::value::{Data, Value};

struct ObjectInner {
    /// Bookkeeping shared with every container stored on this object.
    admin: Administration,
    /// Source of shared methods, if instantiated from a class.
    class: Option<Class>,
    /// Own properties in definition order.
    fields: RefCell<IndexMap<PropertyKey, Value>>,
}

/// An observable plain object. Clones share the same object.
#[derive(Clone)]
pub struct Observable {
    inner: Rc<ObjectInner>,
}

impl Default for Observable {
    fn default() -> Self {
        Self::new()
    }
}

impl Observable {
    /// An empty anonymous object.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(None, IndexMap::new())
    }

    /// Wrap a record's fields as they are. Nested records stay raw until they
    /// are written through the wrapper.
    #[must_use]
    pub fn from_record(fields: IndexMap<PropertyKey, Value>) -> Self {
        Self::with_parts(None, fields)
    }

    pub fn from_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<PropertyKey>,
        V: Into<Value>,
    {
        let object = Self::new();
        for (key, value) in fields {
            object.define(key, value);
        }
        object
    }

    pub(crate) fn with_parts(class: Option<Class>, fields: IndexMap<PropertyKey, Value>) -> Self {
        let admin = Administration::new(class.as_ref().map(Class::name));
        Self {
            inner: Rc::new(ObjectInner {
                admin,
                class,
                fields: RefCell::new(fields),
            }),
        }
    }

    #[must_use]
    pub fn admin(&self) -> &Administration {
        &self.inner.admin
    }

    #[must_use]
    pub fn id(&self) -> AdminId {
        self.inner.admin.id()
    }

    /// The class this object was instantiated from.
    #[must_use]
    pub fn class(&self) -> Option<&Class> {
        self.inner.class.as_ref()
    }

    #[must_use]
    pub fn instance_of(&self, class: &Class) -> bool {
        self.inner.class.as_ref().is_some_and(|own| own.ptr_eq(class))
    }

    /// Read a property.
    pub fn get(&self, key: impl Into<PropertyKey>) -> Value {
        let key = key.into();
        let value = self.raw(&key);
        match value {
            Value::Function(function) => Value::Function(function.bind(self)),
            Value::Class(_) => value,
            _ => {
                Runtime::global().report_read(&self.inner.admin, &key);
                value
            }
        }
    }

    /// Write a property. Returns whether the stored value changed.
    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let value = value.into();
        if self.raw(&key) == value {
            return false;
        }
        let stored = wrap(&key, value, &self.inner.admin);
        self.inner
            .fields
            .borrow_mut()
            .insert(key.clone(), stored.clone());
        self.inner.admin.report(&key, &stored);
        true
    }

    /// Define a property: wraps like [`set`](Observable::set) but reports
    /// nothing.
    pub fn define(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) {
        let key = key.into();
        let stored = wrap(&key, value.into(), &self.inner.admin);
        self.inner.fields.borrow_mut().insert(key, stored);
    }

    /// Delete a property, reporting the key when it existed.
    pub fn remove(&self, key: impl Into<PropertyKey>) -> Option<Value> {
        let key = key.into();
        let removed = self.inner.fields.borrow_mut().shift_remove(&key)?;
        self.inner.admin.report(&key, &Value::Undefined);
        Some(removed)
    }

    /// Call a method with this object as receiver. The method lookup itself
    /// is not tracked; reads made by the method are.
    pub fn call(&self, key: impl Into<PropertyKey>, args: &[Value]) -> Result<Value> {
        let key = key.into();
        match self.get(&key) {
            Value::Function(function) => function.call(args),
            _ => Err(ReactiveError::NotCallable {
                key: key.to_string(),
            }),
        }
    }

    /// Whether the property exists. Not tracked.
    #[must_use]
    pub fn has(&self, key: impl Into<PropertyKey>) -> bool {
        self.inner.fields.borrow().contains_key(&key.into())
    }

    /// Own keys in definition order. Not tracked.
    #[must_use]
    pub fn keys(&self) -> Vec<PropertyKey> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    /// Raw record copy of the current fields, without tracking. Nested
    /// observables and containers are copied recursively.
    #[must_use]
    pub fn snapshot(&self) -> Data {
        let fields = self.inner.fields.borrow();
        Data::Record(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), snapshot_value(value)))
                .collect(),
        )
    }

    /// Own field, else a method of the class.
    fn raw(&self, key: &PropertyKey) -> Value {
        if let Some(value) = self.inner.fields.borrow().get(key) {
            return value.clone();
        }
        self.inner
            .class
            .as_ref()
            .and_then(|class| class.method(key))
            .map_or(Value::Undefined, |method| Value::Function(method.clone()))
    }
}

pub(crate) fn snapshot_value(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::from(object.snapshot()),
        Value::Container(container) => Value::from(container.snapshot()),
        other => other.clone(),
    }
}

/// Make a value observable before it is stored under `field` of `owner`.
pub(crate) fn wrap(field: &PropertyKey, value: Value, owner: &Administration) -> Value {
    match value {
        Value::Data(data) => wrap_data(Rc::unwrap_or_clone(data), field, owner),
        other => other,
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.inner.admin.id().0)
            .field("class", &self.inner.admin.name())
            .field("fields", &self.inner.fields.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{Listener, Subscriber};
    use crate::engine::Work;
    use crate::key::Symbol;
    use crate::value::Function;
    use std::cell::{Cell, RefCell};

    fn reads_of(body: impl Fn() + 'static) -> crate::engine::ReadSet {
        Runtime::global()
            .transaction(&Work::infallible(body), &Subscriber::new(|| {}))
            .read
    }

    #[test]
    fn plain_reads_are_tracked() {
        let object = Observable::from_fields([("a", 1)]);
        let reads = reads_of({
            let object = object.clone();
            move || {
                object.get("a");
                object.get("missing");
            }
        });
        assert!(reads.reads(&object, "a"));
        assert!(reads.reads(&object, "missing"));
    }

    #[test]
    fn symbol_reads_are_not_tracked() {
        let tag = Symbol::new("tag");
        let object = Observable::new();
        object.set(tag.clone(), "internal");
        let reads = reads_of({
            let object = object.clone();
            move || {
                object.get(tag.clone());
            }
        });
        assert!(reads.is_empty());
    }

    #[test]
    fn function_reads_are_bound_and_untracked() {
        let object = Observable::from_fields([("n", 2)]);
        object.define(
            "double",
            Function::method(|this, _| {
                let n = this.get("n").as_f64().unwrap_or_default();
                Ok(Value::from(n * 2.0))
            }),
        );

        let method = object.get("double");
        let bound = method.as_function().and_then(Function::receiver);
        assert!(bound.is_some_and(|receiver| receiver.id() == object.id()));

        let reads = reads_of({
            let object = object.clone();
            move || {
                assert_eq!(object.call("double", &[]), Ok(Value::from(4)));
            }
        });
        assert!(!reads.reads(&object, "double"));
        // The method body read through the receiver.
        assert!(reads.reads(&object, "n"));
    }

    #[test]
    fn class_values_are_returned_as_is() {
        let class = Class::builder("Nested").build();
        let object = Observable::new();
        object.set("kind", class.clone());
        let reads = reads_of({
            let object = object.clone();
            move || {
                object.get("kind");
            }
        });
        assert!(reads.is_empty());
        assert!(object.get("kind").as_class().is_some_and(|c| c.ptr_eq(&class)));
    }

    #[test]
    fn identical_writes_are_silent() {
        let object = Observable::from_fields([("a", 1)]);
        let hits = Rc::new(Cell::new(0));
        let hits_clone = Rc::clone(&hits);
        let listener = Listener::new(move |_, _| hits_clone.set(hits_clone.get() + 1));
        object.admin().listen(&listener);

        assert!(!object.set("a", 1));
        assert_eq!(hits.get(), 0);
        assert!(object.set("a", 2));
        assert_eq!(hits.get(), 1);

        // Writing undefined over a missing key is also "identical".
        assert!(!object.set("never", Value::Undefined));

        // Same-value-zero: NaN over NaN and -0 over +0 do not count as changes.
        assert!(object.set("a", f64::NAN));
        assert!(!object.set("a", f64::NAN));
        assert!(object.set("a", 0.0));
        assert!(!object.set("a", -0.0));
        assert_eq!(hits.get(), 3);
        Runtime::global().flush();
    }

    #[test]
    fn records_are_wrapped_lazily_on_write() {
        let object = Observable::new();
        object.set("inner", Value::record([("deep", Value::record([("x", 1)]))]));

        let inner = object.get("inner");
        let inner = inner.as_object().unwrap();
        // One level wrapped; the nested record is still raw.
        assert!(inner.get("deep").as_data().is_some());

        inner.set("deep", Value::record([("x", 2)]));
        assert!(inner.get("deep").as_object().is_some());
    }

    #[test]
    fn wrapped_values_are_not_wrapped_twice() {
        let shared = Observable::from_fields([("x", 1)]);
        let a = Observable::new();
        let b = Observable::new();
        a.set("child", shared.clone());
        b.set("child", shared.clone());
        assert_eq!(a.get("child"), b.get("child"));
        assert_eq!(a.get("child").as_object().map(Observable::id), Some(shared.id()));
    }

    #[test]
    fn containers_are_bound_to_their_field() {
        let object = Observable::new();
        object.set("tags", Value::set(["a"]));
        let tags = object.get("tags").as_set().unwrap();
        assert_eq!(tags.container().field(), &PropertyKey::from("tags"));
        assert_eq!(object.get("tags").type_name(), "set");
    }

    #[test]
    fn define_does_not_report() {
        let object = Observable::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        object
            .admin()
            .listen(&Listener::new(move |key, _| seen_clone.borrow_mut().push(key.clone())));
        object.define("quiet", 1);
        object.set("loud", 1);
        assert_eq!(*seen.borrow(), [PropertyKey::from("loud")]);
    }

    #[test]
    fn remove_reports_existing_keys() {
        let object = Observable::from_fields([("a", 1)]);
        let seen = Rc::new(Cell::new(0));
        let seen_clone = Rc::clone(&seen);
        let listener = Listener::new(move |_, value| {
            assert!(value.is_undefined());
            seen_clone.set(seen_clone.get() + 1);
        });
        object.admin().listen(&listener);
        assert_eq!(object.remove("a"), Some(Value::from(1)));
        assert_eq!(object.remove("a"), None);
        assert_eq!(seen.get(), 1);
        assert!(!object.has("a"));
    }

    #[test]
    fn calling_a_non_function_fails() {
        let object = Observable::from_fields([("a", 1)]);
        assert_eq!(
            object.call("a", &[]),
            Err(ReactiveError::NotCallable { key: "a".into() })
        );
    }

    #[test]
    fn snapshot_unwraps_recursively() {
        let object = Observable::new();
        object.set("child", Value::record([("x", 1)]));
        object.set("items", Value::list([1, 2]));
        let Data::Record(fields) = object.snapshot() else {
            panic!("snapshot of an object is a record");
        };
        assert_eq!(fields.len(), 2);
        assert!(matches!(fields[0].as_data(), Some(Data::Record(_))));
        assert!(matches!(fields[1].as_data(), Some(Data::List(items)) if items.len() == 2));
    }
}
