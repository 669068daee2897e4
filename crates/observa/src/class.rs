#![forbid(unsafe_code)]

//! Class definitions.
//!
//! A [`Class`] describes instances: initial field values (defined, not
//! written, so construction notifies nobody) and shared methods. Methods
//! live on the class rather than on each instance; an instance falls back to
//! its class when a key is not one of its own fields.
//!
//! A class stored as a property value is returned as-is by reads, never
//! tracked.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::key::PropertyKey;
use crate::object::Observable;
use crate::value::{Function, Value};

struct ClassInner {
    name: Rc<str>,
    fields: IndexMap<PropertyKey, Value>,
    methods: IndexMap<PropertyKey, Function>,
}

#[derive(Clone)]
pub struct Class {
    inner: Rc<ClassInner>,
}

impl Class {
    pub fn builder(name: &str) -> ClassBuilder {
        ClassBuilder {
            name: Rc::from(name),
            fields: IndexMap::new(),
            methods: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Create an instance whose administration is named after the class.
    #[must_use]
    pub fn instantiate(&self) -> Observable {
        let instance = Observable::with_parts(Some(self.clone()), IndexMap::new());
        for (key, value) in &self.inner.fields {
            instance.define(key, value.clone());
        }
        instance
    }

    /// Like [`instantiate`](Class::instantiate), then define `overrides` on
    /// top of the class defaults.
    pub fn instantiate_with<K, V>(&self, overrides: impl IntoIterator<Item = (K, V)>) -> Observable
    where
        K: Into<PropertyKey>,
        V: Into<Value>,
    {
        let instance = self.instantiate();
        for (key, value) in overrides {
            instance.define(key, value);
        }
        instance
    }

    #[must_use]
    pub fn method(&self, key: &PropertyKey) -> Option<&Function> {
        self.inner.methods.get(key)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &PropertyKey> + '_ {
        self.inner.methods.keys()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.inner.name)
            .field("fields", &self.inner.fields.len())
            .field("methods", &self.inner.methods.len())
            .finish()
    }
}

/// Builder for [`Class`].
#[must_use]
pub struct ClassBuilder {
    name: Rc<str>,
    fields: IndexMap<PropertyKey, Value>,
    methods: IndexMap<PropertyKey, Function>,
}

impl ClassBuilder {
    /// Default value of a field. Raw data is copied per instance when wrapped.
    pub fn field(mut self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn method(
        mut self,
        key: impl Into<PropertyKey>,
        body: impl Fn(&Observable, &[Value]) -> crate::error::Result<Value> + 'static,
    ) -> Self {
        self.methods.insert(key.into(), Function::method(body));
        self
    }

    pub fn build(self) -> Class {
        Class {
            inner: Rc::new(ClassInner {
                name: self.name,
                fields: self.fields,
                methods: self.methods,
            }),
        }
    }
}
