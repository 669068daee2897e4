#![forbid(unsafe_code)]

//! Dynamic values stored in observable objects.
//!
//! [`Value`] is the tagged variant every property holds. Primitives compare
//! by value; reference kinds (raw [`Data`], wrapped objects, containers,
//! functions, classes) compare by identity, so an assignment of the same
//! handle is recognised as "no change" without a deep comparison.
//!
//! Numbers use same-value-zero equality (`NaN == NaN`, `-0 == +0`), which
//! keeps `Value` usable as a key of map and set containers.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::class::Class;
use crate::container::{Container, ObservableDate, ObservableList, ObservableMap, ObservableSet};
use crate::error::{ReactiveError, Result};
use crate::key::PropertyKey;
use crate::object::Observable;

/// Raw, not yet observable data.
///
/// Storing it into an [`Observable`] wraps it: records become observable
/// objects, the other kinds become [`Container`]s bound to the field.
#[derive(Debug, Clone)]
pub enum Data {
    Record(IndexMap<PropertyKey, Value>),
    List(Vec<Value>),
    Map(IndexMap<Value, Value>),
    Set(IndexSet<Value>),
    /// Milliseconds since the Unix epoch.
    Date(i64),
}

impl Data {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Record(_) => "record",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Date(_) => "date",
        }
    }
}

type Body = dyn Fn(Option<&Observable>, &[Value]) -> Result<Value>;

/// A callable property value.
///
/// Reading a function from an [`Observable`] yields a copy bound to that
/// observable, so reads made through the receiver stay tracked.
#[derive(Clone)]
pub struct Function {
    body: Rc<Body>,
    receiver: Option<Observable>,
}

impl Function {
    /// A free function that ignores its receiver.
    pub fn new(f: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        Self {
            body: Rc::new(move |_, args| f(args)),
            receiver: None,
        }
    }

    /// A method; calling it unbound fails with
    /// [`ReactiveError::MissingReceiver`].
    pub fn method(f: impl Fn(&Observable, &[Value]) -> Result<Value> + 'static) -> Self {
        Self {
            body: Rc::new(move |this, args| match this {
                Some(this) => f(this, args),
                None => Err(ReactiveError::MissingReceiver),
            }),
            receiver: None,
        }
    }

    #[must_use]
    pub fn bind(&self, receiver: &Observable) -> Self {
        Self {
            body: Rc::clone(&self.body),
            receiver: Some(receiver.clone()),
        }
    }

    #[must_use]
    pub fn receiver(&self) -> Option<&Observable> {
        self.receiver.as_ref()
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.body)(self.receiver.as_ref(), args)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.body) as *const () as usize
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
            && self.receiver.as_ref().map(Observable::id) == other.receiver.as_ref().map(Observable::id)
    }
}

impl Eq for Function {}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("bound", &self.receiver.is_some())
            .finish_non_exhaustive()
    }
}

/// A property value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(Rc<str>),
    Data(Rc<Data>),
    Object(Observable),
    Container(Container),
    Function(Function),
    Class(Class),
}

impl Value {
    pub fn record<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<PropertyKey>,
        V: Into<Value>,
    {
        Self::from(Data::Record(
            fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }

    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::from(Data::List(items.into_iter().map(Into::into).collect()))
    }

    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Value>,
        V: Into<Value>,
    {
        Self::from(Data::Map(
            entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }

    pub fn set<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::from(Data::Set(items.into_iter().map(Into::into).collect()))
    }

    #[must_use]
    pub fn date(epoch_millis: i64) -> Self {
        Self::from(Data::Date(epoch_millis))
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_data(&self) -> Option<&Data> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Observable> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Self::Container(container) => Some(container),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<ObservableList> {
        self.as_container().and_then(Container::as_list)
    }

    #[must_use]
    pub fn as_map(&self) -> Option<ObservableMap> {
        self.as_container().and_then(Container::as_map)
    }

    #[must_use]
    pub fn as_set(&self) -> Option<ObservableSet> {
        self.as_container().and_then(Container::as_set)
    }

    #[must_use]
    pub fn as_date(&self) -> Option<ObservableDate> {
        self.as_container().and_then(Container::as_date)
    }

    #[must_use]
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_class(&self) -> Option<&Class> {
        match self {
            Self::Class(class) => Some(class),
            _ => None,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Data(data) => data.kind_name(),
            Self::Object(_) => "object",
            Self::Container(container) => container.kind().name(),
            Self::Function(_) => "function",
            Self::Class(_) => "class",
        }
    }
}

/// Canonical bit pattern so equal numbers hash equally.
fn number_bits(n: f64) -> u64 {
    if n == 0.0 {
        0
    } else if n.is_nan() {
        f64::NAN.to_bits()
    } else {
        n.to_bits()
    }
}

fn format_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NaN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Data(a), Self::Data(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => a.id() == b.id(),
            (Self::Container(a), Self::Container(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a == b,
            (Self::Class(a), Self::Class(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Undefined | Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Number(n) => number_bits(*n).hash(state),
            Self::Text(s) => s.hash(state),
            Self::Data(data) => Rc::as_ptr(data).hash(state),
            Self::Object(object) => object.id().hash(state),
            Self::Container(container) => container.addr().hash(state),
            Self::Function(function) => function.addr().hash(state),
            Self::Class(class) => class.addr().hash(state),
        }
    }
}

/// String conversion used when composing per-entry keys (`field.entry`).
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => format_number(*n, f),
            Self::Text(s) => f.write_str(s),
            Self::Data(data) => write!(f, "[{}]", data.kind_name()),
            Self::Object(_) => f.write_str("[object]"),
            Self::Container(container) => write!(f, "[{}]", container.kind().name()),
            Self::Function(_) => f.write_str("[function]"),
            Self::Class(class) => write!(f, "[class {}]", class.name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::Text(s) => write!(f, "Text({s:?})"),
            Self::Data(data) => f.debug_tuple("Data").field(data).finish(),
            Self::Object(object) => object.fmt(f),
            Self::Container(container) => container.fmt(f),
            Self::Function(function) => function.fmt(f),
            Self::Class(class) => class.fmt(f),
        }
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Undefined
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(Rc::from(s))
    }
}

impl From<Data> for Value {
    fn from(data: Data) -> Self {
        Self::Data(Rc::new(data))
    }
}

impl From<Observable> for Value {
    fn from(object: Observable) -> Self {
        Self::Object(object)
    }
}

impl From<Container> for Value {
    fn from(container: Container) -> Self {
        Self::Container(container)
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Self::Function(function)
    }
}

impl From<Class> for Value {
    fn from(class: Class) -> Self {
        Self::Class(class)
    }
}
