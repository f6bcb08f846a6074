use std::{
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

use serde::{
    de::{MapAccess, SeqAccess, Visitor},
    ser::{SerializeMap, SerializeSeq},
    Deserialize, Deserializer, Serialize, Serializer,
};

mod array;
mod async_source;
mod date;
mod function;
mod hooks;
mod map;
mod object;
mod set;

pub use array::{Array, MAX_ARRAY_LEN};
pub use async_source::{AsyncStream, Promise, PromiseState};
pub use date::{Date, DateField};
pub use function::Function;
pub use hooks::{HookFilter, Mutation, MutationSink};
pub(crate) use hooks::Hooks;
pub use map::Map;
pub use object::{Object, PropertyKind};
pub use set::Set;


/// A dynamically typed value. Reference variants are shared handles: cloning one
/// shares identity, and every mutation made through any clone is observable.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    Array(Array),
    Map(Map),
    Set(Set),
    Date(Date),
    Future(Promise),
    Stream(AsyncStream),
    Function(Function),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Undefined,
    Null,
    Bool,
    Number,
    String,
    Object,
    Array,
    Map,
    Set,
    Date,
    Future,
    Stream,
    Function,
}
impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Undefined => "undefined",
            Kind::Null => "null",
            Kind::Bool => "boolean",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Object => "Object",
            Kind::Array => "Array",
            Kind::Map => "Map",
            Kind::Set => "Set",
            Kind::Date => "Date",
            Kind::Future => "Promise",
            Kind::Stream => "Stream",
            Kind::Function => "Function",
        }
    }
}
impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Undefined => Kind::Undefined,
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Object(_) => Kind::Object,
            Value::Array(_) => Kind::Array,
            Value::Map(_) => Kind::Map,
            Value::Set(_) => Kind::Set,
            Value::Date(_) => Kind::Date,
            Value::Future(_) => Kind::Future,
            Value::Stream(_) => Kind::Stream,
            Value::Function(_) => Kind::Function,
        }
    }
    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    /// Address of the shared handle, `None` for primitives.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Object(v) => Some(v.addr()),
            Value::Array(v) => Some(v.addr()),
            Value::Map(v) => Some(v.addr()),
            Value::Set(v) => Some(v.addr()),
            Value::Date(v) => Some(v.addr()),
            Value::Future(v) => Some(v.addr()),
            Value::Stream(v) => Some(v.addr()),
            Value::Function(v) => Some(v.addr()),
            _ => None,
        }
    }

    /// Identity for handles, value equality for primitives; `NaN` equals itself.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b && self.kind() == other.kind(),
                _ => false,
            },
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }
    pub fn is_async(&self) -> bool {
        matches!(self, Value::Future(_) | Value::Stream(_))
    }
    /// Values whose inner locations can be observed.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Value::Object(_) | Value::Array(_) | Value::Map(_) | Value::Set(_) | Value::Date(_)
        )
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric conversion, `None` for values with no numeric meaning.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Undefined => Some(f64::NAN),
            Value::Null => Some(0.0),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => Some(*n),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Some(0.0)
                } else {
                    Some(s.parse().unwrap_or(f64::NAN))
                }
            }
            Value::Date(d) => Some(d.time()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
    pub fn as_set(&self) -> Option<&Set> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_date(&self) -> Option<&Date> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Install a mutation hook. `None` for values that never change.
    pub(crate) fn hook(
        &self,
        filter: HookFilter,
        sink: std::rc::Weak<dyn MutationSink>,
    ) -> Option<crate::Subscription> {
        Some(match self {
            Value::Object(v) => v.hook(filter, sink),
            Value::Array(v) => v.hook(filter, sink),
            Value::Map(v) => v.hook(filter, sink),
            Value::Set(v) => v.hook(filter, sink),
            Value::Date(v) => v.hook(filter, sink),
            Value::Future(v) => v.hook(filter, sink),
            Value::Stream(v) => v.hook(filter, sink),
            _ => return None,
        })
    }

    /// Read `key` from an object, `Undefined` for anything else.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(o) => o.get(key),
            _ => Value::Undefined,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            Value::Undefined | Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Number(n) => {
                let n = if *n == 0.0 {
                    0.0
                } else if n.is_nan() {
                    f64::NAN
                } else {
                    *n
                };
                n.to_bits().hash(state)
            }
            Value::String(s) => s.hash(state),
            _ => self.identity().hash(state),
        }
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        n.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Array(a) => {
                for (i, item) in a.to_vec().iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    if !item.is_nullish() {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Value::Map(_) => write!(f, "[object Map]"),
            Value::Set(_) => write!(f, "[object Set]"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Future(_) => write!(f, "[object Promise]"),
            Value::Stream(_) => write!(f, "[object Stream]"),
            Value::Function(func) => write!(f, "function {}()", func.name()),
        }
    }
}

/// Shallow: nested handles print as their kind and address only.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(o) => {
                let mut m = f.debug_map();
                for (key, value) in o.entries() {
                    m.entry(&key, &ShallowDebug(&value));
                }
                m.finish()
            }
            Value::Array(a) => f
                .debug_list()
                .entries(a.to_vec().iter().map(ShallowDebug))
                .finish(),
            Value::Map(m) => {
                write!(f, "Map ")?;
                f.debug_map()
                    .entries(
                        m.entries()
                            .iter()
                            .map(|(k, v)| (ShallowDebug(k), ShallowDebug(v))),
                    )
                    .finish()
            }
            Value::Set(s) => {
                write!(f, "Set ")?;
                f.debug_set()
                    .entries(s.values().iter().map(ShallowDebug))
                    .finish()
            }
            Value::Date(d) => write!(f, "Date({d})"),
            _ => write!(f, "{}#{:x}", self.type_name(), self.identity().unwrap_or(0)),
        }
    }
}

struct ShallowDebug<'a>(&'a Value);

impl fmt::Debug for ShallowDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.identity() {
            Some(addr) if !matches!(self.0, Value::Date(_)) => {
                write!(f, "{}#{:x}", self.0.type_name(), addr)
            }
            _ => fmt::Debug::fmt(self.0, f),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}
impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value.into())
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}
impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into())
    }
}
impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Value::String(value)
    }
}
impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(Array::from(value))
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Undefined, Into::into)
    }
}
macro_rules! impl_from_handle {
    ($($t:ident => $v:ident),*) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Value::$v(value)
                }
            }
        )*
    };
}
impl_from_handle!(
    Object => Object,
    Array => Array,
    Map => Map,
    Set => Set,
    Date => Date,
    Promise => Future,
    AsyncStream => Stream,
    Function => Function
);

/// Containers are written out recursively and must be acyclic.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if !n.is_finite() {
                    serializer.serialize_none()
                } else if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Object(o) => {
                let entries = o.entries();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in &entries {
                    if !matches!(value, Value::Function(_)) {
                        map.serialize_entry(&**key, value)?;
                    }
                }
                map.end()
            }
            Value::Array(a) => serialize_seq(serializer, &a.to_vec()),
            Value::Set(s) => serialize_seq(serializer, &s.values()),
            Value::Map(m) => {
                let entries = m.entries();
                let mut seq = serializer.serialize_seq(Some(entries.len()))?;
                for (key, value) in &entries {
                    seq.serialize_element(&[key, value])?;
                }
                seq.end()
            }
            Value::Date(d) => Value::Number(d.time()).serialize(serializer),
            Value::Future(p) => match p.value() {
                std::task::Poll::Ready(value) => value.serialize(serializer),
                std::task::Poll::Pending => serializer.serialize_none(),
            },
            Value::Stream(_) | Value::Function(_) => serializer.serialize_none(),
        }
    }
}
fn serialize_seq<S: Serializer>(serializer: S, items: &[Value]) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(items.len()))?;
    for item in items {
        seq.serialize_element(item)?;
    }
    seq.end()
}

/// JSON objects become [`Object`]s, arrays become [`Array`]s.
impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "any value")
    }
    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }
    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }
    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }
    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Number(v))
    }
    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        Ok(Value::from(v))
    }
    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::from(v))
    }
    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }
    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }
    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }
    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::Array(Array::from(items)))
    }
    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let object = Object::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            object.insert(key.as_str(), value);
        }
        Ok(Value::Object(object))
    }
}
