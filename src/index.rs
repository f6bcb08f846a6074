use std::{fmt, rc::Rc};

use parse_display::Display;

use crate::{DateField, Value};

/// A location inside a container.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum Index {
    /// Object property, or a named pseudo property such as `length` or `size`.
    #[display("{0}")]
    Key(Rc<str>),
    #[display("{0}")]
    Slot(usize),
    /// Map key or set member.
    #[display("{0}")]
    Value(Value),
    #[display("{0}")]
    Date(DateField),
    #[display("{0}")]
    Call(CallIndex),
    /// Settled value of a promise or latest item of a stream.
    #[display("<resolved>")]
    Resolved,
}

impl Index {
    pub fn key(key: impl Into<Rc<str>>) -> Self {
        Index::Key(key.into())
    }
    pub fn length() -> Self {
        Index::key("length")
    }
    pub fn size() -> Self {
        Index::key("size")
    }

    /// Non-negative integers become slots, strings become keys.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= u32::MAX as f64 => {
                Index::Slot(*n as usize)
            }
            Value::String(s) => Index::Key(s.clone()),
            v => Index::Value(v.clone()),
        }
    }
    pub fn to_value(&self) -> Value {
        match self {
            Index::Key(k) => Value::String(k.clone()),
            Index::Slot(i) => Value::from(*i),
            Index::Value(v) => v.clone(),
            Index::Date(f) => Value::from(f.to_string()),
            Index::Call(c) => Value::String(c.name.clone()),
            Index::Resolved => Value::Undefined,
        }
    }
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Index::Key(k) => Some(k),
            _ => None,
        }
    }
    /// A slot, or a key spelled as a canonical array index (`"0"`, `"12"`, not `"01"`).
    pub fn as_slot(&self) -> Option<usize> {
        match self {
            Index::Slot(i) => Some(*i),
            Index::Key(k) => {
                let canonical = &**k == "0" || (!k.starts_with('0') && k.bytes().all(|b| b.is_ascii_digit()));
                canonical.then(|| k.parse::<u32>().ok()).flatten().map(|n| n as usize)
            }
            _ => None,
        }
    }
}

impl From<&str> for Index {
    fn from(key: &str) -> Self {
        Index::key(key)
    }
}
impl From<usize> for Index {
    fn from(slot: usize) -> Self {
        Index::Slot(slot)
    }
}
impl From<DateField> for Index {
    fn from(field: DateField) -> Self {
        Index::Date(field)
    }
}
impl From<CallIndex> for Index {
    fn from(call: CallIndex) -> Self {
        Index::Call(call)
    }
}

/// A method call identified by method name and argument values.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallIndex {
    pub name: Rc<str>,
    pub args: Rc<[Value]>,
}

impl CallIndex {
    pub fn new(name: impl Into<Rc<str>>, args: impl Into<Rc<[Value]>>) -> Self {
        Self {
            name: name.into(),
            args: args.into(),
        }
    }
}

impl fmt::Display for CallIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg:?}")?;
        }
        write!(f, ")")
    }
}
