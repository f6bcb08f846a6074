use std::rc::Weak;

use crate::{HookFilter, Index, MutationSink, Result, Subscription, Value};

use super::{hook_or_empty, unsupported, Accessor};

/// Array slots and `length`. Strings are readable the same way.
pub struct ArrayAccessor;

impl Accessor for ArrayAccessor {
    fn name(&self) -> &'static str {
        "array"
    }
    fn priority(&self) -> i32 {
        60
    }
    fn applies(&self, context: &Value, index: &Index) -> bool {
        matches!(context, Value::Array(_) | Value::String(_))
            && (index.as_slot().is_some() || index.as_key() == Some("length"))
    }
    fn normalize_index(&self, _context: &Value, index: Index) -> Index {
        match index.as_slot() {
            Some(i) => Index::Slot(i),
            None => index,
        }
    }

    fn has_value(&self, context: &Value, index: &Index) -> bool {
        match index {
            Index::Slot(i) => *i < len(context),
            _ => true,
        }
    }
    fn get_value(&self, context: &Value, index: &Index) -> Result<Value> {
        Ok(match (context, index) {
            (_, Index::Key(_)) => Value::from(len(context)),
            (Value::Array(a), Index::Slot(i)) => a.get(*i),
            (Value::String(s), Index::Slot(i)) => s
                .chars()
                .nth(*i)
                .map_or(Value::Undefined, |c| Value::from(c.to_string())),
            _ => return Err(unsupported(context, index)),
        })
    }
    fn set_value(&self, context: &Value, index: &Index, value: Value) -> Result<()> {
        let Value::Array(a) = context else {
            return Err(unsupported(context, index));
        };
        match index {
            Index::Slot(i) => a.set(*i, value)?,
            _ => match value.to_number() {
                Some(n) if n >= 0.0 && n.fract() == 0.0 => a.set_len(n as usize)?,
                _ => return Err(crate::Error::type_error("invalid array length")),
            },
        }
        Ok(())
    }

    fn get_indexes(&self, context: &Value) -> Vec<Index> {
        match context {
            Value::Array(a) => (0..a.len()).map(Index::Slot).collect(),
            _ => Vec::new(),
        }
    }
    fn instrument(
        &self,
        context: &Value,
        index: &Index,
        sink: Weak<dyn MutationSink>,
    ) -> Result<Subscription> {
        Ok(hook_or_empty(context, HookFilter::Index(index.clone()), sink))
    }
}

fn len(context: &Value) -> usize {
    match context {
        Value::Array(a) => a.len(),
        Value::String(s) => s.chars().count(),
        _ => 0,
    }
}

/// Map keys and `size`.
pub struct MapAccessor;

impl Accessor for MapAccessor {
    fn name(&self) -> &'static str {
        "map"
    }
    fn priority(&self) -> i32 {
        50
    }
    fn applies(&self, context: &Value, index: &Index) -> bool {
        matches!(context, Value::Map(_)) && is_member_index(index)
    }
    fn normalize_index(&self, _context: &Value, index: Index) -> Index {
        normalize_member(index)
    }

    fn has_value(&self, context: &Value, index: &Index) -> bool {
        match (context, normalize_member(index.clone())) {
            (Value::Map(m), Index::Value(key)) => m.has(&key),
            (Value::Map(_), _) => true,
            _ => false,
        }
    }
    fn get_value(&self, context: &Value, index: &Index) -> Result<Value> {
        match (context, normalize_member(index.clone())) {
            (Value::Map(m), Index::Value(key)) => Ok(m.get(&key)),
            (Value::Map(m), _) => Ok(Value::from(m.len())),
            _ => Err(unsupported(context, index)),
        }
    }
    fn set_value(&self, context: &Value, index: &Index, value: Value) -> Result<()> {
        match (context, normalize_member(index.clone())) {
            (Value::Map(m), Index::Value(key)) => {
                m.insert(key, value);
                Ok(())
            }
            _ => Err(unsupported(context, index)),
        }
    }

    fn get_indexes(&self, context: &Value) -> Vec<Index> {
        match context {
            Value::Map(m) => m.keys().into_iter().map(Index::Value).collect(),
            _ => Vec::new(),
        }
    }
    fn instrument(
        &self,
        context: &Value,
        index: &Index,
        sink: Weak<dyn MutationSink>,
    ) -> Result<Subscription> {
        let index = normalize_member(index.clone());
        Ok(hook_or_empty(context, HookFilter::Index(index), sink))
    }
}

/// Set membership and `size`. A member reads as itself while present.
pub struct SetAccessor;

impl Accessor for SetAccessor {
    fn name(&self) -> &'static str {
        "set"
    }
    fn priority(&self) -> i32 {
        40
    }
    fn applies(&self, context: &Value, index: &Index) -> bool {
        matches!(context, Value::Set(_)) && is_member_index(index)
    }
    fn normalize_index(&self, _context: &Value, index: Index) -> Index {
        normalize_member(index)
    }

    fn has_value(&self, context: &Value, index: &Index) -> bool {
        match (context, normalize_member(index.clone())) {
            (Value::Set(s), Index::Value(member)) => s.has(&member),
            (Value::Set(_), _) => true,
            _ => false,
        }
    }
    fn get_value(&self, context: &Value, index: &Index) -> Result<Value> {
        match (context, normalize_member(index.clone())) {
            (Value::Set(s), Index::Value(member)) => {
                Ok(if s.has(&member) { member } else { Value::Undefined })
            }
            (Value::Set(s), _) => Ok(Value::from(s.len())),
            _ => Err(unsupported(context, index)),
        }
    }
    /// A nullish or `false` value deletes the member, anything else adds it.
    fn set_value(&self, context: &Value, index: &Index, value: Value) -> Result<()> {
        match (context, normalize_member(index.clone())) {
            (Value::Set(s), Index::Value(member)) => {
                if value.is_nullish() || matches!(value, Value::Bool(false)) {
                    s.delete(&member);
                } else {
                    s.add(member);
                }
                Ok(())
            }
            _ => Err(unsupported(context, index)),
        }
    }

    fn get_indexes(&self, context: &Value) -> Vec<Index> {
        match context {
            Value::Set(s) => s.values().into_iter().map(Index::Value).collect(),
            _ => Vec::new(),
        }
    }
    fn instrument(
        &self,
        context: &Value,
        index: &Index,
        sink: Weak<dyn MutationSink>,
    ) -> Result<Subscription> {
        let index = normalize_member(index.clone());
        Ok(hook_or_empty(context, HookFilter::Index(index), sink))
    }
}

fn is_member_index(index: &Index) -> bool {
    !matches!(index, Index::Call(_) | Index::Resolved | Index::Date(_))
}

/// Keys and slots address members by value, except the `size` pseudo property.
fn normalize_member(index: Index) -> Index {
    match index {
        Index::Key(key) if &*key == "size" => Index::Key(key),
        Index::Key(_) | Index::Slot(_) => Index::Value(index.to_value()),
        index => index,
    }
}
