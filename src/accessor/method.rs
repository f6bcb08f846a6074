use std::rc::Weak;

use crate::{
    Array, DateField, Error, HookFilter, Index, MutationSink, PropertyKind, Result, Subscription,
    Value,
};

use super::{hook_or_empty, unsupported, Accessor};

/// Method calls, identified by method name and argument values.
///
/// Object methods are observed per call: an event fires whenever the method is invoked
/// through [`Object::call_method`](crate::Object::call_method) with equal arguments.
/// Builtin methods of containers are pure reads and are re-evaluated whenever their
/// receiver mutates.
pub struct MethodAccessor;

pub(crate) fn is_user_method(context: &Value, name: &str) -> bool {
    matches!(context, Value::Object(o) if o.property_kind(name) == Some(PropertyKind::Method))
}

impl Accessor for MethodAccessor {
    fn name(&self) -> &'static str {
        "method"
    }
    fn priority(&self) -> i32 {
        70
    }
    fn applies(&self, context: &Value, index: &Index) -> bool {
        match index {
            Index::Call(call) => {
                is_user_method(context, &call.name) || has_builtin(context, &call.name)
            }
            Index::Key(key) => is_user_method(context, key),
            _ => false,
        }
    }

    fn has_value(&self, context: &Value, index: &Index) -> bool {
        self.applies(context, index)
    }
    fn get_value(&self, context: &Value, index: &Index) -> Result<Value> {
        match index {
            Index::Key(key) => Ok(context.get(key)),
            Index::Call(call) => match context {
                Value::Object(o) if is_user_method(context, &call.name) => match o.get(&call.name) {
                    Value::Function(f) => f.call(context, &call.args),
                    _ => Err(Error::NotCallable(call.name.to_string())),
                },
                _ => call_builtin(context, &call.name, &call.args),
            },
            _ => Err(unsupported(context, index)),
        }
    }
    fn set_value(&self, context: &Value, index: &Index, _value: Value) -> Result<()> {
        Err(unsupported(context, index))
    }

    fn get_indexes(&self, _context: &Value) -> Vec<Index> {
        Vec::new()
    }

    fn instrument(
        &self,
        context: &Value,
        index: &Index,
        sink: Weak<dyn MutationSink>,
    ) -> Result<Subscription> {
        match index {
            Index::Call(call) if is_user_method(context, &call.name) => {
                Ok(hook_or_empty(context, HookFilter::Index(index.clone()), sink))
            }
            Index::Call(_) => Ok(hook_or_empty(context, HookFilter::Any, sink)),
            _ => Err(Error::MethodNotWatchable {
                type_name: context.type_name(),
                index: index.to_string(),
            }),
        }
    }
}

const MAP_METHODS: &[&str] = &["get", "has", "keys", "values"];
const SET_METHODS: &[&str] = &["has", "values"];
const ARRAY_METHODS: &[&str] = &["includes", "indexOf", "join", "at"];
const STRING_METHODS: &[&str] = &[
    "toUpperCase",
    "toLowerCase",
    "trim",
    "includes",
    "startsWith",
    "endsWith",
    "indexOf",
];

fn date_getter(name: &str) -> Option<DateField> {
    let rest = name.strip_prefix("get")?;
    let mut chars = rest.chars();
    let first = chars.next()?.to_ascii_lowercase();
    format!("{first}{}", chars.as_str()).parse().ok()
}

fn has_builtin(receiver: &Value, name: &str) -> bool {
    if name == "toString" {
        return !receiver.is_nullish();
    }
    match receiver {
        Value::Map(_) => MAP_METHODS.contains(&name),
        Value::Set(_) => SET_METHODS.contains(&name),
        Value::Array(_) => ARRAY_METHODS.contains(&name),
        Value::String(_) => STRING_METHODS.contains(&name),
        Value::Date(_) => name == "toISOString" || date_getter(name).is_some(),
        Value::Object(o) => name == "hasOwnProperty" && !o.has(name),
        _ => false,
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}
fn str_arg(args: &[Value], i: usize) -> String {
    args.get(i).map_or_else(|| "undefined".to_string(), |v| v.to_string())
}

/// Invoke a builtin method of `receiver`. These never mutate the receiver.
pub fn call_builtin(receiver: &Value, name: &str, args: &[Value]) -> Result<Value> {
    if !has_builtin(receiver, name) {
        return Err(Error::NotCallable(format!("{}.{name}", receiver.type_name())));
    }
    if name == "toString" {
        return Ok(Value::from(receiver.to_string()));
    }
    Ok(match receiver {
        Value::Map(m) => match name {
            "get" => m.get(&arg(args, 0)),
            "has" => Value::from(m.has(&arg(args, 0))),
            "keys" => Value::Array(Array::from(m.keys())),
            _ => Value::Array(Array::from(m.values())),
        },
        Value::Set(s) => match name {
            "has" => Value::from(s.has(&arg(args, 0))),
            _ => Value::Array(Array::from(s.values())),
        },
        Value::Array(a) => match name {
            "includes" => Value::from(a.includes(&arg(args, 0))),
            "indexOf" => Value::Number(a.index_of(&arg(args, 0)).map_or(-1.0, |i| i as f64)),
            "join" => {
                let separator = match args.first() {
                    None | Some(Value::Undefined) => ",".to_string(),
                    Some(v) => v.to_string(),
                };
                Value::from(a.join(&separator))
            }
            _ => {
                let i = arg(args, 0).to_number().unwrap_or(f64::NAN);
                let i = if i < 0.0 { a.len() as f64 + i } else { i };
                if i >= 0.0 && i.is_finite() {
                    a.get(i as usize)
                } else {
                    Value::Undefined
                }
            }
        },
        Value::String(s) => match name {
            "toUpperCase" => Value::from(s.to_uppercase()),
            "toLowerCase" => Value::from(s.to_lowercase()),
            "trim" => Value::from(s.trim()),
            "includes" => Value::from(s.contains(&str_arg(args, 0))),
            "startsWith" => Value::from(s.starts_with(&str_arg(args, 0))),
            "endsWith" => Value::from(s.ends_with(&str_arg(args, 0))),
            _ => {
                let needle = str_arg(args, 0);
                Value::Number(s.find(&needle).map_or(-1.0, |i| s[..i].chars().count() as f64))
            }
        },
        Value::Date(d) => match date_getter(name) {
            Some(field) => Value::Number(d.field(field)),
            None if d.is_valid() => Value::from(d.to_string()),
            None => return Err(Error::type_error("invalid time value")),
        },
        Value::Object(o) => Value::from(o.has(&str_arg(args, 0))),
        _ => return Err(Error::NotCallable(name.to_string())),
    })
}
