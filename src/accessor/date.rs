use std::rc::Weak;

use crate::{DateField, HookFilter, Index, MutationSink, Result, Subscription, Value};

use super::{unsupported, Accessor};

/// Derived calendar fields of a [`Date`](crate::Date). Keys such as `fullYear` are accepted
/// and normalised to [`Index::Date`].
pub struct DateAccessor;

fn field(index: &Index) -> Option<DateField> {
    match index {
        Index::Date(f) => Some(*f),
        Index::Key(key) => key.parse().ok(),
        _ => None,
    }
}

impl Accessor for DateAccessor {
    fn name(&self) -> &'static str {
        "date"
    }
    fn priority(&self) -> i32 {
        10
    }
    fn applies(&self, context: &Value, index: &Index) -> bool {
        matches!(context, Value::Date(_)) && field(index).is_some()
    }
    fn normalize_index(&self, _context: &Value, index: Index) -> Index {
        field(&index).map_or(index, Index::Date)
    }

    fn has_value(&self, context: &Value, index: &Index) -> bool {
        matches!(context, Value::Date(d) if d.is_valid()) && field(index).is_some()
    }
    fn get_value(&self, context: &Value, index: &Index) -> Result<Value> {
        match (context, field(index)) {
            (Value::Date(d), Some(f)) => Ok(Value::Number(d.field(f))),
            _ => Err(unsupported(context, index)),
        }
    }
    fn set_value(&self, context: &Value, index: &Index, value: Value) -> Result<()> {
        match (context, field(index)) {
            (Value::Date(d), Some(f)) => d.set_field(f, value.to_number().unwrap_or(f64::NAN)),
            _ => Err(unsupported(context, index)),
        }
    }

    fn get_indexes(&self, context: &Value) -> Vec<Index> {
        match context {
            Value::Date(_) => DateField::ALL.into_iter().map(Index::Date).collect(),
            _ => Vec::new(),
        }
    }
    fn instrument(
        &self,
        context: &Value,
        index: &Index,
        sink: Weak<dyn MutationSink>,
    ) -> Result<Subscription> {
        match (context, field(index)) {
            (Value::Date(d), Some(f)) => Ok(d.hook(HookFilter::Index(Index::Date(f)), sink)),
            _ => Err(unsupported(context, index)),
        }
    }
}
