use std::rc::Weak;

use crate::{Error, HookFilter, Index, MutationSink, PropertyKind, Result, Subscription, Value};

use super::{unsupported, Accessor};

/// Plain object properties, including computed ones.
pub struct FieldAccessor;

impl Accessor for FieldAccessor {
    fn name(&self) -> &'static str {
        "field"
    }
    fn priority(&self) -> i32 {
        80
    }
    fn applies(&self, context: &Value, index: &Index) -> bool {
        match (context, index) {
            (Value::Object(o), Index::Key(key)) => o.property_kind(key) != Some(PropertyKind::Method),
            (Value::Object(_), Index::Slot(_)) => true,
            _ => false,
        }
    }
    fn normalize_index(&self, _context: &Value, index: Index) -> Index {
        match index {
            Index::Slot(i) => Index::key(i.to_string()),
            index => index,
        }
    }

    fn has_value(&self, context: &Value, index: &Index) -> bool {
        match (context, index) {
            (Value::Object(o), Index::Key(key)) => o.has(key),
            _ => false,
        }
    }
    fn get_value(&self, context: &Value, index: &Index) -> Result<Value> {
        match (context, index) {
            (Value::Object(o), Index::Key(key)) => Ok(o.get(key)),
            _ => Err(unsupported(context, index)),
        }
    }
    fn set_value(&self, context: &Value, index: &Index, value: Value) -> Result<()> {
        match (context, index) {
            (Value::Object(o), Index::Key(key)) => o.set(key, value),
            _ => Err(unsupported(context, index)),
        }
    }

    fn get_indexes(&self, context: &Value) -> Vec<Index> {
        let Value::Object(o) = context else {
            return Vec::new();
        };
        o.keys()
            .into_iter()
            .filter(|key| o.property_kind(key) != Some(PropertyKind::Method))
            .map(Index::Key)
            .collect()
    }

    fn instrument(
        &self,
        context: &Value,
        index: &Index,
        sink: Weak<dyn MutationSink>,
    ) -> Result<Subscription> {
        let (Value::Object(o), Index::Key(key)) = (context, index) else {
            return Err(unsupported(context, index));
        };
        match o.property_kind(key) {
            Some(PropertyKind::Readonly) | Some(PropertyKind::Computed { settable: false }) => {
                Err(Error::Readonly {
                    type_name: context.type_name(),
                    index: key.to_string(),
                })
            }
            _ => Ok(o.hook(HookFilter::Index(index.clone()), sink)),
        }
    }
}
