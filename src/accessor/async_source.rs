use std::{rc::Weak, task::Poll};

use crate::{HookFilter, Index, MutationSink, Result, Subscription, Value};

use super::{hook_or_empty, unsupported, Accessor};

/// Latest item of an [`AsyncStream`](crate::AsyncStream).
pub struct StreamAccessor;

impl Accessor for StreamAccessor {
    fn name(&self) -> &'static str {
        "stream"
    }
    fn priority(&self) -> i32 {
        30
    }
    fn applies(&self, context: &Value, index: &Index) -> bool {
        matches!((context, index), (Value::Stream(_), Index::Resolved))
    }
    fn has_value(&self, context: &Value, _index: &Index) -> bool {
        matches!(context, Value::Stream(s) if s.latest().is_ready())
    }
    fn get_value(&self, context: &Value, index: &Index) -> Result<Value> {
        Ok(match self.get_resolved_value(context, index)? {
            Poll::Ready(value) => value,
            Poll::Pending => Value::Undefined,
        })
    }
    fn get_resolved_value(&self, context: &Value, index: &Index) -> Result<Poll<Value>> {
        match context {
            Value::Stream(s) => Ok(s.latest()),
            _ => Err(unsupported(context, index)),
        }
    }
    fn set_value(&self, context: &Value, index: &Index, _value: Value) -> Result<()> {
        Err(unsupported(context, index))
    }
    fn is_async(&self) -> bool {
        true
    }
    fn get_indexes(&self, context: &Value) -> Vec<Index> {
        match context {
            Value::Stream(_) => vec![Index::Resolved],
            _ => Vec::new(),
        }
    }
    fn instrument(
        &self,
        context: &Value,
        _index: &Index,
        sink: Weak<dyn MutationSink>,
    ) -> Result<Subscription> {
        Ok(hook_or_empty(context, HookFilter::Index(Index::Resolved), sink))
    }
}

/// Settled value of a [`Promise`](crate::Promise).
pub struct FutureAccessor;

impl Accessor for FutureAccessor {
    fn name(&self) -> &'static str {
        "future"
    }
    fn priority(&self) -> i32 {
        20
    }
    fn applies(&self, context: &Value, index: &Index) -> bool {
        matches!((context, index), (Value::Future(_), Index::Resolved))
    }
    fn has_value(&self, context: &Value, _index: &Index) -> bool {
        matches!(context, Value::Future(p) if p.value().is_ready())
    }
    fn get_value(&self, context: &Value, index: &Index) -> Result<Value> {
        Ok(match self.get_resolved_value(context, index)? {
            Poll::Ready(value) => value,
            Poll::Pending => Value::Undefined,
        })
    }
    fn get_resolved_value(&self, context: &Value, index: &Index) -> Result<Poll<Value>> {
        match context {
            Value::Future(p) => Ok(p.value()),
            _ => Err(unsupported(context, index)),
        }
    }
    fn set_value(&self, context: &Value, index: &Index, _value: Value) -> Result<()> {
        Err(unsupported(context, index))
    }
    fn is_async(&self) -> bool {
        true
    }
    fn get_indexes(&self, context: &Value) -> Vec<Index> {
        match context {
            Value::Future(_) => vec![Index::Resolved],
            _ => Vec::new(),
        }
    }
    fn instrument(
        &self,
        context: &Value,
        _index: &Index,
        sink: Weak<dyn MutationSink>,
    ) -> Result<Subscription> {
        Ok(hook_or_empty(context, HookFilter::Index(Index::Resolved), sink))
    }
}
