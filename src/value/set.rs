use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use indexmap::IndexSet;

use crate::{HookFilter, Index, Subscription, Value};

use super::{Hooks, Mutation, MutationSink};

/// Shared handle to an insertion-ordered set of [`Value`]s.
///
/// A member is observed at `Index::Value(member)`: its value is the member while present
/// and `undefined` once deleted.
#[derive(Clone, Default)]
pub struct Set(Rc<SetData>);

#[derive(Default)]
struct SetData {
    values: RefCell<IndexSet<Value>>,
    hooks: Hooks,
}

impl FromIterator<Value> for Set {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        let this = Self::new();
        for value in iter {
            this.add(value);
        }
        this
    }
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn len(&self) -> usize {
        self.0.values.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn has(&self, value: &Value) -> bool {
        self.0.values.borrow().contains(value)
    }
    pub fn values(&self) -> Vec<Value> {
        self.0.values.borrow().iter().cloned().collect()
    }

    /// Returns `false` if `value` was already a member.
    pub fn add(&self, value: Value) -> bool {
        if !self.0.values.borrow_mut().insert(value.clone()) {
            return false;
        }
        self.notify(value.clone(), value);
        true
    }
    pub fn delete(&self, value: &Value) -> bool {
        let removed = self.0.values.borrow_mut().shift_take(value);
        match removed {
            Some(member) => {
                self.notify(member, Value::Undefined);
                true
            }
            None => false,
        }
    }
    pub fn clear(&self) {
        for value in self.values() {
            self.delete(&value);
        }
    }

    pub(crate) fn hook(&self, filter: HookFilter, sink: Weak<dyn MutationSink>) -> Subscription {
        self.0.hooks.insert(filter, sink)
    }

    fn notify(&self, member: Value, value: Value) {
        let target = Value::Set(self.clone());
        self.0.hooks.notify_all([
            Mutation::new(target.clone(), Index::Value(member)).with_value(value),
            Mutation::new(target, Index::size()).with_value(Value::from(self.len())),
        ]);
    }
}
