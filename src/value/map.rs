use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;

use crate::{HookFilter, Index, Subscription, Value};

use super::{Hooks, Mutation, MutationSink};

/// Shared handle to an insertion-ordered map keyed by [`Value`].
#[derive(Clone, Default)]
pub struct Map(Rc<MapData>);

#[derive(Default)]
struct MapData {
    entries: RefCell<IndexMap<Value, Value>>,
    hooks: Hooks,
}

impl FromIterator<(Value, Value)> for Map {
    fn from_iter<T: IntoIterator<Item = (Value, Value)>>(iter: T) -> Self {
        let this = Self::new();
        for (key, value) in iter {
            this.insert(key, value);
        }
        this
    }
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn len(&self) -> usize {
        self.0.entries.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, key: &Value) -> Value {
        self.0.entries.borrow().get(key).cloned().unwrap_or_default()
    }
    pub fn has(&self, key: &Value) -> bool {
        self.0.entries.borrow().contains_key(key)
    }
    pub fn keys(&self) -> Vec<Value> {
        self.0.entries.borrow().keys().cloned().collect()
    }
    pub fn values(&self) -> Vec<Value> {
        self.0.entries.borrow().values().cloned().collect()
    }
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.0
            .entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// An existing key keeps its position.
    pub fn insert(&self, key: Value, value: Value) -> &Self {
        let old = self
            .0
            .entries
            .borrow_mut()
            .insert(key.clone(), value.clone());
        let added = old.is_none();
        drop(old);
        self.notify(key, value, added);
        self
    }

    pub fn delete(&self, key: &Value) -> bool {
        let removed = self.0.entries.borrow_mut().shift_remove_entry(key);
        match removed {
            Some((key, _)) => {
                self.notify(key, Value::Undefined, true);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.0.entries.borrow_mut());
        if removed.is_empty() {
            return;
        }
        let target = Value::Map(self.clone());
        let mut mutations: Vec<_> = removed
            .keys()
            .map(|k| Mutation::new(target.clone(), Index::Value(k.clone())))
            .map(|m| m.with_value(Value::Undefined))
            .collect();
        mutations.push(Mutation::new(target, Index::size()).with_value(Value::from(0)));
        drop(removed);
        self.0.hooks.notify_all(mutations);
    }

    pub(crate) fn hook(&self, filter: HookFilter, sink: Weak<dyn MutationSink>) -> Subscription {
        self.0.hooks.insert(filter, sink)
    }

    fn notify(&self, key: Value, value: Value, size_changed: bool) {
        let target = Value::Map(self.clone());
        let mut mutations = vec![Mutation::new(target.clone(), Index::Value(key)).with_value(value)];
        if size_changed {
            mutations.push(Mutation::new(target, Index::size()).with_value(Value::from(self.len())));
        }
        self.0.hooks.notify_all(mutations);
    }
}
