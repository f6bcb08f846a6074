use std::{
    cell::RefCell,
    ops::Range,
    rc::{Rc, Weak},
};

use crate::{Error, HookFilter, Index, Result, Subscription, Value};

use super::{Hooks, Mutation, MutationSink};

/// Longest array a write may create.
pub const MAX_ARRAY_LEN: usize = 1 << 24;

fn check_len(len: Option<usize>) -> Result<usize> {
    len.filter(|len| *len <= MAX_ARRAY_LEN)
        .ok_or_else(|| Error::type_error("invalid array length"))
}

/// Shared handle to a growable list of values.
///
/// Every mutating operation notifies one event per affected slot, then `length` if it
/// changed.
#[derive(Clone, Default)]
pub struct Array(Rc<ArrayData>);

#[derive(Default)]
struct ArrayData {
    items: RefCell<Vec<Value>>,
    hooks: Hooks,
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self(Rc::new(ArrayData {
            items: RefCell::new(items),
            hooks: Hooks::new(),
        }))
    }
}
impl FromIterator<Value> for Array {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, index: usize) -> Value {
        self.0
            .items
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or_default()
    }
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    pub fn push(&self, value: Value) -> usize {
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.push(value);
            items.len()
        };
        self.notify_range(len - 1..len, Some(len - 1));
        len
    }
    pub fn pop(&self) -> Value {
        let (value, len) = {
            let mut items = self.0.items.borrow_mut();
            (items.pop(), items.len())
        };
        match value {
            Some(value) => {
                self.notify_range(len..len + 1, Some(len + 1));
                value
            }
            None => Value::Undefined,
        }
    }

    /// Insert at `index`, clamped to the current length.
    pub fn insert(&self, index: usize, value: Value) {
        let (index, len) = {
            let mut items = self.0.items.borrow_mut();
            let index = index.min(items.len());
            items.insert(index, value);
            (index, items.len())
        };
        self.notify_range(index..len, Some(len - 1));
    }
    pub fn remove(&self, index: usize) -> Value {
        let removed = {
            let mut items = self.0.items.borrow_mut();
            (index < items.len()).then(|| (items.remove(index), items.len()))
        };
        match removed {
            Some((value, len)) => {
                self.notify_range(index..len + 1, Some(len + 1));
                value
            }
            None => Value::Undefined,
        }
    }

    /// Write a slot, filling any gap with `undefined`.
    ///
    /// Fails when the array would grow beyond [`MAX_ARRAY_LEN`].
    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        check_len(index.checked_add(1))?;
        let (old_len, len, old) = {
            let mut items = self.0.items.borrow_mut();
            let old_len = items.len();
            if index >= old_len {
                items.resize(index + 1, Value::Undefined);
            }
            let old = std::mem::replace(&mut items[index], value);
            (old_len, items.len(), old)
        };
        drop(old);
        if len == old_len {
            self.notify_range(index..index + 1, None);
        } else {
            self.notify_range(old_len..len, Some(old_len));
        }
        Ok(())
    }
    pub fn set_len(&self, new_len: usize) -> Result<()> {
        self.resize(check_len(Some(new_len))?);
        Ok(())
    }
    fn resize(&self, new_len: usize) {
        let (old_len, removed) = {
            let mut items = self.0.items.borrow_mut();
            let old_len = items.len();
            let removed = if new_len < old_len {
                items.split_off(new_len)
            } else {
                items.resize(new_len, Value::Undefined);
                Vec::new()
            };
            (old_len, removed)
        };
        drop(removed);
        if old_len != new_len {
            self.notify_range(new_len.min(old_len)..new_len.max(old_len), Some(old_len));
        }
    }
    pub fn clear(&self) {
        self.resize(0);
    }

    pub fn includes(&self, value: &Value) -> bool {
        self.index_of(value).is_some()
    }
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.0.items.borrow().iter().position(|v| v.same(value))
    }
    pub fn join(&self, separator: &str) -> String {
        self.0
            .items
            .borrow()
            .iter()
            .map(|v| if v.is_nullish() { String::new() } else { v.to_string() })
            .collect::<Vec<_>>()
            .join(separator)
    }

    pub(crate) fn hook(&self, filter: HookFilter, sink: Weak<dyn MutationSink>) -> Subscription {
        self.0.hooks.insert(filter, sink)
    }

    /// Notify every slot in `slots`, and `length` when `old_len` differs from the current
    /// length.
    fn notify_range(&self, slots: Range<usize>, old_len: Option<usize>) {
        let target = Value::Array(self.clone());
        let len = self.len();
        let mut mutations: Vec<_> = slots
            .map(|i| Mutation::new(target.clone(), Index::Slot(i)).with_value(self.get(i)))
            .collect();
        if old_len.is_some_and(|old| old != len) {
            mutations.push(Mutation::new(target, Index::length()).with_value(Value::from(len)));
        }
        self.0.hooks.notify_all(mutations);
    }
}
