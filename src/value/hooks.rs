use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use slabmap::SlabMap;

use crate::{runtime::batch, Index, Subscription, Value};

/// A write observed by a container's hook table.
#[derive(Clone, Debug)]
pub struct Mutation {
    pub target: Value,
    pub index: Index,
    /// The new value, when the container already knows it.
    pub value: Option<Value>,
    pub arguments: Option<Rc<[Value]>>,
}

impl Mutation {
    pub(crate) fn new(target: Value, index: Index) -> Self {
        Self {
            target,
            index,
            value: None,
            arguments: None,
        }
    }
    pub(crate) fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

pub trait MutationSink: 'static {
    fn on_mutation(self: Rc<Self>, mutation: &Mutation);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookFilter {
    Index(Index),
    Any,
}
impl HookFilter {
    fn matches(&self, index: &Index) -> bool {
        match self {
            HookFilter::Index(i) => i == index,
            HookFilter::Any => true,
        }
    }
}

struct Hook {
    filter: HookFilter,
    sink: Weak<dyn MutationSink>,
}

/// Instrumentation table carried by every mutable container.
#[derive(Clone, Default)]
pub(crate) struct Hooks(Rc<RefCell<SlabMap<Hook>>>);

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, filter: HookFilter, sink: Weak<dyn MutationSink>) -> Subscription {
        let key = self.0.borrow_mut().insert(Hook { filter, sink });
        let table = Rc::downgrade(&self.0);
        Subscription::from_fn(move || {
            if let Some(table) = table.upgrade() {
                table.borrow_mut().remove(key);
            }
        })
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn notify(&self, mutation: Mutation) {
        self.notify_all([mutation]);
    }

    /// Deliver `mutations` as one batch.
    pub fn notify_all(&self, mutations: impl IntoIterator<Item = Mutation>) {
        if self.0.borrow().is_empty() {
            return;
        }
        batch(|| {
            for mutation in mutations {
                let sinks: Vec<_> = self
                    .0
                    .borrow()
                    .values()
                    .filter(|hook| hook.filter.matches(&mutation.index))
                    .filter_map(|hook| hook.sink.upgrade())
                    .collect();
                for sink in sinks {
                    sink.on_mutation(&mutation);
                }
            }
        })
    }
}
