use std::{
    fmt,
    rc::{Rc, Weak},
    task::Poll,
};

use iter_n::iter2::*;

use crate::{Error, Index, MutationSink, Result, Subscription, Value};

mod async_source;
mod collection;
mod date;
mod field;
mod method;

pub use async_source::{FutureAccessor, StreamAccessor};
pub use collection::{ArrayAccessor, MapAccessor, SetAccessor};
pub use date::DateAccessor;
pub use field::FieldAccessor;
pub use method::{call_builtin, MethodAccessor};
pub(crate) use method::is_user_method;


/// Strategy reading, writing and instrumenting one category of `(context, index)` pairs.
pub trait Accessor: 'static {
    fn name(&self) -> &'static str;
    /// Higher priorities are tried first.
    fn priority(&self) -> i32;
    fn applies(&self, context: &Value, index: &Index) -> bool;

    /// Map an index to the form mutation hooks report it in.
    fn normalize_index(&self, context: &Value, index: Index) -> Index {
        let _ = context;
        index
    }

    fn has_value(&self, context: &Value, index: &Index) -> bool;
    fn get_value(&self, context: &Value, index: &Index) -> Result<Value>;

    /// The value a synchronous read observes. Async sources return their cached settled
    /// value, or `Pending`.
    fn get_resolved_value(&self, context: &Value, index: &Index) -> Result<Poll<Value>> {
        Ok(Poll::Ready(self.get_value(context, index)?))
    }

    fn set_value(&self, context: &Value, index: &Index, value: Value) -> Result<()>;

    fn is_async(&self) -> bool {
        false
    }

    /// Enumerable indexes, used to recurse into a whole container. Empty for contexts the
    /// accessor does not handle.
    fn get_indexes(&self, context: &Value) -> Vec<Index>;

    /// Install the hook that reports writes to `index`. The returned subscription removes
    /// it.
    fn instrument(
        &self,
        context: &Value,
        index: &Index,
        sink: Weak<dyn MutationSink>,
    ) -> Result<Subscription>;
}

pub(crate) fn unsupported(context: &Value, index: &Index) -> Error {
    Error::Unsupported {
        type_name: context.type_name(),
        index: index.to_string(),
    }
}

/// Install a hook on `context`, or nothing if it is immutable.
pub(crate) fn hook_or_empty(
    context: &Value,
    filter: crate::HookFilter,
    sink: Weak<dyn MutationSink>,
) -> Subscription {
    context.hook(filter, sink).unwrap_or_default()
}

/// Priority ordered accessors. The first one that applies wins.
#[derive(Clone)]
pub struct AccessorChain(Rc<[Rc<dyn Accessor>]>);

impl AccessorChain {
    pub fn new(accessors: impl IntoIterator<Item = Rc<dyn Accessor>>) -> Self {
        let mut accessors: Vec<_> = accessors.into_iter().collect();
        accessors.sort_by_key(|a| std::cmp::Reverse(a.priority()));
        Self(accessors.into())
    }

    /// Field, method, array, map, set, stream, future and date accessors.
    pub fn builtin() -> Self {
        Self::new([
            Rc::new(FieldAccessor) as Rc<dyn Accessor>,
            Rc::new(MethodAccessor),
            Rc::new(ArrayAccessor),
            Rc::new(MapAccessor),
            Rc::new(SetAccessor),
            Rc::new(StreamAccessor),
            Rc::new(FutureAccessor),
            Rc::new(DateAccessor),
        ])
    }

    /// A new chain with `accessor` added.
    pub fn with(&self, accessor: impl Accessor) -> Self {
        let accessor: Rc<dyn Accessor> = Rc::new(accessor);
        Self::new(self.0.iter().cloned().chain([accessor]))
    }

    pub fn accessors(&self) -> impl Iterator<Item = &Rc<dyn Accessor>> {
        self.0.iter()
    }

    /// Pick the accessor for `(context, index)`.
    pub fn resolve(&self, context: &Value, index: &Index) -> Result<Rc<dyn Accessor>> {
        self.0
            .iter()
            .find(|a| a.applies(context, index))
            .cloned()
            .ok_or_else(|| Error::NoAccessor {
                type_name: context.type_name(),
                index: index.to_string(),
            })
    }

    /// Pick the accessor for `(context, index)` together with the index in the form it
    /// expects.
    pub fn resolve_normalized(&self, context: &Value, index: &Index) -> Result<(Rc<dyn Accessor>, Index)> {
        let accessor = self.resolve(context, index)?;
        let index = accessor.normalize_index(context, index.clone());
        Ok((accessor, index))
    }

    pub fn has_value(&self, context: &Value, index: &Index) -> bool {
        self.resolve_normalized(context, index)
            .is_ok_and(|(a, index)| a.has_value(context, &index))
    }
    pub fn get_value(&self, context: &Value, index: &Index) -> Result<Value> {
        let (a, index) = self.resolve_normalized(context, index)?;
        a.get_value(context, &index)
    }
    pub fn get_resolved_value(&self, context: &Value, index: &Index) -> Result<Poll<Value>> {
        let (a, index) = self.resolve_normalized(context, index)?;
        a.get_resolved_value(context, &index)
    }
    pub fn set_value(&self, context: &Value, index: &Index, value: Value) -> Result<()> {
        let (a, index) = self.resolve_normalized(context, index)?;
        a.set_value(context, &index, value)
    }

    /// Child indexes of `context`. An async source has the single index
    /// [`Index::Resolved`].
    pub fn get_indexes(&self, context: &Value) -> impl Iterator<Item = Index> {
        if context.is_async() {
            [Index::Resolved].into_iter().into_iter0()
        } else {
            let indexes = self
                .0
                .iter()
                .map(|a| a.get_indexes(context))
                .find(|indexes| !indexes.is_empty())
                .unwrap_or_default();
            indexes.into_iter().into_iter1()
        }
    }
}

impl Default for AccessorChain {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for AccessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|a| a.name()))
            .finish()
    }
}
