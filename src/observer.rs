use std::{
    cell::{Cell, RefCell},
    fmt,
    mem::take,
    rc::Rc,
    task::Poll,
};

use tracing::trace;

use crate::{
    accessor::{is_user_method, Accessor, AccessorChain},
    event::Multicast,
    runtime::report_error,
    ErrorReport, Index, Mutation, MutationSink, Result, Subscription, Value,
};

mod group;

pub use group::{ObserverGroup, WatchRule};

#[cfg(test)]
mod tests;

/// One step of a [`ChangeEvent`]'s containment path.
#[derive(Clone, Debug)]
pub struct ChainLink {
    pub object: Value,
    pub index: Index,
}

/// Writes a value back to the location an event came from.
#[derive(Clone)]
pub struct SetValue(Rc<dyn Fn(Value) -> Result<()>>);

impl SetValue {
    pub fn call(&self, value: Value) -> Result<()> {
        (self.0)(value)
    }
}
impl fmt::Debug for SetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SetValue")
    }
}

/// A change to a watched location.
///
/// `chain[0]` is the outermost watched root and the last link is the mutated location.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub target: Value,
    pub index: Index,
    pub new_value: Value,
    pub chain: Vec<ChainLink>,
    pub arguments: Option<Rc<[Value]>>,
    pub set_value: Option<SetValue>,
}

impl ChangeEvent {
    /// The chain indexes joined with `.`.
    pub fn path(&self) -> String {
        self.chain
            .iter()
            .map(|link| link.index.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }
    pub(crate) fn prepend(&self, link: ChainLink) -> Self {
        let mut e = self.clone();
        e.chain.insert(0, link);
        e
    }
}

/// Tracks the value of one `(context, index)` location.
///
/// Writes that leave the value unchanged are suppressed. Until [`initialize`]
/// (Self::initialize) is called the cached value follows writes silently.
#[derive(Clone)]
pub struct Observer(Rc<ObserverData>);

struct ObserverData {
    context: Value,
    index: Index,
    accessor: Rc<dyn Accessor>,
    is_call: bool,
    value: RefCell<Poll<Value>>,
    is_initialized: Cell<bool>,
    is_disposed: Cell<bool>,
    changed: Multicast<ChangeEvent>,
    hook: RefCell<Subscription>,
}

impl Observer {
    pub fn new(chain: &AccessorChain, context: Value, index: Index) -> Result<Self> {
        let accessor = chain.resolve(&context, &index)?;
        let index = accessor.normalize_index(&context, index);
        let is_call = matches!(&index, Index::Call(c) if is_user_method(&context, &c.name));
        let value = if is_call {
            Poll::Ready(Value::Undefined)
        } else {
            accessor.get_resolved_value(&context, &index)?
        };
        let data = Rc::new(ObserverData {
            context,
            index,
            accessor,
            is_call,
            value: RefCell::new(value),
            is_initialized: Cell::new(false),
            is_disposed: Cell::new(false),
            changed: Multicast::new(),
            hook: RefCell::new(Subscription::empty()),
        });
        let sink = Rc::downgrade(&data);
        let hook = data.accessor.instrument(&data.context, &data.index, sink)?;
        *data.hook.borrow_mut() = hook;
        Ok(Self(data))
    }

    pub fn context(&self) -> &Value {
        &self.0.context
    }
    pub fn index(&self) -> &Index {
        &self.0.index
    }
    pub fn accessor(&self) -> &Rc<dyn Accessor> {
        &self.0.accessor
    }
    /// The cached value, `Pending` for an unsettled async location.
    pub fn value(&self) -> Poll<Value> {
        self.0.value.borrow().clone()
    }
    pub fn is_async(&self) -> bool {
        self.0.accessor.is_async()
    }

    /// Write through the accessor.
    pub fn set(&self, value: Value) -> Result<()> {
        self.0
            .accessor
            .set_value(&self.0.context, &self.0.index, value)
    }

    pub fn subscribe(&self, f: impl FnMut(&ChangeEvent) + 'static) -> Subscription {
        self.0.changed.subscribe(f)
    }
    pub fn changed(&self) -> &Multicast<ChangeEvent> {
        &self.0.changed
    }

    pub fn initialize(&self) {
        self.0.is_initialized.set(true);
    }
    pub fn is_initialized(&self) -> bool {
        self.0.is_initialized.get()
    }

    /// Remove the instrumentation and stop emitting. Calling it again does nothing.
    pub fn dispose(&self) {
        if self.0.is_disposed.replace(true) {
            return;
        }
        let mut hook = take(&mut *self.0.hook.borrow_mut());
        hook.unsubscribe();
        self.0.changed.close();
    }
    pub fn is_disposed(&self) -> bool {
        self.0.is_disposed.get()
    }

    pub(crate) fn link(&self) -> ChainLink {
        ChainLink {
            object: self.0.context.clone(),
            index: self.0.index.clone(),
        }
    }
    pub(crate) fn set_value_fn(&self) -> SetValue {
        let accessor = self.0.accessor.clone();
        let context = self.0.context.clone();
        let index = self.0.index.clone();
        SetValue(Rc::new(move |value| accessor.set_value(&context, &index, value)))
    }
    /// An event describing the current value, as if it had just been written.
    pub(crate) fn current_event(&self) -> Option<ChangeEvent> {
        let Poll::Ready(new_value) = self.value() else {
            return None;
        };
        Some(ChangeEvent {
            target: self.0.context.clone(),
            index: self.0.index.clone(),
            new_value,
            chain: vec![self.link()],
            arguments: None,
            set_value: Some(self.set_value_fn()),
        })
    }
}

impl ObserverData {
    fn read(&self, mutation: &Mutation) -> Result<Poll<Value>> {
        if mutation.index == self.index {
            if let Some(value) = &mutation.value {
                return Ok(Poll::Ready(value.clone()));
            }
        }
        self.accessor.get_resolved_value(&self.context, &self.index)
    }
}

impl MutationSink for ObserverData {
    fn on_mutation(self: Rc<Self>, mutation: &Mutation) {
        if self.is_disposed.get() {
            return;
        }
        let value = match self.read(mutation) {
            Ok(value) => value,
            Err(e) => {
                report_error(ErrorReport::new(e).with_context("observer read"));
                return;
            }
        };
        let Poll::Ready(new_value) = &value else {
            return;
        };
        if !self.is_call {
            if let Poll::Ready(old) = &*self.value.borrow() {
                if old.same(new_value) {
                    return;
                }
            }
        }
        let new_value = new_value.clone();
        let old = self.value.replace(value);
        drop(old);
        if !self.is_initialized.get() {
            return;
        }
        trace!(index = %self.index, "change");
        let observer = Observer(self.clone());
        self.changed.emit(&ChangeEvent {
            target: self.context.clone(),
            index: self.index.clone(),
            new_value,
            chain: vec![observer.link()],
            arguments: mutation.arguments.clone(),
            set_value: Some(observer.set_value_fn()),
        });
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("context", &self.0.context)
            .field("index", &self.0.index)
            .field("value", &*self.0.value.borrow())
            .finish()
    }
}
