use std::{
    cell::Cell,
    fmt::Display,
    future::Future,
    rc::{Rc, Weak},
    task::Poll,
};

use futures::{Stream, StreamExt};
use tracing::trace;

use crate::{
    event::Multicast,
    runtime::{get_resolved, remove_resolved, report_error, set_resolved, spawn_local, Task},
    Error, ErrorReport, HookFilter, Index, Subscription, Value,
};

use super::{Hooks, Mutation, MutationSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Resolved,
    Rejected,
}

/// A value that settles once, out of band.
///
/// Settlement is delivered by [`Runtime::update`](crate::Runtime::update): the settled value
/// is recorded in the resolved-value cache first, then watchers are notified at
/// [`Index::Resolved`].
#[derive(Clone)]
pub struct Promise(Rc<PromiseData>);

struct PromiseData {
    state: Cell<PromiseState>,
    is_settling: Cell<bool>,
    hooks: Hooks,
    settled: Multicast<Value>,
}

impl Promise {
    fn from_state(state: PromiseState) -> Self {
        Self(Rc::new(PromiseData {
            state: Cell::new(state),
            is_settling: Cell::new(state != PromiseState::Pending),
            hooks: Hooks::new(),
            settled: Multicast::new(),
        }))
    }
    pub fn pending() -> Self {
        Self::from_state(PromiseState::Pending)
    }
    pub fn resolved(value: Value) -> Self {
        let this = Self::from_state(PromiseState::Resolved);
        set_resolved(this.addr(), value);
        this
    }

    /// Settle with the result of `fut`, polled by the runtime.
    pub fn from_future(fut: impl Future<Output = Value> + 'static) -> Self {
        let this = Self::pending();
        let data = Rc::downgrade(&this.0);
        spawn_local(async move {
            let value = fut.await;
            if let Some(data) = data.upgrade() {
                Promise(data).resolve(value);
            }
        });
        this
    }
    pub fn try_from_future<E: Display>(
        fut: impl Future<Output = std::result::Result<Value, E>> + 'static,
    ) -> Self {
        let this = Self::pending();
        let data = Rc::downgrade(&this.0);
        spawn_local(async move {
            let result = fut.await;
            if let Some(data) = data.upgrade() {
                match result {
                    Ok(value) => Promise(data).resolve(value),
                    Err(e) => Promise(data).reject(e.to_string()),
                };
            }
        });
        this
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
    pub fn state(&self) -> PromiseState {
        self.0.state.get()
    }

    /// The settled value, or `Pending` until delivery.
    pub fn value(&self) -> Poll<Value> {
        match self.state() {
            PromiseState::Resolved => get_resolved(self.addr()).map_or(Poll::Pending, Poll::Ready),
            _ => Poll::Pending,
        }
    }

    /// Returns `false` if the promise was already settled.
    pub fn resolve(&self, value: Value) -> bool {
        if self.0.is_settling.replace(true) {
            return false;
        }
        Task::from_weak_fn(Rc::downgrade(&self.0), move |data| {
            Promise(data).deliver(value)
        })
        .schedule();
        true
    }

    /// Reject with `reason`. The rejection is reported to the error sink and watchers keep
    /// seeing a pending value.
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        if self.0.is_settling.replace(true) {
            return false;
        }
        let reason = reason.into();
        Task::from_weak_fn(Rc::downgrade(&self.0), move |data| {
            data.state.set(PromiseState::Rejected);
            report_error(
                ErrorReport::new(Error::Rejected(reason)).with_data(Value::Future(Promise(data))),
            );
        })
        .schedule();
        true
    }

    /// Called once with the settled value.
    pub fn subscribe(&self, f: impl FnMut(&Value) + 'static) -> Subscription {
        self.0.settled.subscribe(f)
    }

    fn deliver(&self, value: Value) {
        trace!(promise = self.addr(), "resolved");
        self.0.state.set(PromiseState::Resolved);
        set_resolved(self.addr(), value.clone());
        self.0.hooks.notify(
            Mutation::new(Value::Future(self.clone()), Index::Resolved).with_value(value.clone()),
        );
        self.0.settled.emit(&value);
        self.0.settled.close();
    }

    pub(crate) fn hook(&self, filter: HookFilter, sink: Weak<dyn MutationSink>) -> Subscription {
        self.0.hooks.insert(filter, sink)
    }
}

impl Drop for PromiseData {
    fn drop(&mut self) {
        remove_resolved(self as *const Self as *const () as usize);
    }
}

/// A source producing any number of values out of band.
///
/// The latest delivered value is readable through [`latest`](Self::latest).
#[derive(Clone)]
pub struct AsyncStream(Rc<StreamData>);

struct StreamData {
    is_closed: Cell<bool>,
    hooks: Hooks,
    items: Multicast<Value>,
}

impl Default for AsyncStream {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncStream {
    pub fn new() -> Self {
        Self(Rc::new(StreamData {
            is_closed: Cell::new(false),
            hooks: Hooks::new(),
            items: Multicast::new(),
        }))
    }

    /// Forward every item of `stream`, then close.
    pub fn from_stream(stream: impl Stream<Item = Value> + 'static) -> Self {
        let this = Self::new();
        let data = Rc::downgrade(&this.0);
        spawn_local(async move {
            let mut stream = Box::pin(stream);
            while let Some(value) = stream.next().await {
                let Some(data) = data.upgrade() else {
                    return;
                };
                AsyncStream(data).push(value);
            }
            if let Some(data) = data.upgrade() {
                AsyncStream(data).close();
            }
        });
        this
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
    pub fn is_closed(&self) -> bool {
        self.0.is_closed.get()
    }
    pub fn latest(&self) -> Poll<Value> {
        get_resolved(self.addr()).map_or(Poll::Pending, Poll::Ready)
    }

    /// Queue `value` for delivery. Ignored once closed.
    pub fn push(&self, value: Value) -> bool {
        if self.is_closed() {
            return false;
        }
        Task::from_weak_fn(Rc::downgrade(&self.0), move |data| {
            AsyncStream(data).deliver(value)
        })
        .schedule();
        true
    }
    pub fn close(&self) {
        self.0.is_closed.set(true);
    }

    pub fn subscribe(&self, f: impl FnMut(&Value) + 'static) -> Subscription {
        self.0.items.subscribe(f)
    }

    fn deliver(&self, value: Value) {
        trace!(stream = self.addr(), "item delivered");
        set_resolved(self.addr(), value.clone());
        self.0.hooks.notify(
            Mutation::new(Value::Stream(self.clone()), Index::Resolved).with_value(value.clone()),
        );
        self.0.items.emit(&value);
    }

    pub(crate) fn hook(&self, filter: HookFilter, sink: Weak<dyn MutationSink>) -> Subscription {
        self.0.hooks.insert(filter, sink)
    }
}

impl Drop for StreamData {
    fn drop(&mut self) {
        remove_resolved(self as *const Self as *const () as usize);
    }
}
