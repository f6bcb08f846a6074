use std::{
    cell::{Cell, RefCell},
    future::Future,
    mem::take,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
    time::Duration,
};

use derive_ex::derive_ex;
use futures::{channel::mpsc, Stream, StreamExt};
use slabmap::SlabMap;
use tracing::trace;

use crate::{
    runtime::report_error,
    utils::timer::{with_timeout_async, TimeoutError},
    ErrorReport, Result, Subscription,
};


/// Multicast stream of events.
///
/// Handlers are called synchronously in subscription order. An emission triggered from
/// inside one of this stream's own handlers is suppressed.
#[derive_ex(Clone, Default, bound())]
pub struct Multicast<T: 'static>(Rc<MulticastData<T>>);

#[derive_ex(Default, bound())]
struct MulticastData<T> {
    handlers: RefCell<SlabMap<Rc<Handler<T>>>>,
    is_emitting: Cell<bool>,
    is_closed: Cell<bool>,
}

struct Handler<T> {
    f: RefCell<Box<dyn FnMut(&T) -> Result<()>>>,
    is_active: Cell<bool>,
}

impl<T: 'static> Multicast<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, mut f: impl FnMut(&T) + 'static) -> Subscription {
        self.try_subscribe(move |value| {
            f(value);
            Ok(())
        })
    }

    /// Subscribe a fallible handler. Errors are routed to the error sink and do not stop
    /// delivery to other handlers.
    pub fn try_subscribe(&self, f: impl FnMut(&T) -> Result<()> + 'static) -> Subscription {
        if self.0.is_closed.get() {
            return Subscription::empty();
        }
        let handler = Rc::new(Handler {
            f: RefCell::new(Box::new(f)),
            is_active: Cell::new(true),
        });
        let key = self.0.handlers.borrow_mut().insert(handler.clone());
        let data = Rc::downgrade(&self.0);
        Subscription::from_fn(move || {
            handler.is_active.set(false);
            if let Some(data) = data.upgrade() {
                let removed = data.handlers.borrow_mut().remove(key);
                drop(removed);
            }
        })
    }

    pub fn emit(&self, value: &T) {
        if self.0.is_closed.get() {
            return;
        }
        if self.0.is_emitting.replace(true) {
            trace!("nested emission suppressed");
            return;
        }
        let _guard = EmittingGuard(&self.0.is_emitting);
        let handlers: Vec<_> = self.0.handlers.borrow().values().cloned().collect();
        for handler in handlers {
            if !handler.is_active.get() || self.0.is_closed.get() {
                continue;
            }
            let Ok(mut f) = handler.f.try_borrow_mut() else {
                continue;
            };
            if let Err(e) = f(value) {
                report_error(ErrorReport::new(e).with_context("change handler"));
            }
        }
    }

    pub fn handler_count(&self) -> usize {
        self.0.handlers.borrow().len()
    }
    pub fn is_closed(&self) -> bool {
        self.0.is_closed.get()
    }

    /// Stop delivering and drop every handler. Calling it again does nothing.
    pub fn close(&self) {
        if self.0.is_closed.replace(true) {
            return;
        }
        let handlers = take(&mut *self.0.handlers.borrow_mut());
        for handler in handlers.values() {
            handler.is_active.set(false);
        }
        drop(handlers);
    }

    /// Returns a stream receiving every event emitted from now on.
    pub fn to_stream(&self) -> EventStream<T>
    where
        T: Clone,
    {
        let (tx, rx) = mpsc::unbounded();
        let subscription = self.subscribe(move |value| {
            let _ = tx.unbounded_send(value.clone());
        });
        EventStream { rx, subscription }
    }

    /// Completes with the next `count` events, or fails once `timeout` elapses.
    ///
    /// The subscription is taken immediately, not on first poll.
    pub fn wait_for(
        &self,
        count: usize,
        timeout: Duration,
    ) -> impl Future<Output = std::result::Result<Vec<T>, TimeoutError>> + 'static
    where
        T: Clone,
    {
        let stream = self.to_stream();
        async move { with_timeout_async(stream.take(count).collect::<Vec<_>>(), timeout).await }
    }
}

struct EmittingGuard<'a>(&'a Cell<bool>);

impl Drop for EmittingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Events of a [`Multicast`] as a [`Stream`]. Unsubscribes when dropped.
pub struct EventStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
    subscription: Subscription,
}
impl<T> EventStream<T> {
    pub fn unsubscribe(&mut self) {
        self.subscription.unsubscribe();
        self.rx.close();
    }
}
impl<T> Stream for EventStream<T> {
    type Item = T;
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_next_unpin(cx)
    }
}
