use std::{
    any::Any,
    mem::take,
    rc::{Rc, Weak},
};

#[cfg(test)]
mod tests;

/// Handle that releases a registration when dropped.
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Subscription(RawSubscription::Fn(Box::new(f)))
    }
    pub fn from_rc(rc: Rc<dyn Any>) -> Self {
        Subscription(RawSubscription::Rc(rc))
    }
    pub fn from_weak_fn<T: 'static>(
        this: Weak<T>,
        unsubscribe: impl FnOnce(Rc<T>) + 'static,
    ) -> Self {
        Subscription::from_fn(move || {
            if let Some(this) = this.upgrade() {
                unsubscribe(this)
            }
        })
    }
    pub fn from_iter(items: impl IntoIterator<Item = Subscription>) -> Self {
        Subscription(RawSubscription::Many(items.into_iter().collect()))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.0, RawSubscription::Empty)
    }

    /// Releases the registration now. Calling it again does nothing.
    pub fn unsubscribe(&mut self) {
        match take(&mut self.0) {
            RawSubscription::Empty => {}
            RawSubscription::Fn(f) => f(),
            RawSubscription::Rc(_) => {}
            RawSubscription::Many(items) => {
                for mut s in items {
                    s.unsubscribe();
                }
            }
        }
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.0 {
            RawSubscription::Empty => "empty",
            RawSubscription::Fn(_) => "fn",
            RawSubscription::Rc(_) => "rc",
            RawSubscription::Many(_) => "many",
        };
        write!(f, "Subscription({kind})")
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Fn(Box<dyn FnOnce() + 'static>),
    Rc(#[allow(unused)] Rc<dyn Any>),
    Many(Vec<Subscription>),
}
