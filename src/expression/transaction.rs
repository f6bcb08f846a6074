use std::{
    cell::{Cell, RefCell},
    mem::take,
    rc::{Rc, Weak},
};

use tracing::debug;

use super::ExpressionData;

/// Batches re-evaluation of expressions.
///
/// While suspended, invalidated expressions are queued instead of updated. The last
/// [`resume`](Self::resume) updates each queued expression once.
#[derive(Clone, Default)]
pub struct TransactionManager(Rc<TransactionData>);

#[derive(Default)]
struct TransactionData {
    depth: Cell<usize>,
    queue: RefCell<Vec<Weak<ExpressionData>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&self) {
        self.0.depth.set(self.0.depth.get() + 1);
    }
    /// End one [`suspend`](Self::suspend). Does nothing if not suspended.
    pub fn resume(&self) {
        match self.0.depth.get() {
            0 => {}
            1 => {
                self.0.depth.set(0);
                self.flush();
            }
            depth => self.0.depth.set(depth - 1),
        }
    }
    pub fn is_suspended(&self) -> bool {
        self.0.depth.get() > 0
    }

    /// Suspend until the returned guard is dropped.
    pub fn transaction(&self) -> Transaction {
        self.suspend();
        Transaction(self.clone())
    }

    pub(super) fn enqueue(&self, expression: &Rc<ExpressionData>) {
        let mut queue = self.0.queue.borrow_mut();
        if !queue.iter().any(|q| q.as_ptr() == Rc::as_ptr(expression)) {
            queue.push(Rc::downgrade(expression));
        }
    }

    fn flush(&self) {
        while !self.is_suspended() {
            let queue = take(&mut *self.0.queue.borrow_mut());
            if queue.is_empty() {
                return;
            }
            debug!(count = queue.len(), "transaction flush");
            for expression in queue {
                if let Some(expression) = expression.upgrade() {
                    expression.update();
                }
            }
        }
    }
}

/// Resumes its [`TransactionManager`] on drop.
#[must_use]
pub struct Transaction(TransactionManager);

impl Transaction {
    pub fn manager(&self) -> &TransactionManager {
        &self.0
    }
}
impl Drop for Transaction {
    fn drop(&mut self) {
        self.0.resume();
    }
}
