use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::action::ActionList;
use crate::runtime::Dispatcher;

#[derive(Default)]
struct BatchInner {
    depth: Cell<usize>,
    pending: RefCell<Vec<(Dispatcher, ActionList)>>,
}

/// Groups bound-action calls into one dispatch per store.
///
/// While [`run`](BatchContext::run) is on the stack, bound actions of every
/// store using this context queue their actions instead of dispatching them.
/// When the outermost `run` returns, each store receives its queue as a single
/// list, in the order the stores were first touched.
#[derive(Clone, Default)]
pub struct BatchContext {
    inner: Rc<BatchInner>,
}

impl BatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.depth.set(self.inner.depth.get() + 1);
        let _scope = BatchScope { batch: self };
        f()
    }

    pub fn is_batching(&self) -> bool {
        self.inner.depth.get() > 0
    }

    /// Number of stores with queued actions.
    pub fn pending_origins(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    pub(crate) fn enqueue(&self, origin: &Dispatcher, actions: ActionList) {
        let mut pending = self.inner.pending.borrow_mut();
        match pending.iter_mut().find(|(dispatcher, _)| dispatcher.same_store(origin)) {
            Some((_, queued)) => queued.extend(actions),
            None => pending.push((origin.clone(), actions)),
        }
    }

    fn flush(&self) {
        let pending = std::mem::take(&mut *self.inner.pending.borrow_mut());
        for (dispatcher, actions) in pending {
            dispatcher.dispatch_now(actions);
        }
    }
}

impl fmt::Debug for BatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchContext")
            .field("depth", &self.inner.depth.get())
            .field("pending", &self.pending_origins())
            .finish()
    }
}

struct BatchScope<'a> {
    batch: &'a BatchContext,
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        let depth = self.batch.inner.depth.get() - 1;
        self.batch.inner.depth.set(depth);
        if depth > 0 {
            return;
        }
        if std::thread::panicking() {
            self.batch.inner.pending.borrow_mut().clear();
        } else {
            self.batch.flush();
        }
    }
}
