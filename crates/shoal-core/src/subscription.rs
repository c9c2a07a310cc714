use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Handle to a live subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription(Rc<RefCell<Option<Box<dyn FnOnce()>>>>);

impl Subscription {
    pub fn new(teardown: impl FnOnce() + 'static) -> Self {
        Self(Rc::new(RefCell::new(Some(Box::new(teardown)))))
    }

    /// A subscription with nothing to tear down.
    pub fn empty() -> Self {
        Self(Rc::new(RefCell::new(None)))
    }

    /// Tears down every subscription in `parts` when this one is released.
    pub fn join(parts: Vec<Subscription>) -> Self {
        Self::new(move || {
            for part in parts {
                part.unsubscribe();
            }
        })
    }

    /// Runs at most once (safe to call multiple times).
    pub fn unsubscribe(&self) {
        let teardown = self.0.borrow_mut().take();
        if let Some(f) = teardown {
            f()
        }
    }

    pub fn is_closed(&self) -> bool {
        self.0.borrow().is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn teardown_runs_once() {
        let runs = Rc::new(Cell::new(0));
        let sub = {
            let runs = runs.clone();
            Subscription::new(move || runs.set(runs.get() + 1))
        };
        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn join_releases_all_parts() {
        let runs = Rc::new(Cell::new(0));
        let parts = (0..3)
            .map(|_| {
                let runs = runs.clone();
                Subscription::new(move || runs.set(runs.get() + 1))
            })
            .collect();
        drop(Subscription::join(parts));
        assert_eq!(runs.get(), 3);
    }
}
