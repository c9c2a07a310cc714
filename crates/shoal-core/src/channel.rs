//! Observer-list broadcast channels.
//!
//! - `Subject<T>` pushes every value to the observers registered at the time
//!   of the push; nothing is buffered.
//! - `Replay<T>` holds the latest value and hands it to every new observer
//!   before any later push.
//!
//! Both are cheap `Rc` handles. Notification never holds a borrow across an
//! observer call, so observers may subscribe, unsubscribe or push re-entrantly.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use slotmap::{SlotMap, new_key_type};

use crate::stream::Stream;
use crate::subscription::Subscription;

new_key_type! {
    /// Key of one observer inside a channel's observer list.
    pub struct ObserverKey;
}

type Callback<T> = Rc<dyn Fn(&T)>;

struct Observers<T> {
    list: SlotMap<ObserverKey, Callback<T>>,
}

impl<T: 'static> Observers<T> {
    fn new() -> Self {
        Self {
            list: SlotMap::with_key(),
        }
    }
}

fn add_observer<T: 'static>(
    observers: &Rc<RefCell<Observers<T>>>,
    callback: Callback<T>,
) -> Subscription {
    let key = observers.borrow_mut().list.insert(callback);
    let weak: Weak<RefCell<Observers<T>>> = Rc::downgrade(observers);
    Subscription::new(move || {
        if let Some(observers) = weak.upgrade() {
            observers.borrow_mut().list.remove(key);
        }
    })
}

fn notify<T: 'static>(observers: &Rc<RefCell<Observers<T>>>, value: &T) {
    let snapshot: Vec<(ObserverKey, Callback<T>)> = observers
        .borrow()
        .list
        .iter()
        .map(|(key, cb)| (key, cb.clone()))
        .collect();
    for (key, cb) in snapshot {
        // skip observers removed by an earlier callback in this round
        if observers.borrow().list.contains_key(key) {
            cb(value);
        }
    }
}

/// Multi-observer broadcast channel without buffering.
pub struct Subject<T: 'static> {
    observers: Rc<RefCell<Observers<T>>>,
}

impl<T: 'static> Subject<T> {
    pub fn new() -> Self {
        Self {
            observers: Rc::new(RefCell::new(Observers::new())),
        }
    }

    pub fn next(&self, value: T) {
        notify(&self.observers, &value);
    }

    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Subscription {
        add_observer(&self.observers, Rc::new(f))
    }

    pub fn observer_count(&self) -> usize {
        self.observers.borrow().list.len()
    }

    /// Hot stream view of this subject.
    pub fn stream(&self) -> Stream<T>
    where
        T: Clone,
    {
        let subject = self.clone();
        Stream::new(move |observer| {
            subject.subscribe(move |value: &T| observer.next(value.clone()))
        })
    }
}

impl<T: 'static> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            observers: self.observers.clone(),
        }
    }
}

impl<T: 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Broadcast channel that always holds its most recent value.
pub struct Replay<T: Clone + 'static> {
    value: Rc<RefCell<T>>,
    observers: Rc<RefCell<Observers<T>>>,
}

impl<T: Clone + 'static> Replay<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Rc::new(RefCell::new(value)),
            observers: Rc::new(RefCell::new(Observers::new())),
        }
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    pub fn set(&self, value: T) {
        *self.value.borrow_mut() = value.clone();
        notify(&self.observers, &value);
    }

    /// Calls `f` with the current value right away, then with every later one.
    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Subscription {
        let f: Callback<T> = Rc::new(f);
        let sub = add_observer(&self.observers, f.clone());
        let current = self.get();
        f(&current);
        sub
    }

    pub fn observer_count(&self) -> usize {
        self.observers.borrow().list.len()
    }

    /// Stream that replays the current value to each new subscriber.
    pub fn stream(&self) -> Stream<T> {
        let replay = self.clone();
        Stream::new(move |observer| {
            replay.subscribe(move |value: &T| observer.next(value.clone()))
        })
    }
}

impl<T: Clone + 'static> Clone for Replay<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            observers: self.observers.clone(),
        }
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Replay<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replay")
            .field("value", &*self.value.borrow())
            .field("observers", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn subject_reaches_every_observer() {
        let subject = Subject::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let a = {
            let seen = seen.clone();
            subject.subscribe(move |v: &i32| seen.borrow_mut().push(("a", *v)))
        };
        let _b = {
            let seen = seen.clone();
            subject.subscribe(move |v: &i32| seen.borrow_mut().push(("b", *v)))
        };

        subject.next(1);
        drop(a);
        subject.next(2);

        assert_eq!(*seen.borrow(), vec![("a", 1), ("b", 1), ("b", 2)]);
        assert_eq!(subject.observer_count(), 1);
    }

    #[test]
    fn subject_does_not_buffer() {
        let subject = Subject::new();
        subject.next(7);

        let calls = Rc::new(Cell::new(0));
        let _sub = {
            let calls = calls.clone();
            subject.subscribe(move |_: &i32| calls.set(calls.get() + 1))
        };
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn replay_hands_latest_to_late_observer() {
        let replay = Replay::new(1);
        replay.set(5);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            replay.subscribe(move |v: &i32| seen.borrow_mut().push(*v))
        };
        replay.set(6);

        assert_eq!(*seen.borrow(), vec![5, 6]);
        assert_eq!(replay.get(), 6);
    }

    #[test]
    fn observer_may_unsubscribe_another_mid_round() {
        let subject: Subject<()> = Subject::new();
        let victim_calls = Rc::new(Cell::new(0));
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let _killer = {
            let victim = victim.clone();
            subject.subscribe(move |_| {
                victim.borrow_mut().take();
            })
        };
        *victim.borrow_mut() = Some({
            let victim_calls = victim_calls.clone();
            subject.subscribe(move |_| victim_calls.set(victim_calls.get() + 1))
        });

        subject.next(());
        assert_eq!(victim_calls.get(), 0);
    }
}
