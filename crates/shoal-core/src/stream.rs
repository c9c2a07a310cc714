//! Push-based streams.
//!
//! A `Stream<T>` is a cold description of a source: nothing happens until
//! `subscribe` is called, and every subscription runs the source again.
//! Hot sources (`Subject`, `Replay`) expose stream views through their
//! `stream()` methods. Operators are plain combinators over the same
//! observer protocol: `next` any number of times, then at most one
//! `complete`.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::subscription::Subscription;

struct ObserverInner<T> {
    next: Box<dyn Fn(T)>,
    complete: Box<dyn Fn()>,
    closed: Cell<bool>,
}

/// Receiving end handed to a stream source.
pub struct Observer<T: 'static> {
    inner: Rc<ObserverInner<T>>,
}

impl<T: 'static> Observer<T> {
    pub fn new(next: impl Fn(T) + 'static, complete: impl Fn() + 'static) -> Self {
        Self {
            inner: Rc::new(ObserverInner {
                next: Box::new(next),
                complete: Box::new(complete),
                closed: Cell::new(false),
            }),
        }
    }

    pub fn next(&self, value: T) {
        if !self.inner.closed.get() {
            (self.inner.next)(value);
        }
    }

    /// Signals completion once; later calls and values are ignored.
    pub fn complete(&self) {
        if !self.inner.closed.replace(true) {
            (self.inner.complete)();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    fn close(&self) {
        self.inner.closed.set(true);
    }
}

impl<T: 'static> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Observer feeding `downstream`, forwarding completion as-is.
fn relay<T: 'static, U: 'static>(
    downstream: Observer<U>,
    on_next: impl Fn(&Observer<U>, T) + 'static,
) -> Observer<T> {
    let completer = downstream.clone();
    Observer::new(move |value| on_next(&downstream, value), move || completer.complete())
}

type Source<T> = Rc<dyn Fn(Observer<T>) -> Subscription>;

pub struct Stream<T: 'static> {
    source: Source<T>,
}

impl<T: 'static> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T: 'static> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Stream")
    }
}

impl<T: 'static> Stream<T> {
    pub fn new(source: impl Fn(Observer<T>) -> Subscription + 'static) -> Self {
        Self {
            source: Rc::new(source),
        }
    }

    /// Completes immediately without emitting.
    pub fn empty() -> Self {
        Stream::new(|observer: Observer<T>| {
            observer.complete();
            Subscription::empty()
        })
    }

    /// Never emits and never completes.
    pub fn never() -> Self {
        Stream::new(|_| Subscription::empty())
    }

    pub fn subscribe_observer(&self, observer: Observer<T>) -> Subscription {
        let closer = observer.clone();
        let upstream = (self.source)(observer);
        Subscription::new(move || {
            closer.close();
            upstream.unsubscribe();
        })
    }

    pub fn subscribe(&self, next: impl Fn(T) + 'static) -> Subscription {
        self.subscribe_observer(Observer::new(next, || {}))
    }

    pub fn subscribe_with(
        &self,
        next: impl Fn(T) + 'static,
        complete: impl Fn() + 'static,
    ) -> Subscription {
        self.subscribe_observer(Observer::new(next, complete))
    }

    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> Stream<U> {
        let upstream = self.clone();
        let f = Rc::new(f);
        Stream::new(move |downstream: Observer<U>| {
            let f = f.clone();
            upstream.subscribe_observer(relay(downstream, move |out, value| out.next(f(value))))
        })
    }

    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        let upstream = self.clone();
        let predicate = Rc::new(predicate);
        Stream::new(move |downstream: Observer<T>| {
            let predicate = predicate.clone();
            upstream.subscribe_observer(relay(downstream, move |out, value| {
                if predicate(&value) {
                    out.next(value);
                }
            }))
        })
    }

    pub fn filter_map<U: 'static>(&self, f: impl Fn(T) -> Option<U> + 'static) -> Stream<U> {
        let upstream = self.clone();
        let f = Rc::new(f);
        Stream::new(move |downstream: Observer<U>| {
            let f = f.clone();
            upstream.subscribe_observer(relay(downstream, move |out, value| {
                if let Some(mapped) = f(value) {
                    out.next(mapped);
                }
            }))
        })
    }

    /// Runs `f` on every value before passing it on unchanged.
    pub fn tap(&self, f: impl Fn(&T) + 'static) -> Stream<T> {
        let upstream = self.clone();
        let f = Rc::new(f);
        Stream::new(move |downstream: Observer<T>| {
            let f = f.clone();
            upstream.subscribe_observer(relay(downstream, move |out, value| {
                f(&value);
                out.next(value);
            }))
        })
    }

    /// Passes the first `count` values, then completes and releases the source.
    pub fn take(&self, count: usize) -> Stream<T> {
        let upstream = self.clone();
        Stream::new(move |downstream: Observer<T>| {
            if count == 0 {
                downstream.complete();
                return Subscription::empty();
            }
            let seen = Rc::new(Cell::new(0usize));
            let done = Rc::new(Cell::new(false));
            let held: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

            let observer = {
                let done = done.clone();
                let held = held.clone();
                relay(downstream, move |out, value| {
                    let n = seen.get() + 1;
                    seen.set(n);
                    out.next(value);
                    if n == count {
                        done.set(true);
                        out.complete();
                        let upstream_sub = held.borrow_mut().take();
                        drop(upstream_sub);
                    }
                })
            };
            let sub = upstream.subscribe_observer(observer);
            if done.get() {
                // finished synchronously while subscribing
                drop(sub);
                Subscription::empty()
            } else {
                *held.borrow_mut() = Some(sub);
                Subscription::new(move || {
                    held.borrow_mut().take();
                })
            }
        })
    }

    /// Drops values for which `same(previous, current)` holds.
    pub fn distinct_until_changed_by(&self, same: impl Fn(&T, &T) -> bool + 'static) -> Stream<T>
    where
        T: Clone,
    {
        let upstream = self.clone();
        let same = Rc::new(same);
        Stream::new(move |downstream: Observer<T>| {
            let same = same.clone();
            let last: RefCell<Option<T>> = RefCell::new(None);
            upstream.subscribe_observer(relay(downstream, move |out, value: T| {
                let changed = match last.borrow().as_ref() {
                    Some(previous) => !same(previous, &value),
                    None => true,
                };
                if changed {
                    *last.borrow_mut() = Some(value.clone());
                    out.next(value);
                }
            }))
        })
    }

    pub fn distinct_until_changed(&self) -> Stream<T>
    where
        T: Clone + PartialEq,
    {
        self.distinct_until_changed_by(|a, b| a == b)
    }

    /// Emits `f(a, b)` with the latest value of each side once both have
    /// emitted. Completes when both sides completed.
    pub fn combine_with<U, R>(&self, other: &Stream<U>, f: impl Fn(&T, &U) -> R + 'static) -> Stream<R>
    where
        T: Clone,
        U: Clone + 'static,
        R: 'static,
    {
        let left: Stream<Either<T, U>> = self.map(Either::Left);
        let right: Stream<Either<T, U>> = other.map(Either::Right);
        let f = Rc::new(f);
        Stream::new(move |downstream: Observer<R>| {
            let f = f.clone();
            let latest: Rc<RefCell<(Option<T>, Option<U>)>> = Rc::new(RefCell::new((None, None)));
            let merged = Stream::merge(vec![left.clone(), right.clone()]);
            merged.subscribe_observer(relay(downstream, move |out, side| {
                let pair = {
                    let mut latest = latest.borrow_mut();
                    match side {
                        Either::Left(value) => latest.0 = Some(value),
                        Either::Right(value) => latest.1 = Some(value),
                    }
                    match &*latest {
                        (Some(a), Some(b)) => Some((a.clone(), b.clone())),
                        _ => None,
                    }
                };
                if let Some((a, b)) = pair {
                    out.next(f(&a, &b));
                }
            }))
        })
    }

    /// Interleaves every source; completes once all sources completed.
    pub fn merge(sources: Vec<Stream<T>>) -> Stream<T> {
        Stream::new(move |downstream: Observer<T>| {
            if sources.is_empty() {
                downstream.complete();
                return Subscription::empty();
            }
            let remaining = Rc::new(Cell::new(sources.len()));
            let parts = sources
                .iter()
                .map(|source| {
                    let out = downstream.clone();
                    let finisher = downstream.clone();
                    let remaining = remaining.clone();
                    source.subscribe_with(
                        move |value| out.next(value),
                        move || {
                            remaining.set(remaining.get() - 1);
                            if remaining.get() == 0 {
                                finisher.complete();
                            }
                        },
                    )
                })
                .collect();
            Subscription::join(parts)
        })
    }

    /// Emits the latest value of every source, positionally, once each source
    /// has emitted at least once. A source completing before its first value
    /// completes the result immediately.
    pub fn combine_latest(sources: Vec<Stream<T>>) -> Stream<Vec<T>>
    where
        T: Clone,
    {
        Stream::new(move |downstream: Observer<Vec<T>>| {
            if sources.is_empty() {
                downstream.complete();
                return Subscription::empty();
            }
            let slots: Rc<RefCell<Vec<Option<T>>>> =
                Rc::new(RefCell::new(vec![None; sources.len()]));
            let remaining = Rc::new(Cell::new(sources.len()));
            let parts = sources
                .iter()
                .enumerate()
                .map(|(index, source)| {
                    let out = downstream.clone();
                    let finisher = downstream.clone();
                    let slots = slots.clone();
                    let probe = slots.clone();
                    let remaining = remaining.clone();
                    source.subscribe_with(
                        move |value| {
                            let full = {
                                let mut slots = slots.borrow_mut();
                                slots[index] = Some(value);
                                slots.iter().cloned().collect::<Option<Vec<T>>>()
                            };
                            if let Some(values) = full {
                                out.next(values);
                            }
                        },
                        move || {
                            remaining.set(remaining.get() - 1);
                            let never_emitted = probe.borrow()[index].is_none();
                            if never_emitted || remaining.get() == 0 {
                                finisher.complete();
                            }
                        },
                    )
                })
                .collect();
            Subscription::join(parts)
        })
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// Emits `value` once, then completes.
    pub fn of(value: T) -> Stream<T> {
        Stream::new(move |observer: Observer<T>| {
            observer.next(value.clone());
            observer.complete();
            Subscription::empty()
        })
    }

    pub fn from_values(values: impl IntoIterator<Item = T>) -> Stream<T> {
        let values: Vec<T> = values.into_iter().collect();
        Stream::new(move |observer: Observer<T>| {
            for value in &values {
                if observer.is_closed() {
                    break;
                }
                observer.next(value.clone());
            }
            observer.complete();
            Subscription::empty()
        })
    }
}

enum Either<A, B> {
    Left(A),
    Right(B),
}

/// Combines a keyed set of streams into a stream of keyed records, emitting
/// once every entry has a value.
pub fn combine<T: Clone + 'static>(streams: BTreeMap<String, Stream<T>>) -> Stream<BTreeMap<String, T>> {
    let (keys, sources): (Vec<String>, Vec<Stream<T>>) = streams.into_iter().unzip();
    if keys.is_empty() {
        return Stream::of(BTreeMap::new());
    }
    Stream::combine_latest(sources).map(move |values| keys.iter().cloned().zip(values).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Replay, Subject};

    fn collect<T: Clone + 'static>(stream: &Stream<T>) -> (Rc<RefCell<Vec<T>>>, Rc<Cell<bool>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let completed = Rc::new(Cell::new(false));
        let sub = {
            let seen = seen.clone();
            let completed = completed.clone();
            stream.subscribe_with(move |v| seen.borrow_mut().push(v), move || completed.set(true))
        };
        (seen, completed, sub)
    }

    #[test]
    fn map_filter_chain() {
        let subject = Subject::new();
        let stream = subject.stream().map(|v: i32| v * 10).filter(|v| *v > 10);
        let (seen, _, _sub) = collect(&stream);

        for v in 1..=3 {
            subject.next(v);
        }
        assert_eq!(*seen.borrow(), vec![20, 30]);
    }

    #[test]
    fn take_completes_and_releases_source() {
        let subject = Subject::new();
        let (seen, completed, _sub) = collect(&subject.stream().take(1));

        subject.next(1);
        subject.next(2);

        assert_eq!(*seen.borrow(), vec![1]);
        assert!(completed.get());
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn take_on_synchronous_source() {
        let (seen, completed, _sub) = collect(&Stream::from_values(vec![1, 2, 3]).take(2));
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert!(completed.get());
    }

    #[test]
    fn merge_completes_after_all_sources() {
        let a = Subject::new();
        let (seen, completed, _sub) = collect(&Stream::merge(vec![a.stream(), Stream::of(9)]));
        a.next(1);
        assert_eq!(*seen.borrow(), vec![9, 1]);
        assert!(!completed.get());

        let (_, empty_done, _sub2) = collect(&Stream::<i32>::merge(vec![]));
        assert!(empty_done.get());
    }

    #[test]
    fn combine_latest_waits_for_every_slot() {
        let a = Subject::new();
        let b = Subject::new();
        let (seen, _, _sub) = collect(&Stream::combine_latest(vec![a.stream(), b.stream()]));

        a.next(1);
        assert!(seen.borrow().is_empty());
        b.next(2);
        a.next(3);
        assert_eq!(*seen.borrow(), vec![vec![1, 2], vec![3, 2]]);
    }

    #[test]
    fn combine_latest_completes_when_a_slot_ends_empty() {
        let a = Subject::new();
        let (seen, completed, _sub) =
            collect(&Stream::combine_latest(vec![a.stream(), Stream::<i32>::empty()]));
        a.next(1);
        assert!(seen.borrow().is_empty());
        assert!(completed.get());
    }

    #[test]
    fn combine_with_pairs_latest_values() {
        let name = Replay::new("ada".to_string());
        let age = Replay::new(36u32);
        let stream = name.stream().combine_with(&age.stream(), |n, a| format!("{n}:{a}"));
        let (seen, _, _sub) = collect(&stream);

        age.set(37);
        assert_eq!(*seen.borrow(), vec!["ada:36".to_string(), "ada:37".to_string()]);
    }

    #[test]
    fn distinct_skips_repeats() {
        let subject = Subject::new();
        let (seen, _, _sub) = collect(&subject.stream().distinct_until_changed());
        for v in [1, 1, 2, 2, 1] {
            subject.next(v);
        }
        assert_eq!(*seen.borrow(), vec![1, 2, 1]);
    }

    #[test]
    fn combine_keyed_record() {
        let mut streams = BTreeMap::new();
        streams.insert("a".to_string(), Stream::of(1));
        streams.insert("b".to_string(), Stream::of(2));
        let (seen, _, _sub) = collect(&combine(streams));

        let record = seen.borrow()[0].clone();
        assert_eq!(record["a"], 1);
        assert_eq!(record["b"], 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let subject = Subject::new();
        let (seen, _, sub) = collect(&subject.stream());
        subject.next(1);
        sub.unsubscribe();
        subject.next(2);
        assert_eq!(*seen.borrow(), vec![1]);
    }
}
