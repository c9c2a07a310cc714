//! The backing aggregator: one keyed record holding every fragment's state,
//! reduced synchronously and observable as a stream of snapshots.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::action::Action;
use crate::channel::Subject;
use crate::state::{ErasedReducer, FragmentId, FragmentKey, SharedState, StateValue, same_state};

/// Snapshot of the aggregator, keyed by fragment key in declaration order.
#[derive(Clone, Default)]
pub struct InternalState {
    entries: Rc<Vec<(FragmentKey, SharedState)>>,
}

impl InternalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SharedState> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v)
    }

    pub fn get_as<S: 'static>(&self, key: &str) -> Option<&S> {
        self.get(key)?.as_any().downcast_ref::<S>()
    }

    /// Inserts or replaces an entry, e.g. to build a preloaded state.
    pub fn insert<S: StateValue>(&mut self, key: impl Into<FragmentKey>, value: S) {
        self.set(key.into(), Rc::new(value));
    }

    pub(crate) fn set(&mut self, key: FragmentKey, value: SharedState) {
        let entries = Rc::make_mut(&mut self.entries);
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &FragmentKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FragmentKey, &SharedState)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for InternalState {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.entries, &other.entries)
            || (self.len() == other.len()
                && self
                    .iter()
                    .zip(other.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && same_state(va, vb)))
    }
}

impl fmt::Debug for InternalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

pub(crate) struct Slot {
    pub(crate) id: FragmentId,
    pub(crate) key: FragmentKey,
    pub(crate) reducer: ErasedReducer,
}

/// Result of applying one action.
pub(crate) struct Reduction {
    pub(crate) state: InternalState,
    pub(crate) changed: SmallVec<[FragmentKey; 2]>,
}

pub(crate) struct Aggregator {
    slots: Vec<Slot>,
    state: RefCell<InternalState>,
    ticks: Subject<InternalState>,
}

impl Aggregator {
    pub(crate) fn new(slots: Vec<Slot>, initial: InternalState) -> Self {
        Self {
            slots,
            state: RefCell::new(initial),
            ticks: Subject::new(),
        }
    }

    pub(crate) fn snapshot(&self) -> InternalState {
        self.state.borrow().clone()
    }

    /// Applies `action` to every slot with a matching id. Handlers run with no
    /// borrow of the aggregator held.
    pub(crate) fn apply(&self, action: &Action) -> Reduction {
        let current = self.snapshot();
        let mut next = current.clone();
        let mut changed = SmallVec::new();

        if !action.is_effect() {
            for slot in self.slots.iter().filter(|slot| slot.id == action.id()) {
                let Some(prev) = current.get(slot.key.as_str()) else {
                    continue;
                };
                if let Some(value) = (slot.reducer)(prev, action) {
                    if !Rc::ptr_eq(prev, &value) {
                        changed.push(slot.key.clone());
                    }
                    next.set(slot.key.clone(), value);
                }
            }
        }

        if changed.is_empty() {
            log::trace!("aggregator: {action:?} matched no fragment state change");
            return Reduction {
                state: current,
                changed,
            };
        }
        *self.state.borrow_mut() = next.clone();
        Reduction {
            state: next,
            changed,
        }
    }

    /// Notifies snapshot observers; called once per dispatch routed here.
    pub(crate) fn tick(&self, state: InternalState) {
        self.ticks.next(state);
    }

    pub(crate) fn ticks(&self) -> &Subject<InternalState> {
        &self.ticks
    }
}
