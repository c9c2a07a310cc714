//! The dispatch pipeline.
//!
//! Actions addressed to an effect feed that effect's input channel. Every
//! other action goes input channel, aggregator reduction, aggregator tick,
//! output channel, in that order and never interleaved with another action.
//! A list of actions raises the lock for everything but its last item, so
//! observers gated on [`Engine::is_open`] only ever see post-list state.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use crate::action::{Action, ActionCreator, ActionCreators, ActionList, ActionType};
use crate::aggregator::{Aggregator, InternalState, Slot};
use crate::batch::BatchContext;
use crate::channel::Subject;
use crate::monitor::Monitor;
use crate::scope::FragmentRecord;
use crate::state::{FragmentId, FragmentKey, same_state};

bitflags! {
    /// Orthogonal store flags: readiness and batching.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct StoreStatus: u8 {
        /// Every preload producer has emitted (or there were none).
        const READY = 1 << 0;
        /// A dispatched list has not yet reached its last action.
        const BATCHING = 1 << 1;
    }
}

pub(crate) struct Engine {
    fragments: Vec<FragmentRecord>,
    effects: Vec<ActionCreator>,
    aggregator: Aggregator,
    lock_depth: Cell<usize>,
    ticks_sent: Cell<u64>,
    ready: Cell<bool>,
    synced: RefCell<InternalState>,
    monitor: Option<Rc<dyn Monitor>>,
}

impl Engine {
    pub(crate) fn new(
        fragments: Vec<FragmentRecord>,
        effects: Vec<ActionCreator>,
        initial: InternalState,
        monitor: Option<Rc<dyn Monitor>>,
    ) -> Self {
        let slots = fragments
            .iter()
            .map(|fragment| Slot {
                id: fragment.id,
                key: fragment.key.clone(),
                reducer: fragment.reducer.clone(),
            })
            .collect();
        Self {
            fragments,
            effects,
            aggregator: Aggregator::new(slots, initial.clone()),
            lock_depth: Cell::new(0),
            ticks_sent: Cell::new(0),
            ready: Cell::new(false),
            synced: RefCell::new(initial),
            monitor,
        }
    }

    pub(crate) fn dispatch(&self, actions: ActionList) {
        let count = actions.len();
        let start = self.ticks_sent.get();
        let mut released_at = start;
        let mut lock = Lock::raise(&self.lock_depth);
        for (index, action) in actions.into_iter().enumerate() {
            if index + 1 == count {
                lock.release();
                released_at = self.ticks_sent.get();
            }
            self.route(&action);
        }

        // the last action did not tick, so the locked ticks were never seen
        let ticked_while_locked = released_at > start;
        let ticked_after = self.ticks_sent.get() > released_at;
        if ticked_while_locked && !ticked_after && self.lock_depth.get() == 0 {
            self.tick(self.aggregator.snapshot());
        }
    }

    fn tick(&self, state: InternalState) {
        self.ticks_sent.set(self.ticks_sent.get() + 1);
        self.aggregator.tick(state);
    }

    fn route(&self, action: &Action) {
        match action.action_type() {
            ActionType::Effect => match self.effects.get(action.id()) {
                Some(effect) => effect.emit_input(action.payload().cloned()),
                None => log::trace!("dropping {action:?}: no effect #{}", action.id()),
            },
            ActionType::Handler(name) => {
                let creator = self
                    .fragments
                    .get(action.id())
                    .and_then(|fragment| fragment.creators.get(name))
                    .cloned();
                match &creator {
                    Some(creator) => creator.emit_input(action.payload().cloned()),
                    None => log::trace!("{action:?} matches no fragment handler"),
                }

                let reduction = self.aggregator.apply(action);
                if let Some(monitor) = &self.monitor {
                    monitor.action_applied(action, &reduction.changed, &reduction.state);
                }
                self.tick(reduction.state);

                if let Some(creator) = creator {
                    creator.emit_output(action.payload().cloned());
                }
            }
        }
    }

    /// Ready and not inside a dispatched list.
    pub(crate) fn is_open(&self) -> bool {
        self.ready.get() && self.lock_depth.get() == 0
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.get()
    }

    /// Returns `true` on the transition.
    pub(crate) fn mark_ready(&self) -> bool {
        if self.ready.replace(true) {
            return false;
        }
        log::debug!("store is ready");
        if let Some(monitor) = &self.monitor {
            monitor.ready();
        }
        true
    }

    pub(crate) fn status(&self) -> StoreStatus {
        let mut status = StoreStatus::empty();
        status.set(StoreStatus::READY, self.ready.get());
        status.set(StoreStatus::BATCHING, self.lock_depth.get() > 0);
        status
    }

    /// Republishes every fragment whose aggregator value differs from the
    /// last synchronized one.
    pub(crate) fn sync(&self) {
        let current = self.aggregator.snapshot();
        let previous = self.synced.replace(current.clone());
        for fragment in &self.fragments {
            let Some(value) = current.get(fragment.key.as_str()) else {
                continue;
            };
            let unchanged = previous
                .get(fragment.key.as_str())
                .is_some_and(|prev| same_state(prev, value));
            if !unchanged {
                (fragment.publish)(value);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> InternalState {
        self.aggregator.snapshot()
    }

    pub(crate) fn ticks(&self) -> &Subject<InternalState> {
        self.aggregator.ticks()
    }

    pub(crate) fn fragment_keys(&self) -> Vec<FragmentKey> {
        self.fragments.iter().map(|f| f.key.clone()).collect()
    }

    pub(crate) fn fragment_creators(&self, id: FragmentId) -> Option<&ActionCreators> {
        self.fragments.get(id).map(|f| &f.creators)
    }

    pub(crate) fn monitor(&self) -> Option<&Rc<dyn Monitor>> {
        self.monitor.as_ref()
    }
}

struct Lock<'a> {
    depth: &'a Cell<usize>,
    held: bool,
}

impl<'a> Lock<'a> {
    fn raise(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth, held: true }
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.held, false) {
            self.depth.set(self.depth.get() - 1);
        }
    }
}

impl Drop for Lock<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Dispatch handle of one store. Holds the engine weakly, so dispatching to a
/// dropped store is a no-op.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Weak<Engine>,
    batch: BatchContext,
}

impl Dispatcher {
    pub(crate) fn new(engine: &Rc<Engine>, batch: BatchContext) -> Self {
        Self {
            engine: Rc::downgrade(engine),
            batch,
        }
    }

    /// Dispatches `actions`, or queues them while the store's batch context
    /// is running.
    pub fn dispatch(&self, actions: impl Into<ActionList>) {
        let actions = actions.into();
        if self.batch.is_batching() {
            self.batch.enqueue(self, actions);
        } else {
            self.dispatch_now(actions);
        }
    }

    pub(crate) fn dispatch_now(&self, actions: ActionList) {
        match self.engine.upgrade() {
            Some(engine) => engine.dispatch(actions),
            None => log::debug!("store dropped; {} action(s) discarded", actions.len()),
        }
    }

    pub fn batch_context(&self) -> &BatchContext {
        &self.batch
    }

    pub(crate) fn same_store(&self, other: &Dispatcher) -> bool {
        Weak::ptr_eq(&self.engine, &other.engine)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("alive", &(self.engine.strong_count() > 0))
            .field("batch", &self.batch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use crate::state::FragmentDecl;

    fn counter_engine() -> (Rc<Engine>, ActionCreators) {
        let scope = Scope::new(None);
        let counter = scope
            .declare_state(FragmentDecl::new(0i32).named("counter").on("increment", |n| n + 1))
            .unwrap();
        let registry = scope.seal();
        let mut initial = InternalState::new();
        for fragment in &registry.fragments {
            initial.set(fragment.key.clone(), fragment.initial.clone());
        }
        let engine = Engine::new(registry.fragments, Vec::new(), initial, None);
        (Rc::new(engine), counter.actions)
    }

    #[test]
    fn list_holds_lock_until_last_action() {
        let (engine, actions) = counter_engine();
        engine.mark_ready();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            let probe = Rc::downgrade(&engine);
            engine.ticks().subscribe(move |_| {
                let open = probe.upgrade().is_some_and(|engine| engine.is_open());
                seen.borrow_mut().push(open);
            })
        };

        let increment = actions["increment"].action();
        engine.dispatch(ActionList::from(vec![increment.clone(), increment.clone(), increment]));

        assert_eq!(*seen.borrow(), vec![false, false, true]);
        assert_eq!(engine.snapshot().get_as::<i32>("counter:0"), Some(&3));
        assert!(!engine.status().contains(StoreStatus::BATCHING));
    }

    #[test]
    fn list_ending_without_a_tick_still_ticks_once_open() {
        let (engine, actions) = counter_engine();
        engine.mark_ready();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            let probe = Rc::downgrade(&engine);
            engine.ticks().subscribe(move |state: &InternalState| {
                let open = probe.upgrade().is_some_and(|engine| engine.is_open());
                seen.borrow_mut().push((open, state.get_as::<i32>("counter:0").copied()));
            })
        };

        let increment = actions["increment"].action();
        let stray = Action::new(9, ActionType::Effect, None);
        engine.dispatch(ActionList::from(vec![increment.clone(), increment, stray.clone()]));
        assert_eq!(
            *seen.borrow(),
            vec![(false, Some(1)), (false, Some(2)), (true, Some(2))]
        );

        seen.borrow_mut().clear();
        engine.dispatch(ActionList::from(vec![stray.clone(), stray]));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn input_and_output_channels_bracket_the_reduction() {
        let (engine, actions) = counter_engine();
        let increment = actions["increment"].clone();
        let order = Rc::new(RefCell::new(Vec::new()));

        let _input = {
            let order = order.clone();
            increment.input().subscribe(move |_| order.borrow_mut().push("input"))
        };
        let _tick = {
            let order = order.clone();
            engine.ticks().subscribe(move |_| order.borrow_mut().push("tick"))
        };
        let _output = {
            let order = order.clone();
            increment.output().subscribe(move |_| order.borrow_mut().push("output"))
        };

        engine.dispatch(increment.action().into());
        assert_eq!(*order.borrow(), vec!["input", "tick", "output"]);
    }

    #[test]
    fn unmatched_action_still_ticks() {
        let (engine, _) = counter_engine();
        let ticks = Rc::new(Cell::new(0));
        let _sub = {
            let ticks = ticks.clone();
            engine.ticks().subscribe(move |_| ticks.set(ticks.get() + 1))
        };
        let before = engine.snapshot();

        engine.dispatch(Action::new(7, ActionType::Handler("nope".into()), None).into());
        engine.dispatch(Action::new(0, ActionType::Effect, None).into());

        assert_eq!(ticks.get(), 1);
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn readiness_transitions_once() {
        let (engine, _) = counter_engine();
        assert!(!engine.is_open());
        assert!(engine.mark_ready());
        assert!(!engine.mark_ready());
        assert_eq!(engine.status(), StoreStatus::READY);
    }

    #[test]
    fn dispatcher_outliving_engine_is_inert() {
        let (engine, actions) = counter_engine();
        let dispatcher = Dispatcher::new(&engine, BatchContext::new());
        drop(engine);
        dispatcher.dispatch(actions["increment"].action());
    }
}
