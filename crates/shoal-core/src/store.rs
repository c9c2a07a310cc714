//! `create_store` and the published state stream.
//!
//! The published stream is an event bus with one consumer. Its inputs are
//! the aggregator's ticks, the merged output of every active effect and the
//! first emission of the preload producers. Effect and preload actions are fed
//! back through dispatch and reach the bus only as the ticks they cause. Each
//! tick passes the gate (ready and not inside a list), synchronizes the
//! fragment channels, then samples the initializer's state stream.
//!
//! The bus is connected while at least one subscriber is attached and replays
//! the latest published value to late subscribers. Reconnecting publishes the
//! state as it is at that moment.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::action::{Action, ActionList, ActionTree};
use crate::aggregator::InternalState;
use crate::batch::BatchContext;
use crate::bound::BoundActionTree;
use crate::channel::Subject;
use crate::effects::{combine_preload_actions, merge_effect_actions};
use crate::error::{Result, StoreError};
use crate::options::StoreOptions;
use crate::runtime::{Dispatcher, Engine, StoreStatus};
use crate::scope::{FragmentRecord, Scope};
use crate::state::{FragmentId, FragmentKey, SharedState};
use crate::stream::{Observer, Stream};
use crate::subscription::Subscription;

/// What an initializer hands back: the combined state stream to publish and
/// the tree of creators to bind.
pub struct Root<V: 'static> {
    pub state: Stream<V>,
    pub actions: ActionTree,
}

impl<V: 'static> Root<V> {
    pub fn new(state: Stream<V>, actions: impl Into<ActionTree>) -> Self {
        Self {
            state,
            actions: actions.into(),
        }
    }
}

/// Anything an initializer may return.
pub trait IntoRoot {
    type Value: 'static;

    fn into_root(self) -> Result<Root<Self::Value>>;
}

impl<V: 'static> IntoRoot for Root<V> {
    type Value = V;

    fn into_root(self) -> Result<Root<V>> {
        Ok(self)
    }
}

impl<V: 'static> IntoRoot for Option<Root<V>> {
    type Value = V;

    fn into_root(self) -> Result<Root<V>> {
        self.ok_or_else(|| {
            StoreError::Configuration(
                "initializer must return Root { state, actions }, but returned nothing".into(),
            )
        })
    }
}

impl<V: 'static> IntoRoot for Result<Root<V>> {
    type Value = V;

    fn into_root(self) -> Result<Root<V>> {
        self
    }
}

/// Runs `initializer` once and builds a store from its declarations.
///
/// Preload producers run before effect producers, both in declaration order.
/// Producer contract violations and configuration errors are returned here;
/// dispatch itself never fails.
pub fn create_store<F, R>(initializer: F, options: StoreOptions) -> Result<Store<R::Value>>
where
    F: FnOnce(&Scope) -> R,
    R: IntoRoot,
    R::Value: Clone,
{
    let StoreOptions {
        context,
        preloaded_state,
        devtools,
        batch,
    } = options;

    let scope = Scope::new(context);
    let root = initializer(&scope).into_root();
    let registry = scope.seal();
    let root = root?;

    let initial = hydrate(&registry.fragments, preloaded_state.as_ref());
    let preload = combine_preload_actions(registry.preloads)?;
    let effects = merge_effect_actions(&registry.effects)?;
    let effect_creators = registry.effects.iter().map(|e| e.creator.clone()).collect();
    log::debug!(
        "creating store: {} fragment(s), {} effect(s)",
        registry.fragments.len(),
        registry.effects.len()
    );

    let engine = Rc::new(Engine::new(
        registry.fragments,
        effect_creators,
        initial,
        devtools.into_monitor(),
    ));
    if let Some(monitor) = engine.monitor() {
        monitor.store_created(&engine.fragment_keys(), &engine.snapshot());
    }

    let dispatcher = Dispatcher::new(&engine, batch.unwrap_or_default());
    let actions = BoundActionTree::bind(&root.actions, &dispatcher);
    let output = Rc::new(Output {
        engine,
        root: root.state,
        effects,
        preload,
        sampled: RefCell::new(None),
        latest: RefCell::new(None),
        subscribers: Subject::new(),
        refs: Cell::new(0),
        published: Cell::new(0),
        connection: RefCell::new(None),
    });

    Ok(Store {
        output,
        actions,
        dispatcher,
    })
}

/// Initial aggregator record. Preloaded entries replace the declared state of
/// fragments with the same key and type, and are pushed to their channels.
fn hydrate(fragments: &[FragmentRecord], preloaded: Option<&InternalState>) -> InternalState {
    let mut initial = InternalState::new();
    for fragment in fragments {
        let value = match preloaded.and_then(|state| state.get(fragment.key.as_str())) {
            Some(saved) if saved.as_any().type_id() == fragment.initial.as_any().type_id() => {
                (fragment.publish)(saved);
                saved.clone()
            }
            Some(_) => {
                log::warn!(
                    "preloaded state for {} has another type than declared; using the declared state",
                    fragment.key
                );
                fragment.initial.clone()
            }
            None => fragment.initial.clone(),
        };
        initial.set(fragment.key.clone(), value);
    }
    if let Some(preloaded) = preloaded {
        for key in preloaded.keys() {
            if !fragments.iter().any(|f| &f.key == key) {
                log::debug!("preloaded state for unknown fragment {key} ignored");
            }
        }
    }
    initial
}

struct Output<V: Clone + 'static> {
    engine: Rc<Engine>,
    root: Stream<V>,
    effects: Stream<Action>,
    preload: Stream<ActionList>,
    /// Latest value of `root` for the current connection.
    sampled: RefCell<Option<V>>,
    latest: RefCell<Option<V>>,
    subscribers: Subject<V>,
    refs: Cell<usize>,
    published: Cell<u64>,
    connection: RefCell<Option<Subscription>>,
}

impl<V: Clone + 'static> Output<V> {
    fn attach(self: &Rc<Self>, observer: Observer<V>) -> Subscription {
        let connected = self.refs.get() > 0;
        // a fresh connection publishes the current state itself
        if connected {
            let replay = self.latest.borrow().clone();
            if let Some(value) = replay {
                observer.next(value);
            }
        }
        let sub = self
            .subscribers
            .subscribe(move |value: &V| observer.next(value.clone()));

        self.refs.set(self.refs.get() + 1);
        if !connected {
            self.connect();
        }

        let output = self.clone();
        Subscription::new(move || {
            drop(sub);
            output.detach();
        })
    }

    fn detach(&self) {
        self.refs.set(self.refs.get() - 1);
        if self.refs.get() == 0 {
            log::trace!("last subscriber left; disconnecting");
            let connection = self.connection.borrow_mut().take();
            drop(connection);
        }
    }

    fn connect(self: &Rc<Self>) {
        log::trace!("connecting state stream");
        let before = self.published.get();
        *self.sampled.borrow_mut() = None;
        let mut parts = Vec::with_capacity(4);

        let weak: Weak<Self> = Rc::downgrade(self);
        parts.push(self.root.subscribe({
            let weak = weak.clone();
            move |value| {
                if let Some(output) = weak.upgrade() {
                    *output.sampled.borrow_mut() = Some(value);
                }
            }
        }));

        parts.push(self.engine.ticks().subscribe({
            let weak = weak.clone();
            move |_: &InternalState| {
                if let Some(output) = weak.upgrade() {
                    output.on_tick();
                }
            }
        }));

        parts.push(self.effects.subscribe({
            let engine = Rc::downgrade(&self.engine);
            move |action: Action| {
                if let Some(engine) = engine.upgrade() {
                    engine.dispatch(action.into());
                }
            }
        }));

        if !self.engine.is_ready() {
            let on_first = weak.clone();
            let on_complete = weak;
            parts.push(self.preload.subscribe_with(
                move |list: ActionList| {
                    if let Some(output) = on_first.upgrade() {
                        output.on_preload(list);
                    }
                },
                move || {
                    if let Some(output) = on_complete.upgrade() {
                        output.on_preload_complete();
                    }
                },
            ));
        }

        *self.connection.borrow_mut() = Some(Subscription::join(parts));

        if self.published.get() == before {
            self.on_tick();
        }
    }

    fn on_tick(&self) {
        if !self.engine.is_open() {
            return;
        }
        self.engine.sync();
        let sampled = self.sampled.borrow().clone();
        match sampled {
            Some(value) => self.publish(value),
            None => log::trace!("state stream has not emitted yet; tick skipped"),
        }
    }

    fn on_preload(&self, actions: ActionList) {
        self.engine.mark_ready();
        let before = self.published.get();
        self.engine.dispatch(actions);
        if self.published.get() == before {
            self.on_tick();
        }
    }

    fn on_preload_complete(&self) {
        if self.engine.mark_ready() {
            self.on_tick();
        }
    }

    fn publish(&self, value: V) {
        *self.latest.borrow_mut() = Some(value.clone());
        self.published.set(self.published.get() + 1);
        self.subscribers.next(value);
    }
}

/// A running store: published state stream, bound actions and snapshots.
pub struct Store<V: Clone + 'static> {
    output: Rc<Output<V>>,
    actions: BoundActionTree,
    dispatcher: Dispatcher,
}

impl<V: Clone + 'static> Clone for Store<V> {
    fn clone(&self) -> Self {
        Self {
            output: self.output.clone(),
            actions: self.actions.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<V: Clone + 'static> Store<V> {
    /// Combined state stream. Replays the latest published value; the engine
    /// is connected while at least one subscription is open.
    pub fn state_stream(&self) -> Stream<V> {
        let output = self.output.clone();
        Stream::new(move |observer: Observer<V>| output.attach(observer))
    }

    pub fn subscribe(&self, f: impl Fn(V) + 'static) -> Subscription {
        self.state_stream().subscribe(f)
    }

    /// Latest published state, if any.
    pub fn current(&self) -> Option<V> {
        self.output.latest.borrow().clone()
    }

    pub fn actions(&self) -> &BoundActionTree {
        &self.actions
    }

    /// Bound creators of one fragment, keyed by handler name.
    pub fn fragment_actions(&self, id: FragmentId) -> Option<BoundActionTree> {
        self.output
            .engine
            .fragment_creators(id)
            .map(|creators| BoundActionTree::bind_creators(creators, &self.dispatcher))
    }

    /// Synchronous read of the aggregator's current record.
    pub fn internal_state(&self) -> InternalState {
        self.output.engine.snapshot()
    }

    /// Current value of one fragment, straight from the aggregator.
    pub fn fragment_state(&self, key: &str) -> Option<SharedState> {
        self.internal_state().get(key).cloned()
    }

    pub fn fragment_keys(&self) -> Vec<FragmentKey> {
        self.output.engine.fragment_keys()
    }

    pub fn dispatch(&self, actions: impl Into<ActionList>) {
        self.dispatcher.dispatch(actions);
    }

    /// Runs `f` inside this store's batch context.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.dispatcher.batch_context().run(f)
    }

    pub fn batch_context(&self) -> &BatchContext {
        self.dispatcher.batch_context()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn status(&self) -> StoreStatus {
        self.output.engine.status()
    }

    pub fn is_ready(&self) -> bool {
        self.output.engine.is_ready()
    }

    /// Number of open subscriptions to the state stream.
    pub fn subscriber_count(&self) -> usize {
        self.output.refs.get()
    }
}

impl<V: Clone + fmt::Debug + 'static> fmt::Debug for Store<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("status", &self.status())
            .field("current", &*self.output.latest.borrow())
            .field("internal_state", &self.internal_state())
            .finish()
    }
}
