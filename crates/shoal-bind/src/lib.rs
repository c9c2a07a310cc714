//! # Store definitions and selections
//!
//! A view layer usually wants several independently written stores mounted
//! side by side, plus cheap subscriptions to the one slice a view renders.
//! This crate provides that surface without committing to any UI toolkit:
//!
//! - `define_store`: an id plus an initializer, reusable across mounts.
//! - `combine_stores`: runs several definitions in one engine; the
//!   published state is a record keyed by definition id.
//! - `BoundStore::select`: a stream of one selected value that only emits
//!   when the selection changes.
//!
//! ```rust
//! use shoal_bind::*;
//! use shoal_core::*;
//!
//! let counter = define_store("counter", |scope: &Scope| -> Result<Root<i32>> {
//!     let c = scope.declare_state(FragmentDecl::new(0).on("increment", |n| n + 1))?;
//!     Ok(Root::new(c.state, c.actions))
//! });
//!
//! let bound = combine_stores(&[&counter], StoreOptions::default()).unwrap();
//! let _sub = bound.select_eq(&counter, |n| *n).subscribe(|n| println!("count = {n}"));
//! bound.actions_for("counter").and_then(|a| a.find("increment")).unwrap().call();
//! assert_eq!(bound.state_of(&counter), Some(1));
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use shoal_core::{
    ActionTree, BoundActionTree, IntoRoot, Result, Root, Scope, Store, StoreOptions, Stream,
    combine, create_store,
};

type Initializer<V> = Rc<dyn Fn(&Scope) -> Result<Root<V>>>;

/// An initializer with a stable id, mountable any number of times.
pub struct StoreDefinition<V: 'static> {
    id: Rc<str>,
    initializer: Initializer<V>,
    initial: Option<Rc<V>>,
}

impl<V: 'static> Clone for StoreDefinition<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            initializer: self.initializer.clone(),
            initial: self.initial.clone(),
        }
    }
}

impl<V: 'static> fmt::Debug for StoreDefinition<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreDefinition").field("id", &self.id).finish()
    }
}

pub fn define_store<V, F, R>(id: impl Into<String>, initializer: F) -> StoreDefinition<V>
where
    V: Clone + 'static,
    F: Fn(&Scope) -> R + 'static,
    R: IntoRoot<Value = V>,
{
    let id: String = id.into();
    StoreDefinition {
        id: id.into(),
        initializer: Rc::new(move |scope: &Scope| initializer(scope).into_root()),
        initial: None,
    }
}

impl<V: Clone + 'static> StoreDefinition<V> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// State reported for this definition until its store first publishes.
    pub fn with_initial(mut self, initial: V) -> Self {
        self.initial = Some(Rc::new(initial));
        self
    }

    pub fn initial(&self) -> Option<&V> {
        self.initial.as_deref()
    }

    /// A standalone store running only this definition.
    pub fn clone_store(&self, options: StoreOptions) -> Result<Store<V>> {
        let initializer = self.initializer.clone();
        create_store(move |scope: &Scope| initializer(scope), options)
    }
}

/// A definition with its state type erased, as `combine_stores` takes it.
pub trait ErasedDefinition {
    fn id(&self) -> &str;

    /// Runs the initializer inside `scope`.
    fn install(&self, scope: &Scope) -> Result<(Stream<Rc<dyn Any>>, ActionTree)>;
}

impl<V: Clone + 'static> ErasedDefinition for StoreDefinition<V> {
    fn id(&self) -> &str {
        &self.id
    }

    fn install(&self, scope: &Scope) -> Result<(Stream<Rc<dyn Any>>, ActionTree)> {
        let root = (self.initializer)(scope)?;
        let state = root.state.map(|value| Rc::new(value) as Rc<dyn Any>);
        Ok((state, root.actions))
    }
}

/// Published state of a combined store, keyed by definition id.
#[derive(Clone)]
pub struct CombinedState(Rc<BTreeMap<String, Rc<dyn Any>>>);

impl CombinedState {
    pub fn get<V: 'static>(&self, id: &str) -> Option<&V> {
        self.0.get(id)?.downcast_ref::<V>()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Debug for CombinedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids()).finish()
    }
}

/// Mounts every definition in one store. When two definitions share an id,
/// the first one wins and the other is not run.
pub fn combine_stores(
    definitions: &[&dyn ErasedDefinition],
    options: StoreOptions,
) -> Result<BoundStore> {
    let store = create_store(
        |scope: &Scope| -> Result<Root<CombinedState>> {
            let mut states = BTreeMap::new();
            let mut actions = BTreeMap::new();
            for definition in definitions {
                if states.contains_key(definition.id()) {
                    log::debug!("store definition `{}` mounted twice; keeping the first", definition.id());
                    continue;
                }
                let (state, tree) = definition.install(scope)?;
                states.insert(definition.id().to_string(), state);
                actions.insert(definition.id().to_string(), tree);
            }
            let state = combine(states).map(|record| CombinedState(Rc::new(record)));
            Ok(Root::new(state, ActionTree::Group(actions)))
        },
        options,
    )?;
    Ok(BoundStore { store })
}

/// A combined store seen through its definitions.
#[derive(Clone)]
pub struct BoundStore {
    store: Store<CombinedState>,
}

impl BoundStore {
    pub fn store(&self) -> &Store<CombinedState> {
        &self.store
    }

    /// Selected slice of one definition's state. Emits the current selection
    /// on subscribe, then only when `same` says it changed.
    pub fn select<V, S>(
        &self,
        definition: &StoreDefinition<V>,
        selector: impl Fn(&V) -> S + 'static,
        same: impl Fn(&S, &S) -> bool + 'static,
    ) -> Stream<S>
    where
        V: Clone + 'static,
        S: Clone + 'static,
    {
        let id = definition.id.clone();
        self.store
            .state_stream()
            .filter_map(move |state| state.get::<V>(&id).map(&selector))
            .distinct_until_changed_by(same)
    }

    /// [`select`](Self::select) comparing with `PartialEq`.
    pub fn select_eq<V, S>(
        &self,
        definition: &StoreDefinition<V>,
        selector: impl Fn(&V) -> S + 'static,
    ) -> Stream<S>
    where
        V: Clone + 'static,
        S: Clone + PartialEq + 'static,
    {
        self.select(definition, selector, |a, b| a == b)
    }

    /// Latest published state of one definition, or its initial state
    /// while nothing has been published yet.
    pub fn state_of<V: Clone + 'static>(&self, definition: &StoreDefinition<V>) -> Option<V> {
        match self.store.current() {
            Some(state) => state.get::<V>(definition.id()).cloned(),
            None => definition.initial().cloned(),
        }
    }

    pub fn actions_for(&self, id: &str) -> Option<&BoundActionTree> {
        self.store.actions().get(id)
    }

    /// First published state, if the store can publish right away. Stores
    /// gated by a pending preload producer yield `None`.
    pub fn first_snapshot(&self) -> Option<CombinedState> {
        let first = Rc::new(RefCell::new(None));
        let _sub = {
            let first = first.clone();
            self.store
                .state_stream()
                .take(1)
                .subscribe(move |state| *first.borrow_mut() = Some(state))
        };
        first.take()
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_ready()
    }
}

#[cfg(test)]
mod tests;
