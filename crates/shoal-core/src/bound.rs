use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::action::{Action, ActionCreator, ActionCreators, ActionTree, Payload};
use crate::runtime::Dispatcher;

/// An action creator bound to a store's dispatcher.
#[derive(Clone)]
pub struct BoundAction {
    creator: ActionCreator,
    dispatcher: Dispatcher,
}

impl BoundAction {
    pub(crate) fn new(creator: ActionCreator, dispatcher: Dispatcher) -> Self {
        Self { creator, dispatcher }
    }

    /// Dispatches the action without a payload.
    pub fn call(&self) {
        self.dispatch_payload(None);
    }

    pub fn send<P: Any>(&self, payload: P) {
        self.dispatch_payload(Some(Rc::new(payload)));
    }

    pub fn dispatch_payload(&self, payload: Option<Payload>) {
        self.dispatcher.dispatch(self.creator.create(payload));
    }

    /// The action this binding would dispatch, without dispatching it.
    pub fn create(&self, payload: Option<Payload>) -> Action {
        self.creator.create(payload)
    }

    pub fn creator(&self) -> &ActionCreator {
        &self.creator
    }
}

impl fmt::Debug for BoundAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoundAction").field(&self.creator).finish()
    }
}

/// Mirror of an [`ActionTree`] whose leaves dispatch.
#[derive(Clone, Debug)]
pub enum BoundActionTree {
    Action(BoundAction),
    Group(BTreeMap<String, BoundActionTree>),
    List(Vec<BoundActionTree>),
}

impl BoundActionTree {
    pub(crate) fn bind(tree: &ActionTree, dispatcher: &Dispatcher) -> Self {
        match tree {
            ActionTree::Creator(creator) => {
                BoundActionTree::Action(BoundAction::new(creator.clone(), dispatcher.clone()))
            }
            ActionTree::Group(entries) => BoundActionTree::Group(
                entries
                    .iter()
                    .map(|(key, subtree)| (key.clone(), Self::bind(subtree, dispatcher)))
                    .collect(),
            ),
            ActionTree::List(items) => {
                BoundActionTree::List(items.iter().map(|item| Self::bind(item, dispatcher)).collect())
            }
        }
    }

    pub(crate) fn bind_creators(creators: &ActionCreators, dispatcher: &Dispatcher) -> Self {
        BoundActionTree::Group(
            creators
                .iter()
                .map(|(name, creator)| {
                    let bound = BoundAction::new(creator.clone(), dispatcher.clone());
                    (name.to_string(), BoundActionTree::Action(bound))
                })
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&BoundActionTree> {
        match self {
            BoundActionTree::Group(entries) => entries.get(key),
            _ => None,
        }
    }

    pub fn at(&self, index: usize) -> Option<&BoundActionTree> {
        match self {
            BoundActionTree::List(items) => items.get(index),
            _ => None,
        }
    }

    pub fn action(&self) -> Option<&BoundAction> {
        match self {
            BoundActionTree::Action(action) => Some(action),
            _ => None,
        }
    }

    /// Looks up a leaf by a dotted path; numeric segments index lists.
    ///
    /// `tree.find("todos.add")`, `tree.find("counters.1.increment")`
    pub fn find(&self, path: &str) -> Option<&BoundAction> {
        path.split('.')
            .try_fold(self, |node, segment| match node {
                BoundActionTree::List(_) => node.at(segment.parse().ok()?),
                _ => node.get(segment),
            })?
            .action()
    }
}
