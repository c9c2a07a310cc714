use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::channel::Subject;
use crate::stream::Stream;

/// Type-erased, shared action payload.
pub type Payload = Rc<dyn Any>;

/// What an action targets inside the record it is addressed to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// A named handler of a fragment.
    Handler(Rc<str>),
    /// The trigger of an effect.
    Effect,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Handler(name) => f.write_str(name),
            ActionType::Effect => f.write_str("@effect"),
        }
    }
}

/// Immutable `{ id, name, type, payload }` record routed by `dispatch`.
#[derive(Clone)]
pub struct Action {
    id: usize,
    name: Option<Rc<str>>,
    kind: ActionType,
    payload: Option<Payload>,
}

impl Action {
    pub fn new(id: usize, kind: ActionType, payload: Option<Payload>) -> Self {
        Self {
            id,
            name: None,
            kind,
            payload,
        }
    }

    pub fn with_name(mut self, name: Option<Rc<str>>) -> Self {
        self.name = name;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn action_type(&self) -> &ActionType {
        &self.kind
    }

    pub fn is_effect(&self) -> bool {
        self.kind == ActionType::Effect
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn payload_as<P: Any>(&self) -> Option<&P> {
        self.payload.as_ref()?.downcast_ref::<P>()
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.kind)
            .field("payload", &self.payload.as_ref().map(|_| "..."))
            .finish()
    }
}

/// One or more actions handed to `dispatch` together.
#[derive(Clone, Debug, Default)]
pub struct ActionList(SmallVec<[Action; 1]>);

impl ActionList {
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    pub fn push(&mut self, action: Action) {
        self.0.push(action);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.0.iter()
    }

    pub fn extend(&mut self, other: ActionList) {
        self.0.extend(other.0);
    }
}

impl From<Action> for ActionList {
    fn from(action: Action) -> Self {
        let mut list = ActionList::new();
        list.push(action);
        list
    }
}

impl From<Vec<Action>> for ActionList {
    fn from(actions: Vec<Action>) -> Self {
        Self(SmallVec::from_vec(actions))
    }
}

impl FromIterator<Action> for ActionList {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ActionList {
    type Item = Action;
    type IntoIter = smallvec::IntoIter<[Action; 1]>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ActionList {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Whether a creator puts its argument into the action it builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreatorShape {
    WithPayload,
    WithoutPayload,
}

struct CreatorInner {
    id: usize,
    name: Option<Rc<str>>,
    kind: ActionType,
    shape: CreatorShape,
    input: Subject<Option<Payload>>,
    output: Subject<Option<Payload>>,
}

/// Builds actions for one fragment handler or effect trigger.
///
/// Every creator owns two broadcast channels: `input` sees each payload as
/// the action enters dispatch, `output` sees it once the action has fully
/// propagated through the store.
#[derive(Clone)]
pub struct ActionCreator {
    inner: Rc<CreatorInner>,
}

impl ActionCreator {
    pub(crate) fn new(id: usize, name: Option<Rc<str>>, kind: ActionType, shape: CreatorShape) -> Self {
        Self {
            inner: Rc::new(CreatorInner {
                id,
                name,
                kind,
                shape,
                input: Subject::new(),
                output: Subject::new(),
            }),
        }
    }

    /// Builds the action. Payload-less creators drop whatever they are given.
    pub fn create(&self, payload: Option<Payload>) -> Action {
        let payload = match self.inner.shape {
            CreatorShape::WithPayload => payload,
            CreatorShape::WithoutPayload => None,
        };
        Action::new(self.inner.id, self.inner.kind.clone(), payload).with_name(self.inner.name.clone())
    }

    pub fn with<P: Any>(&self, payload: P) -> Action {
        self.create(Some(Rc::new(payload)))
    }

    /// Action without payload.
    pub fn action(&self) -> Action {
        self.create(None)
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn action_type(&self) -> &ActionType {
        &self.inner.kind
    }

    pub fn shape(&self) -> CreatorShape {
        self.inner.shape
    }

    pub fn requires_payload(&self) -> bool {
        self.inner.shape == CreatorShape::WithPayload
    }

    pub fn matches(&self, action: &Action) -> bool {
        action.id() == self.inner.id && *action.action_type() == self.inner.kind
    }

    /// Payloads as they enter dispatch.
    pub fn input(&self) -> Stream<Option<Payload>> {
        self.inner.input.stream()
    }

    /// Payloads after the action propagated.
    pub fn output(&self) -> Stream<Option<Payload>> {
        self.inner.output.stream()
    }

    pub(crate) fn emit_input(&self, payload: Option<Payload>) {
        self.inner.input.next(payload);
    }

    pub(crate) fn emit_output(&self, payload: Option<Payload>) {
        self.inner.output.next(payload);
    }
}

impl fmt::Debug for ActionCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCreator")
            .field("id", &self.inner.id)
            .field("type", &self.inner.kind)
            .field("shape", &self.inner.shape)
            .finish()
    }
}

impl Stream<Option<Payload>> {
    /// Keeps payloads of type `P`, cloned out of their shared box.
    pub fn payloads<P: Any + Clone>(&self) -> Stream<P> {
        self.filter_map(|payload| payload?.downcast_ref::<P>().cloned())
    }
}

/// Creators of one fragment, keyed by handler name.
#[derive(Clone, Debug, Default)]
pub struct ActionCreators(BTreeMap<String, ActionCreator>);

impl ActionCreators {
    pub(crate) fn insert(&mut self, name: String, creator: ActionCreator) {
        self.0.insert(name, creator);
    }

    pub fn get(&self, name: &str) -> Option<&ActionCreator> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ActionCreator)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Index<&str> for ActionCreators {
    type Output = ActionCreator;

    fn index(&self, name: &str) -> &ActionCreator {
        self.get(name)
            .unwrap_or_else(|| panic!("no action creator named `{name}`"))
    }
}

/// Tree of creators handed back by an initializer; the store mirrors it with
/// bound dispatchers.
#[derive(Clone, Debug)]
pub enum ActionTree {
    Creator(ActionCreator),
    Group(BTreeMap<String, ActionTree>),
    List(Vec<ActionTree>),
}

impl ActionTree {
    pub fn group<K: Into<String>>(entries: impl IntoIterator<Item = (K, ActionTree)>) -> Self {
        ActionTree::Group(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn get(&self, key: &str) -> Option<&ActionTree> {
        match self {
            ActionTree::Group(map) => map.get(key),
            _ => None,
        }
    }

    pub fn at(&self, index: usize) -> Option<&ActionTree> {
        match self {
            ActionTree::List(items) => items.get(index),
            _ => None,
        }
    }

    pub fn creator(&self) -> Option<&ActionCreator> {
        match self {
            ActionTree::Creator(creator) => Some(creator),
            _ => None,
        }
    }
}

impl From<ActionCreator> for ActionTree {
    fn from(creator: ActionCreator) -> Self {
        ActionTree::Creator(creator)
    }
}

impl From<ActionCreators> for ActionTree {
    fn from(creators: ActionCreators) -> Self {
        ActionTree::Group(
            creators
                .0
                .into_iter()
                .map(|(k, v)| (k, ActionTree::Creator(v)))
                .collect(),
        )
    }
}

impl From<Vec<ActionTree>> for ActionTree {
    fn from(items: Vec<ActionTree>) -> Self {
        ActionTree::List(items)
    }
}
