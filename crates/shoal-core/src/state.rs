use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::rc::Rc;

use crate::action::{Action, ActionCreators, ActionType, Payload};
use crate::stream::Stream;

/// Value stored in a fragment slot of the aggregator.
pub trait StateValue: Any + Debug {
    fn as_any(&self) -> &dyn Any;
    fn eq_value(&self, other: &dyn StateValue) -> bool;
}

impl<T: Any + Debug + PartialEq> StateValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_value(&self, other: &dyn StateValue) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }
}

pub type SharedState = Rc<dyn StateValue>;

/// Same allocation, or equal field by field.
pub fn same_state(a: &SharedState, b: &SharedState) -> bool {
    Rc::ptr_eq(a, b) || a.eq_value(&**b)
}

pub type FragmentId = usize;

/// `name:id` for named fragments, `id` otherwise.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentKey(Rc<str>);

impl FragmentKey {
    pub fn new(id: FragmentId, name: Option<&str>) -> Self {
        match name {
            Some(name) if !name.is_empty() => Self(format!("{name}:{id}").into()),
            _ => Self(id.to_string().into()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for FragmentKey {
    fn from(key: &str) -> Self {
        Self(key.into())
    }
}

impl From<String> for FragmentKey {
    fn from(key: String) -> Self {
        Self(key.into())
    }
}

pub(crate) enum Handler<S> {
    Constant(Rc<dyn Fn() -> S>),
    Update(Rc<dyn Fn(&S) -> S>),
    WithPayload(Rc<dyn Fn(&S, &Payload) -> Option<S>>),
}

impl<S> Handler<S> {
    pub(crate) fn takes_payload(&self) -> bool {
        matches!(self, Handler::WithPayload(_))
    }
}

/// Declaration of one fragment: its initial state and its pure handlers.
///
/// ```
/// use shoal_core::FragmentDecl;
///
/// let counter = FragmentDecl::new(0i64)
///     .named("counter")
///     .on("increment", |n| n + 1)
///     .on_payload("add", |n, by: &i64| n + by)
///     .on_constant("reset", || 0);
/// ```
pub struct FragmentDecl<S> {
    pub(crate) name: Option<String>,
    pub(crate) state: S,
    pub(crate) handlers: BTreeMap<String, Handler<S>>,
}

impl<S: Clone + PartialEq + Debug + 'static> FragmentDecl<S> {
    pub fn new(state: S) -> Self {
        Self {
            name: None,
            state,
            handlers: BTreeMap::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// `(state) -> state`; its creator takes no payload.
    pub fn on(mut self, action: impl Into<String>, f: impl Fn(&S) -> S + 'static) -> Self {
        self.handlers.insert(action.into(), Handler::Update(Rc::new(f)));
        self
    }

    /// `(state, payload) -> state`; its creator carries a payload of type `P`.
    pub fn on_payload<P: Any>(
        mut self,
        action: impl Into<String>,
        f: impl Fn(&S, &P) -> S + 'static,
    ) -> Self {
        let handler = move |state: &S, payload: &Payload| {
            payload.downcast_ref::<P>().map(|payload| f(state, payload))
        };
        self.handlers
            .insert(action.into(), Handler::WithPayload(Rc::new(handler)));
        self
    }

    /// `() -> state`; its creator takes no payload.
    pub fn on_constant(mut self, action: impl Into<String>, f: impl Fn() -> S + 'static) -> Self {
        self.handlers.insert(action.into(), Handler::Constant(Rc::new(f)));
        self
    }
}

/// Type-erased reducer of one fragment. `None` leaves the slot untouched.
pub(crate) type ErasedReducer = Rc<dyn Fn(&SharedState, &Action) -> Option<SharedState>>;

pub(crate) fn erase_handlers<S: Clone + PartialEq + Debug + 'static>(
    key: FragmentKey,
    handlers: BTreeMap<String, Handler<S>>,
) -> ErasedReducer {
    Rc::new(move |state: &SharedState, action: &Action| {
        let ActionType::Handler(name) = action.action_type() else {
            return None;
        };
        let handler = handlers.get(&**name)?;
        let Some(current) = state.as_any().downcast_ref::<S>() else {
            log::warn!("fragment {key}: stored state has an unexpected type; `{name}` skipped");
            return None;
        };
        let next = match handler {
            Handler::Constant(f) => f(),
            Handler::Update(f) => f(current),
            Handler::WithPayload(f) => {
                let Some(payload) = action.payload() else {
                    log::warn!("fragment {key}: `{name}` dispatched without payload; state kept");
                    return None;
                };
                match f(current, payload) {
                    Some(next) => next,
                    None => {
                        log::warn!("fragment {key}: `{name}` payload has the wrong type; state kept");
                        return None;
                    }
                }
            }
        };
        Some(Rc::new(next) as SharedState)
    })
}

/// What `declare_state` hands back to the initializer.
pub struct FragmentHandle<S: Clone + 'static> {
    pub id: FragmentId,
    pub key: FragmentKey,
    /// Replays the latest published state to every subscriber.
    pub state: Stream<S>,
    pub actions: ActionCreators,
}

impl<S: Clone + 'static> Clone for FragmentHandle<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            key: self.key.clone(),
            state: self.state.clone(),
            actions: self.actions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(name: &str, payload: Option<Payload>) -> Action {
        Action::new(0, ActionType::Handler(name.into()), payload)
    }

    #[test]
    fn key_format() {
        assert_eq!(FragmentKey::new(2, Some("todos")).as_str(), "todos:2");
        assert_eq!(FragmentKey::new(2, None).as_str(), "2");
        assert_eq!(FragmentKey::new(4, Some("")).as_str(), "4");
    }

    #[test]
    fn same_state_compares_fields() {
        let a: SharedState = Rc::new(vec![1, 2]);
        let b: SharedState = Rc::new(vec![1, 2]);
        let c: SharedState = Rc::new(vec![1, 3]);
        let d: SharedState = Rc::new("1, 2");
        assert!(same_state(&a, &a));
        assert!(same_state(&a, &b));
        assert!(!same_state(&a, &c));
        assert!(!same_state(&a, &d));
    }

    #[test]
    fn erased_reducer_applies_each_handler_shape() {
        let decl = FragmentDecl::new(1i32)
            .on("double", |n| n * 2)
            .on_payload("add", |n, by: &i32| n + by)
            .on_constant("reset", || 0);
        let reducer = erase_handlers(FragmentKey::new(0, None), decl.handlers);
        let state: SharedState = Rc::new(5i32);

        let read = |s: Option<SharedState>| s.and_then(|s| s.as_any().downcast_ref::<i32>().copied());
        assert_eq!(read(reducer(&state, &action("double", None))), Some(10));
        assert_eq!(read(reducer(&state, &action("add", Some(Rc::new(3i32))))), Some(8));
        assert_eq!(read(reducer(&state, &action("reset", None))), Some(0));
    }

    #[test]
    fn mismatched_payloads_keep_state() {
        let decl = FragmentDecl::new(1i32).on_payload("add", |n, by: &i32| n + by);
        let reducer = erase_handlers(FragmentKey::new(0, None), decl.handlers);
        let state: SharedState = Rc::new(5i32);

        assert!(reducer(&state, &action("add", None)).is_none());
        assert!(reducer(&state, &action("add", Some(Rc::new("three")))).is_none());
        assert!(reducer(&state, &action("unknown", None)).is_none());
    }

    #[test]
    fn handler_shapes() {
        let decl = FragmentDecl::new(0u8)
            .on("bump", |n| n + 1)
            .on_payload("set", |_, v: &u8| *v)
            .on_constant("clear", || 0);
        assert!(decl.handlers["set"].takes_payload());
        assert!(!decl.handlers["bump"].takes_payload());
        assert!(!decl.handlers["clear"].takes_payload());
    }
}
