use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::Rc;

use crate::action::{Action, ActionCreator, ActionCreators, ActionList, ActionType, CreatorShape};
use crate::channel::Replay;
use crate::effects::{EffectInput, EffectRecord, IntoEffectStream, PreloadRecord};
use crate::error::{Result, StoreError};
use crate::state::{
    ErasedReducer, FragmentDecl, FragmentHandle, FragmentId, FragmentKey, SharedState, erase_handlers,
};

/// Type-erased fragment as the engine keeps it after initialization.
pub(crate) struct FragmentRecord {
    pub(crate) id: FragmentId,
    pub(crate) key: FragmentKey,
    pub(crate) initial: SharedState,
    pub(crate) reducer: ErasedReducer,
    /// Pushes a new value into the fragment's replay channel.
    pub(crate) publish: Rc<dyn Fn(&SharedState)>,
    pub(crate) creators: ActionCreators,
}

/// Everything declared by an initializer.
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) fragments: Vec<FragmentRecord>,
    pub(crate) effects: Vec<EffectRecord>,
    pub(crate) preloads: Vec<PreloadRecord>,
}

struct ScopeInner {
    sealed: Cell<bool>,
    registry: RefCell<Registry>,
    context: Option<Rc<dyn Any>>,
}

/// Declaration capabilities handed to a store initializer.
///
/// A `Scope` is a cheap handle and may be passed on to nested initializers.
/// Once the initializer returns, the scope is sealed and every declaration
/// fails with [`StoreError::Configuration`].
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(context: Option<Rc<dyn Any>>) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                sealed: Cell::new(false),
                registry: RefCell::new(Registry::default()),
                context,
            }),
        }
    }

    fn ensure_open(&self, capability: &str) -> Result<()> {
        if self.inner.sealed.get() {
            return Err(StoreError::outside_initializer(capability));
        }
        Ok(())
    }

    /// Registers a fragment and returns its replaying state stream and creators.
    pub fn declare_state<S>(&self, decl: FragmentDecl<S>) -> Result<FragmentHandle<S>>
    where
        S: Clone + PartialEq + Debug + 'static,
    {
        self.ensure_open("declare_state")?;
        let mut registry = self.inner.registry.borrow_mut();

        let id = registry.fragments.len();
        let name: Option<Rc<str>> = decl.name.as_deref().map(Rc::from);
        let key = FragmentKey::new(id, decl.name.as_deref());

        let mut creators = ActionCreators::default();
        for (action, handler) in &decl.handlers {
            let shape = if handler.takes_payload() {
                CreatorShape::WithPayload
            } else {
                CreatorShape::WithoutPayload
            };
            let kind = ActionType::Handler(Rc::from(action.as_str()));
            creators.insert(action.clone(), ActionCreator::new(id, name.clone(), kind, shape));
        }

        let replay = Replay::new(decl.state.clone());
        let publish: Rc<dyn Fn(&SharedState)> = {
            let replay = replay.clone();
            let key = key.clone();
            Rc::new(move |value: &SharedState| match value.as_any().downcast_ref::<S>() {
                Some(value) => replay.set(value.clone()),
                None => log::warn!("fragment {key}: refusing to publish a value of another type"),
            })
        };

        registry.fragments.push(FragmentRecord {
            id,
            key: key.clone(),
            initial: Rc::new(decl.state),
            reducer: erase_handlers(key.clone(), decl.handlers),
            publish,
            creators: creators.clone(),
        });
        log::trace!("declared fragment {key}");

        Ok(FragmentHandle {
            id,
            key,
            state: replay.stream(),
            actions: creators,
        })
    }

    /// Registers an effect; dispatching the returned creator's actions feeds
    /// the producer's input stream.
    pub fn declare_effect<F, R>(&self, producer: F) -> Result<ActionCreator>
    where
        F: FnOnce(EffectInput) -> R + 'static,
        R: IntoEffectStream<Action>,
    {
        self.ensure_open("declare_effect")?;
        let mut registry = self.inner.registry.borrow_mut();
        let id = registry.effects.len();
        let creator = ActionCreator::new(id, None, ActionType::Effect, CreatorShape::WithPayload);
        registry
            .effects
            .push(EffectRecord::new(id, creator.clone(), producer));
        Ok(creator)
    }

    /// Registers a preload producer gating store readiness.
    pub fn declare_preload_effect<F, R>(&self, producer: F) -> Result<()>
    where
        F: FnOnce() -> R + 'static,
        R: IntoEffectStream<ActionList>,
    {
        self.ensure_open("declare_preload_effect")?;
        let mut registry = self.inner.registry.borrow_mut();
        let id = registry.preloads.len();
        registry.preloads.push(PreloadRecord::new(id, producer));
        Ok(())
    }

    /// The `context` passed through `StoreOptions`, if it has type `C`.
    pub fn context<C: Any>(&self) -> Result<Option<Rc<C>>> {
        self.ensure_open("context")?;
        Ok(self
            .inner
            .context
            .clone()
            .and_then(|context| context.downcast::<C>().ok()))
    }

    pub(crate) fn seal(&self) -> Registry {
        self.inner.sealed.set(true);
        std::mem::take(&mut *self.inner.registry.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;

    #[test]
    fn ids_follow_declaration_order() {
        let scope = Scope::new(None);
        let a = scope.declare_state(FragmentDecl::new(0u8).named("a")).unwrap();
        let b = scope.declare_state(FragmentDecl::new(0u8)).unwrap();

        assert_eq!((a.id, b.id), (0, 1));
        assert_eq!(a.key.as_str(), "a:0");
        assert_eq!(b.key.as_str(), "1");
    }

    #[test]
    fn creators_follow_handler_shape() {
        let scope = Scope::new(None);
        let todos = scope
            .declare_state(
                FragmentDecl::new(Vec::<String>::new())
                    .on_payload("add", |list, item: &String| {
                        let mut list = list.clone();
                        list.push(item.clone());
                        list
                    })
                    .on("clear", |_| Vec::new()),
            )
            .unwrap();

        assert!(todos.actions["add"].requires_payload());
        assert!(!todos.actions["clear"].requires_payload());
    }

    #[test]
    fn sealed_scope_rejects_declarations() {
        let scope = Scope::new(None);
        scope.seal();

        let err = scope.declare_state(FragmentDecl::new(1u8)).err().expect("sealed");
        assert!(matches!(err, StoreError::Configuration(_)));
        assert!(scope.declare_effect(|_input| ()).is_err());
        assert!(scope.declare_preload_effect(|| Stream::<ActionList>::never()).is_err());
        assert!(scope.context::<u8>().is_err());
    }

    #[test]
    fn context_downcasts() {
        let scope = Scope::new(Some(Rc::new("api-base".to_string())));
        assert_eq!(
            scope.context::<String>().unwrap().as_deref().map(String::as_str),
            Some("api-base")
        );
        assert!(scope.context::<u32>().unwrap().is_none());
    }
}
