pub use crate::action::{
    Action, ActionCreator, ActionCreators, ActionList, ActionTree, ActionType, CreatorShape, Payload,
};
pub use crate::aggregator::InternalState;
pub use crate::batch::BatchContext;
pub use crate::bound::{BoundAction, BoundActionTree};
pub use crate::channel::{Replay, Subject};
pub use crate::effects::{EffectInput, IntoEffectStream};
pub use crate::error::{ProducerKind, Result, StoreError};
pub use crate::monitor::{LogMonitor, Monitor};
pub use crate::options::{Devtools, StoreOptions};
pub use crate::runtime::{Dispatcher, StoreStatus};
pub use crate::scope::Scope;
pub use crate::state::{FragmentDecl, FragmentHandle, FragmentId, FragmentKey, SharedState, StateValue, same_state};
pub use crate::store::{IntoRoot, Root, Store, create_store};
pub use crate::stream::{Observer, Stream, combine};
pub use crate::subscription::Subscription;
