use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::aggregator::InternalState;
use crate::batch::BatchContext;
use crate::monitor::{LogMonitor, Monitor};

/// Where store activity is reported.
#[derive(Clone, Default)]
pub enum Devtools {
    #[default]
    Disabled,
    /// Report through [`LogMonitor`].
    Logging,
    Monitor(Rc<dyn Monitor>),
}

impl Devtools {
    pub(crate) fn into_monitor(self) -> Option<Rc<dyn Monitor>> {
        match self {
            Devtools::Disabled => None,
            Devtools::Logging => Some(Rc::new(LogMonitor)),
            Devtools::Monitor(monitor) => Some(monitor),
        }
    }
}

impl From<bool> for Devtools {
    fn from(enabled: bool) -> Self {
        if enabled {
            Devtools::Logging
        } else {
            Devtools::Disabled
        }
    }
}

impl<M: Monitor + 'static> From<Rc<M>> for Devtools {
    fn from(monitor: Rc<M>) -> Self {
        Devtools::Monitor(monitor)
    }
}

impl fmt::Debug for Devtools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Devtools::Disabled => f.write_str("Disabled"),
            Devtools::Logging => f.write_str("Logging"),
            Devtools::Monitor(_) => f.write_str("Monitor(..)"),
        }
    }
}

/// Options for [`create_store`](crate::create_store).
///
/// ```
/// use shoal_core::{StoreOptions, InternalState};
///
/// let mut saved = InternalState::new();
/// saved.insert("counter:0", 41i64);
///
/// let options = StoreOptions::new()
///     .context("https://api.example.com".to_string())
///     .preloaded_state(saved)
///     .devtools(true);
/// ```
#[derive(Clone, Default)]
pub struct StoreOptions {
    pub(crate) context: Option<Rc<dyn Any>>,
    pub(crate) preloaded_state: Option<InternalState>,
    pub(crate) devtools: Devtools,
    pub(crate) batch: Option<BatchContext>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value returned by `Scope::context` inside the initializer.
    pub fn context<C: Any>(mut self, context: C) -> Self {
        self.context = Some(Rc::new(context));
        self
    }

    /// Per-key values replacing the declared initial states.
    pub fn preloaded_state(mut self, state: InternalState) -> Self {
        self.preloaded_state = Some(state);
        self
    }

    pub fn devtools(mut self, devtools: impl Into<Devtools>) -> Self {
        self.devtools = devtools.into();
        self
    }

    /// Batch context shared with other stores. Each store gets its own
    /// otherwise.
    pub fn batch(mut self, batch: BatchContext) -> Self {
        self.batch = Some(batch);
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("context", &self.context.is_some())
            .field("preloaded_state", &self.preloaded_state)
            .field("devtools", &self.devtools)
            .field("batch", &self.batch.is_some())
            .finish()
    }
}
