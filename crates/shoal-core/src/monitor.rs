use crate::action::Action;
use crate::aggregator::InternalState;
use crate::state::FragmentKey;

/// Observes a store from the side. Every hook runs synchronously inside the
/// engine; implementations must not dispatch.
pub trait Monitor {
    fn store_created(&self, _keys: &[FragmentKey], _state: &InternalState) {}

    /// Called once per action routed to the aggregator, matched or not.
    fn action_applied(&self, action: &Action, changed: &[FragmentKey], state: &InternalState);

    fn ready(&self) {}
}

/// Writes every hook to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMonitor;

impl Monitor for LogMonitor {
    fn store_created(&self, keys: &[FragmentKey], state: &InternalState) {
        log::debug!("store created with fragments {keys:?}: {state:?}");
    }

    fn action_applied(&self, action: &Action, changed: &[FragmentKey], state: &InternalState) {
        if changed.is_empty() {
            log::debug!("{} #{}: no change", action.action_type(), action.id());
        } else {
            log::debug!(
                "{} #{}: changed {changed:?} -> {state:?}",
                action.action_type(),
                action.id()
            );
        }
    }

    fn ready(&self) {
        log::debug!("store ready");
    }
}
