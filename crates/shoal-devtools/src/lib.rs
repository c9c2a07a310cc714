use std::cell::RefCell;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use web_time::Instant;

use shoal_core::{Action, FragmentKey, InternalState, Monitor};

#[derive(Clone, Debug)]
pub struct InspectorConfig {
    /// Store name used in summaries and exports.
    pub name: String,
    /// Maximum number of actions kept in the history.
    pub history_limit: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            name: "shoal".into(),
            history_limit: 64,
        }
    }
}

/// One routed action as seen by the inspector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub seq: u64,
    pub id: usize,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub action_type: String,
    pub changed: Vec<String>,
    /// Debug rendering of the aggregator record after the action.
    pub state: String,
    /// Milliseconds since the inspector was created.
    pub at_ms: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metrics {
    pub dispatched: u64,
    pub changed: u64,
    pub unmatched: u64,
    pub actions_per_sec: f32,
}

#[derive(Serialize)]
struct Export<'a> {
    name: &'a str,
    ready: bool,
    fragments: &'a [String],
    history: &'a VecDeque<ActionRecord>,
}

#[derive(Default)]
struct InspectorState {
    fragments: Vec<String>,
    history: VecDeque<ActionRecord>,
    metrics: Metrics,
    ready: bool,
    last_action: Option<Instant>,
}

/// Records store activity. Hand it to a store as
/// `StoreOptions::new().devtools(inspector.clone())`.
pub struct Inspector {
    config: InspectorConfig,
    started: Instant,
    state: RefCell<InspectorState>,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new(InspectorConfig::default())
    }
}

impl Inspector {
    pub fn new(config: InspectorConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
            state: RefCell::new(InspectorState::default()),
        }
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<ActionRecord> {
        self.state.borrow().history.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<ActionRecord> {
        self.state.borrow().history.back().cloned()
    }

    pub fn metrics(&self) -> Metrics {
        self.state.borrow().metrics.clone()
    }

    pub fn fragments(&self) -> Vec<String> {
        self.state.borrow().fragments.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().ready
    }

    pub fn clear(&self) {
        let mut s = self.state.borrow_mut();
        s.history.clear();
        s.metrics = Metrics::default();
        s.last_action = None;
    }

    /// One-line status, e.g. for a log line or a debug overlay.
    pub fn summary(&self) -> String {
        let s = self.state.borrow();
        let mut lines = vec![
            format!("store: {}", self.config.name),
            format!("ready: {}", s.ready),
            format!("actions: {}", s.metrics.dispatched),
            format!("changed: {}", s.metrics.changed),
            format!("rate: {:.1}/s", s.metrics.actions_per_sec),
        ];
        if let Some(last) = s.history.back() {
            lines.push(format!("last: {} #{}", last.action_type, last.id));
        }
        lines.join("  |  ")
    }

    pub fn to_json(&self) -> String {
        let s = self.state.borrow();
        let export = Export {
            name: &self.config.name,
            ready: s.ready,
            fragments: &s.fragments,
            history: &s.history,
        };
        serde_json::to_string(&export).unwrap_or("{}".into())
    }

    /// Parses the `history` of a previous [`to_json`](Self::to_json) export.
    pub fn history_from_json(json: &str) -> Option<Vec<ActionRecord>> {
        #[derive(Deserialize)]
        struct Import {
            history: Vec<ActionRecord>,
        }
        serde_json::from_str::<Import>(json).ok().map(|import| import.history)
    }
}

impl Monitor for Inspector {
    fn store_created(&self, keys: &[FragmentKey], state: &InternalState) {
        let mut s = self.state.borrow_mut();
        s.fragments = keys.iter().map(ToString::to_string).collect();
        log::debug!("[{}] inspecting {} fragment(s): {state:?}", self.config.name, keys.len());
    }

    fn action_applied(&self, action: &Action, changed: &[FragmentKey], state: &InternalState) {
        let now = Instant::now();
        let mut s = self.state.borrow_mut();

        if let Some(prev) = s.last_action.replace(now) {
            let dt = (now - prev).as_secs_f32();
            if dt > 0.0 {
                let rate = 1.0 / dt;
                // simple EMA
                let a = 0.2;
                s.metrics.actions_per_sec = if s.metrics.actions_per_sec == 0.0 {
                    rate
                } else {
                    (1.0 - a) * s.metrics.actions_per_sec + a * rate
                };
            }
        }
        s.metrics.dispatched += 1;
        if changed.is_empty() {
            s.metrics.unmatched += 1;
        } else {
            s.metrics.changed += 1;
        }

        let record = ActionRecord {
            seq: s.metrics.dispatched,
            id: action.id(),
            name: action.name().map(str::to_string),
            action_type: action.action_type().to_string(),
            changed: changed.iter().map(ToString::to_string).collect(),
            state: format!("{state:?}"),
            at_ms: (now - self.started).as_secs_f64() * 1000.0,
        };
        s.history.push_back(record);
        while s.history.len() > self.config.history_limit {
            s.history.pop_front();
        }
    }

    fn ready(&self) {
        self.state.borrow_mut().ready = true;
        log::debug!("[{}] ready", self.config.name);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use shoal_core::*;

    use super::*;

    fn inspected_counter(config: InspectorConfig) -> (Store<i32>, Rc<Inspector>) {
        let inspector = Rc::new(Inspector::new(config));
        let store = create_store(
            |scope: &Scope| -> Result<Root<i32>> {
                let counter = scope.declare_state(
                    FragmentDecl::new(0i32).named("counter").on("increment", |n| n + 1),
                )?;
                Ok(Root::new(counter.state, counter.actions))
            },
            StoreOptions::new().devtools(inspector.clone()),
        )
        .expect("store builds");
        (store, inspector)
    }

    #[test]
    fn test_history_records_changes() {
        let (store, inspector) = inspected_counter(InspectorConfig::default());
        let _sub = store.subscribe(|_| {});

        store.actions().find("increment").unwrap().call();
        store.dispatch(Action::new(3, ActionType::Handler("increment".into()), None));

        let history = inspector.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].changed, vec!["counter:0".to_string()]);
        assert_eq!(history[0].name.as_deref(), Some("counter"));
        assert!(history[1].changed.is_empty());
        assert!(history[0].at_ms <= history[1].at_ms);

        let metrics = inspector.metrics();
        assert_eq!((metrics.dispatched, metrics.changed, metrics.unmatched), (2, 1, 1));
        assert!(inspector.is_ready());
        assert_eq!(inspector.fragments(), vec!["counter:0".to_string()]);
    }

    #[test]
    fn test_history_is_bounded() {
        let (store, inspector) = inspected_counter(InspectorConfig {
            name: "bounded".into(),
            history_limit: 3,
        });
        let increment = store.actions().find("increment").unwrap().clone();
        for _ in 0..5 {
            increment.call();
        }

        let seqs: Vec<u64> = inspector.history().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert_eq!(inspector.metrics().dispatched, 5);
    }

    #[test]
    fn test_summary_and_export() {
        let (store, inspector) = inspected_counter(InspectorConfig::default());
        let _sub = store.subscribe(|_| {});
        store.actions().find("increment").unwrap().call();

        let summary = inspector.summary();
        assert!(summary.starts_with("store: shoal  |  ready: true"));
        assert!(summary.ends_with("last: increment #0"));

        let json = inspector.to_json();
        assert!(json.contains("\"type\":\"increment\""));
        let history = Inspector::history_from_json(&json).expect("export parses");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].seq, 1);
        assert_eq!(history[0].changed, vec!["counter:0".to_string()]);
        assert!(Inspector::history_from_json("not json").is_none());
    }

    #[test]
    fn test_clear_resets_counters() {
        let (store, inspector) = inspected_counter(InspectorConfig::default());
        store.actions().find("increment").unwrap().call();
        inspector.clear();

        assert!(inspector.history().is_empty());
        assert_eq!(inspector.metrics(), Metrics::default());
        assert!(inspector.last().is_none());
    }
}
