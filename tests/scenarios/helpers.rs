//! Test utilities for workflow scenarios

use async_trait::async_trait;
use flowrun::action::{Action, ActionContext, ActionOutput, ActionRegistry, ActionSpec, InputSpec};
use flowrun::core::{JobResult, RunReport, Status, TriggerEvent, Workflow};
use flowrun::error::ActionError;
use flowrun::execution::{CollectingSink, EngineConfig, ExecutionEngine, ExecutionEvent};
use flowrun::secrets::StaticSecrets;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sleeps for `ms` milliseconds and tracks how many invocations overlap
#[derive(Default)]
pub struct SleepAction {
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl SleepAction {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Highest number of concurrent invocations seen
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for SleepAction {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            description: Some("Sleep for a while".to_string()),
            inputs: BTreeMap::from([("ms".to_string(), InputSpec::optional("50"))]),
            outputs: Some(Vec::new()),
        }
    }

    async fn run(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        let ms: u64 = ctx
            .input("ms")
            .unwrap_or("50")
            .parse()
            .map_err(|_| ActionError::Failed("ms must be a number".to_string()))?;

        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        Ok(ActionOutput::default())
    }
}

/// A workflow run along with everything it emitted
pub struct Outcome {
    pub report: RunReport,
    pub events: Vec<ExecutionEvent>,
    pub sink: Arc<CollectingSink>,
}

impl Outcome {
    pub fn job(&self, instance: &str) -> &JobResult {
        self.report
            .job(instance)
            .unwrap_or_else(|| panic!("no instance '{}' in report", instance))
    }

    pub fn status(&self, instance: &str) -> Status {
        self.job(instance).status
    }

    /// Position of the first event matching `pred`
    pub fn position(&self, pred: impl Fn(&ExecutionEvent) -> bool) -> Option<usize> {
        self.events.iter().position(pred)
    }

    /// Position where `instance` entered `status`
    pub fn status_event(&self, instance: &str, status: Status) -> Option<usize> {
        self.position(|e| {
            matches!(e, ExecutionEvent::InstanceStatusChanged { instance: i, status: s, .. }
                if i == instance && *s == status)
        })
    }

    /// Instances in the order they started running
    pub fn start_order(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::InstanceStatusChanged {
                    instance,
                    status: Status::Running,
                    ..
                } => Some(instance.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Builder for a test engine
pub struct Harness {
    config: EngineConfig,
    actions: ActionRegistry,
    secrets: StaticSecrets,
    event: TriggerEvent,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                working_dir: std::env::temp_dir(),
                ..Default::default()
            },
            actions: ActionRegistry::with_builtins(),
            secrets: StaticSecrets::new(),
            event: TriggerEvent::new("push", "refs/heads/main"),
        }
    }

    pub fn max_parallel(mut self, workers: usize) -> Self {
        self.config.max_parallel = workers;
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    pub fn action(mut self, name: &str, action: Arc<dyn Action>) -> Self {
        self.actions.register(name, action);
        self
    }

    pub fn secret(mut self, name: &str, value: &str) -> Self {
        self.secrets.insert(name, value);
        self
    }

    pub fn event(mut self, event: TriggerEvent) -> Self {
        self.event = event;
        self
    }

    pub fn engine(&self, sink: Arc<CollectingSink>) -> ExecutionEngine {
        ExecutionEngine::new(self.config.clone())
            .with_actions(self.actions.clone())
            .with_secrets(Arc::new(self.secrets.clone()))
            .with_sink(sink)
    }

    pub async fn run(&self, yaml: &str) -> Outcome {
        let sink = Arc::new(CollectingSink::new());
        let mut engine = self.engine(sink.clone());
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        engine.add_event_handler(move |event| seen.lock().push(event));

        let workflow = Arc::new(Workflow::from_yaml(yaml).expect("workflow should load"));
        let report = engine
            .run(workflow, self.event.clone())
            .await
            .expect("workflow should plan");

        let events = events.lock().clone();
        Outcome {
            report,
            events,
            sink,
        }
    }
}

/// Run with default settings
pub async fn run(yaml: &str) -> Outcome {
    Harness::new().run(yaml).await
}

pub fn assert_status(outcome: &Outcome, instance: &str, expected: Status) {
    let job = outcome.job(instance);
    assert_eq!(
        job.status, expected,
        "instance '{}' was {} (reason: {:?})",
        instance, job.status, job.reason
    );
}
