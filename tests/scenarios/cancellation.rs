//! Cancelling a run from outside while work is in flight

use crate::helpers::*;
use flowrun::core::{RunStatus, Status, Workflow};
use flowrun::execution::{CollectingSink, ExecutionEvent};
use parking_lot::Mutex;
use std::sync::Arc;

const WORKFLOW: &str = r#"
name: cancel
jobs:
  - id: slow
    steps:
      - id: wait
        uses: sleep
        with:
          ms: 300
      - id: next
        run: echo next
  - id: later
    needs: slow
    steps:
      - run: echo later
"#;

#[tokio::test]
async fn test_cancel_lets_running_step_finish() {
    let sleep = SleepAction::new();
    let harness = Harness::new().action("sleep", sleep.clone());
    let sink = Arc::new(CollectingSink::new());
    let mut engine = harness.engine(sink.clone());

    let token = engine.cancel_token();
    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();
    engine.add_event_handler(move |event| {
        if matches!(&event, ExecutionEvent::StepStarted { step, .. } if step == "wait") {
            token.cancel();
        }
        seen.lock().push(event);
    });

    let workflow = Arc::new(Workflow::from_yaml(WORKFLOW).unwrap());
    let report = engine.run(workflow, Default::default()).await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(sleep.calls(), 1);

    let slow = report.job("slow").unwrap();
    assert_eq!(slow.status, Status::Cancelled);
    assert_eq!(slow.steps[0].conclusion, Status::Success);
    assert_eq!(slow.steps[1].conclusion, Status::Cancelled);
    assert!(slow.steps[1].started_at.is_none());

    let later = report.job("later").unwrap();
    assert_eq!(later.status, Status::Cancelled);
    assert_eq!(later.reason.as_deref(), Some("run cancelled"));
    assert!(!sink.text().contains("later"));

    let events = events.lock();
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunFinished { status: RunStatus::Cancelled, .. })
    ));
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let sleep = SleepAction::new();
    let harness = Harness::new().action("sleep", sleep.clone());
    let engine = harness.engine(Arc::new(CollectingSink::new()));
    engine.cancel();

    let workflow = Arc::new(Workflow::from_yaml(WORKFLOW).unwrap());
    let report = engine.run(workflow, Default::default()).await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(sleep.calls(), 0);
    assert!(report.jobs.iter().all(|j| j.status == Status::Cancelled));
}
