//! Worker pool bounds

use crate::helpers::*;
use flowrun::core::{RunStatus, Status};

const FAN_OUT: &str = r#"
name: fan-out
jobs:
  - id: work
    strategy:
      matrix:
        n: [1, 2, 3, 4, 5, 6, 7, 8]
    steps:
      - uses: sleep
        with:
          ms: 60
"#;

#[tokio::test]
async fn test_running_instances_never_exceed_workers() {
    let sleep = SleepAction::new();
    let outcome = Harness::new()
        .max_parallel(3)
        .action("sleep", sleep.clone())
        .run(FAN_OUT)
        .await;

    assert_eq!(outcome.report.status, RunStatus::Success);
    assert_eq!(sleep.calls(), 8);
    assert!(sleep.peak() <= 3, "peak was {}", sleep.peak());
    assert!(sleep.peak() >= 2, "instances never overlapped");

    let mut running = 0usize;
    let mut peak = 0usize;
    for event in &outcome.events {
        if let flowrun::ExecutionEvent::InstanceStatusChanged { status, .. } = event {
            match status {
                Status::Running => running += 1,
                Status::Success | Status::Failure | Status::Cancelled => {
                    running = running.saturating_sub(1)
                }
                _ => {}
            }
            peak = peak.max(running);
        }
    }
    assert!(peak <= 3);
}

#[tokio::test]
async fn test_single_worker_runs_in_declaration_order() {
    let sleep = SleepAction::new();
    let outcome = Harness::new()
        .max_parallel(1)
        .action("sleep", sleep.clone())
        .run(FAN_OUT)
        .await;

    assert_eq!(sleep.peak(), 1);
    let expected: Vec<String> = (1..=8).map(|n| format!("work (n={})", n)).collect();
    assert_eq!(outcome.start_order(), expected);
}

#[tokio::test]
async fn test_job_max_parallel_caps_its_instances() {
    let yaml = r#"
name: capped
jobs:
  - id: work
    strategy:
      max-parallel: 2
      matrix:
        n: [1, 2, 3, 4, 5]
    steps:
      - uses: sleep
        with:
          ms: 60
"#;
    let sleep = SleepAction::new();
    let outcome = Harness::new()
        .max_parallel(8)
        .action("sleep", sleep.clone())
        .run(yaml)
        .await;

    assert_eq!(outcome.report.status, RunStatus::Success);
    assert_eq!(sleep.calls(), 5);
    assert!(sleep.peak() <= 2, "peak was {}", sleep.peak());
}
