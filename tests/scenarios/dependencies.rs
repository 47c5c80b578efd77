//! Job graph ordering, skip propagation and `needs` outputs

use crate::helpers::*;
use flowrun::core::{RunStatus, Status, Workflow};
use flowrun::error::LoadError;
use flowrun::execution::ExecutionEvent;

#[test]
fn test_cycle_is_rejected_before_running() {
    let yaml = r#"
name: cycle
jobs:
  - id: a
    needs: c
    steps:
      - run: "true"
  - id: b
    needs: a
    steps:
      - run: "true"
  - id: c
    needs: b
    steps:
      - run: "true"
"#;
    let cycle = match Workflow::from_yaml(yaml) {
        Err(LoadError::CyclicDependency { cycle }) => cycle,
        other => panic!("expected a cycle error, got {:?}", other.err()),
    };
    for job in ["a", "b", "c"] {
        assert!(cycle.iter().any(|j| j == job), "{:?} misses {}", cycle, job);
    }
}

#[test]
fn test_unknown_need_is_rejected() {
    let yaml = r#"
name: unknown
jobs:
  - id: a
    needs: ghost
    steps:
      - run: "true"
"#;
    assert!(matches!(
        Workflow::from_yaml(yaml),
        Err(LoadError::UnknownJob { ref needed, .. }) if needed == "ghost"
    ));
}

#[tokio::test]
async fn test_instances_start_after_needs_finish() {
    let yaml = r#"
name: diamond
jobs:
  - id: build
    strategy:
      matrix:
        os: [linux, mac]
    steps:
      - run: "true"
  - id: lint
    steps:
      - run: "true"
  - id: test
    needs: [build, lint]
    steps:
      - run: "true"
  - id: deploy
    needs: test
    steps:
      - run: "true"
"#;
    let outcome = run(yaml).await;
    assert_eq!(outcome.report.status, RunStatus::Success);

    let finished = |id: &str| outcome.status_event(id, Status::Success).unwrap();
    let started = |id: &str| outcome.status_event(id, Status::Running).unwrap();

    assert!(finished("build (os=linux)") < started("test"));
    assert!(finished("build (os=mac)") < started("test"));
    assert!(finished("lint") < started("test"));
    assert!(finished("test") < started("deploy"));

    let run_finished = outcome
        .position(|e| matches!(e, ExecutionEvent::RunFinished { .. }))
        .unwrap();
    assert_eq!(run_finished, outcome.events.len() - 1);
    assert!(matches!(outcome.events[0], ExecutionEvent::RunStarted { instances: 5, .. }));
}

#[tokio::test]
async fn test_failure_skips_dependents_transitively() {
    let yaml = r#"
name: cascade
jobs:
  - id: a
    steps:
      - run: "true"
  - id: b
    steps:
      - run: exit 3
  - id: x
    needs: [a, b]
    steps:
      - run: "true"
  - id: y
    needs: x
    steps:
      - run: "true"
  - id: report
    needs: y
    if: always()
    steps:
      - run: "true"
"#;
    let outcome = run(yaml).await;

    assert_status(&outcome, "a", Status::Success);
    assert_status(&outcome, "b", Status::Failure);
    assert_status(&outcome, "x", Status::Skipped);
    assert_status(&outcome, "y", Status::Skipped);
    assert_status(&outcome, "report", Status::Success);
    assert_eq!(outcome.report.status, RunStatus::Failure);

    let x = outcome.job("x");
    assert!(x.reason.as_deref().unwrap_or_default().contains("b"));
    assert!(x.steps.iter().all(|s| s.conclusion == Status::Skipped));
    assert!(outcome.status_event("x", Status::Running).is_none());

    let failure = outcome.job("b").failed_step().unwrap();
    assert_eq!(failure.exit_code, Some(3));
}

#[tokio::test]
async fn test_needs_outputs_only_from_ancestors() {
    let yaml = r#"
name: outputs
jobs:
  - id: producer
    outputs:
      version: ${{ steps.ver.outputs.value }}
    steps:
      - id: ver
        run: echo "::set-output name=value::1.4.2"
  - id: consumer
    needs: producer
    steps:
      - id: read
        run: echo "::set-output name=seen::v${{ needs.producer.outputs.version }}"
  - id: bystander
    steps:
      - id: read
        run: echo "::set-output name=seen::v${{ needs.producer.outputs.version }}"
"#;
    let outcome = run(yaml).await;

    assert_eq!(outcome.job("producer").outputs["version"], "1.4.2");
    assert_eq!(outcome.job("consumer").steps[0].outputs["seen"], "v1.4.2");
    assert_eq!(outcome.job("bystander").steps[0].outputs["seen"], "v");
}

#[tokio::test]
async fn test_needs_result_is_visible() {
    let yaml = r#"
name: result
jobs:
  - id: flaky
    continue-on-error: true
    steps:
      - run: exit 1
  - id: after
    needs: flaky
    steps:
      - id: check
        run: echo "::set-output name=result::${{ needs.flaky.result }}"
"#;
    let outcome = run(yaml).await;

    assert_status(&outcome, "flaky", Status::Failure);
    assert!(!outcome.job("flaky").required);
    assert_status(&outcome, "after", Status::Success);
    assert_eq!(outcome.job("after").steps[0].outputs["result"], "failure");
    assert_eq!(outcome.report.status, RunStatus::Success);
}
