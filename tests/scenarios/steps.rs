//! Step execution: environment layering, redaction and timeouts

use crate::helpers::*;
use flowrun::core::{RunStatus, Status};
use flowrun::error::FailureKind;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_env_layers_later_wins() {
    let yaml = r#"
name: env
env:
  LEVEL: workflow
  KEEP: from-workflow
jobs:
  - id: build
    env:
      LEVEL: job
    steps:
      - id: job-level
        run: echo "::set-output name=level::$LEVEL/$KEEP"
      - id: step-level
        env:
          LEVEL: step-${{ env.LEVEL }}
        run: echo "::set-output name=level::$LEVEL"
"#;
    let outcome = run(yaml).await;

    let steps = &outcome.job("build").steps;
    assert_eq!(steps[0].outputs["level"], "job/from-workflow");
    assert_eq!(steps[1].outputs["level"], "step-job");
}

#[tokio::test]
async fn test_secrets_are_redacted_everywhere() {
    let yaml = r#"
name: secrets
jobs:
  - id: publish
    env:
      API_KEY: ${{ secrets.TOKEN }}
    outputs:
      leaked: ${{ steps.leak.outputs.value }}
    steps:
      - id: check
        run: test "$API_KEY" = "hunter2" && echo "key is $API_KEY"
      - id: leak
        run: |
          echo "::set-output name=value::${{ secrets.TOKEN }}"
          echo "stderr hunter2" >&2
"#;
    let outcome = Harness::new().secret("TOKEN", "hunter2").run(yaml).await;

    assert_status(&outcome, "publish", Status::Success);

    let text = outcome.sink.text();
    assert!(text.contains("key is ***"), "sink saw: {}", text);
    assert!(!text.contains("hunter2"));

    let job = outcome.job("publish");
    assert_eq!(job.steps[0].stdout.trim(), "key is ***");
    assert_eq!(job.steps[1].outputs["value"], "***");
    assert!(job.steps[1].stderr.contains("stderr ***"));
    assert_eq!(job.outputs["leaked"], "***");

    let json = outcome.report.to_json().unwrap();
    assert!(!json.contains("hunter2"));
    assert!(!format!("{:?}", outcome.events).contains("hunter2"));
}

#[tokio::test]
async fn test_step_timeout_kills_process() {
    let yaml = r#"
name: timeout
jobs:
  - id: hang
    steps:
      - id: sleepy
        timeout-minutes: 0.005
        run: sleep 30
      - id: after
        run: echo after
"#;
    let started = Instant::now();
    let outcome = run(yaml).await;
    assert!(started.elapsed() < Duration::from_secs(10));

    let steps = &outcome.job("hang").steps;
    let failure = steps[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(steps[0].conclusion, Status::Failure);
    assert_eq!(steps[1].conclusion, Status::Skipped);
    assert_status(&outcome, "hang", Status::Failure);
    assert_eq!(outcome.report.status, RunStatus::Failure);
}

#[tokio::test]
async fn test_engine_default_timeout_applies() {
    let yaml = r#"
name: default-timeout
jobs:
  - id: hang
    steps:
      - run: sleep 30
"#;
    let outcome = Harness::new()
        .step_timeout(Duration::from_millis(200))
        .run(yaml)
        .await;

    let failure = outcome.job("hang").steps[0].failure.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Timeout);
}

#[tokio::test]
async fn test_exit_code_is_recorded() {
    let yaml = r#"
name: exit
jobs:
  - id: build
    steps:
      - run: |
          echo partial
          exit 7
"#;
    let outcome = run(yaml).await;

    let step = &outcome.job("build").steps[0];
    assert_eq!(step.exit_code, Some(7));
    assert_eq!(
        step.failure.as_ref().map(|f| f.kind.clone()),
        Some(FailureKind::ExitCode(7))
    );
    assert_eq!(step.stdout.trim(), "partial");
}

#[tokio::test]
async fn test_github_context() {
    let yaml = r#"
name: context
jobs:
  - id: build
    strategy:
      matrix:
        os: [linux]
    steps:
      - id: info
        run: echo "::set-output name=info::${{ github.event_name }} ${{ github.ref_name }} ${{ github.job }} ${{ matrix.os }}"
"#;
    let outcome = run(yaml).await;
    assert_eq!(
        outcome.job("build (os=linux)").steps[0].outputs["info"],
        "push main build linux"
    );
}
