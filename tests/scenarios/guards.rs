//! `if:` guards on steps and jobs, and `continue-on-error`

use crate::helpers::*;
use flowrun::core::{RunStatus, Status};

#[tokio::test]
async fn test_output_flag_guard_skips_step() {
    let yaml = r#"
name: flag
jobs:
  - id: build
    steps:
      - id: prev
        run: echo "::set-output name=flag::false"
      - id: gated
        if: steps.prev.outputs.flag == 'true'
        run: echo should not run
      - id: after
        run: echo "::set-output name=ran::yes"
"#;
    let outcome = run(yaml).await;

    let steps = &outcome.job("build").steps;
    assert_eq!(steps[0].conclusion, Status::Success);
    assert_eq!(steps[1].conclusion, Status::Skipped);
    assert!(steps[1].started_at.is_none());
    assert_eq!(steps[2].outputs["ran"], "yes");
    assert_status(&outcome, "build", Status::Success);
    assert!(!outcome.sink.text().contains("should not run"));
}

#[tokio::test]
async fn test_status_guards_after_failed_step() {
    let yaml = r#"
name: cleanup
jobs:
  - id: build
    steps:
      - run: exit 1
      - id: normal
        run: echo normal
      - id: handled
        if: failure()
        run: echo "::set-output name=handled::yes"
      - id: cleanup
        if: ${{ always() }}
        run: echo "::set-output name=cleaned::yes"
      - id: unreachable
        if: success()
        run: echo nope
"#;
    let outcome = run(yaml).await;

    let steps = &outcome.job("build").steps;
    assert_eq!(steps[0].conclusion, Status::Failure);
    assert_eq!(steps[1].conclusion, Status::Skipped);
    assert_eq!(steps[2].outputs["handled"], "yes");
    assert_eq!(steps[3].outputs["cleaned"], "yes");
    assert_eq!(steps[4].conclusion, Status::Skipped);
    assert_status(&outcome, "build", Status::Failure);
}

#[tokio::test]
async fn test_false_job_guard_does_not_fail_run() {
    let yaml = r#"
name: guarded
jobs:
  - id: deploy
    if: github.ref == 'refs/heads/release'
    steps:
      - run: echo deploying
  - id: notify
    needs: deploy
    steps:
      - run: echo notify
"#;
    let outcome = run(yaml).await;

    assert_status(&outcome, "deploy", Status::Skipped);
    assert!(!outcome.job("deploy").required);
    assert_status(&outcome, "notify", Status::Skipped);
    assert_eq!(outcome.report.status, RunStatus::Success);
}

#[tokio::test]
async fn test_failure_guard_runs_only_on_upstream_failure() {
    let yaml = r#"
name: rollback
jobs:
  - id: deploy
    steps:
      - run: exit 1
  - id: rollback
    needs: deploy
    if: failure()
    steps:
      - run: echo rolling back
  - id: announce
    needs: deploy
    steps:
      - run: echo done
"#;
    let outcome = run(yaml).await;

    assert_status(&outcome, "rollback", Status::Success);
    assert_status(&outcome, "announce", Status::Skipped);
    assert!(outcome.sink.text().contains("rolling back"));
}

#[tokio::test]
async fn test_continue_on_error_step() {
    let yaml = r#"
name: tolerant
jobs:
  - id: build
    steps:
      - id: lint
        continue-on-error: true
        run: exit 2
      - id: compile
        run: echo "::set-output name=lint::${{ steps.lint.outcome }}/${{ steps.lint.conclusion }}"
"#;
    let outcome = run(yaml).await;

    let steps = &outcome.job("build").steps;
    assert_eq!(steps[0].outcome, Status::Failure);
    assert_eq!(steps[0].conclusion, Status::Success);
    assert_eq!(steps[1].outputs["lint"], "failure/success");
    assert_status(&outcome, "build", Status::Success);
}
