//! `uses` steps: built-in, registered and workflow-local actions

use crate::helpers::*;
use flowrun::core::Status;
use flowrun::error::FailureKind;

#[tokio::test]
async fn test_workflow_action_contract() {
    let yaml = r#"
name: actions
actions:
  greet:
    description: Say hello
    run: |
      echo "hello $INPUT_WHO from $INPUT_PLACE"
      echo "::set-output name=greeting::hi $INPUT_WHO"
      echo "::set-output name=internal::dropped"
    inputs:
      who:
        required: true
      place:
        default: earth
    outputs: [greeting]
jobs:
  - id: build
    steps:
      - id: hello
        uses: greet
        with:
          who: ${{ github.actor }}
      - id: missing
        uses: greet
        continue-on-error: true
      - id: show
        run: echo "::set-output name=seen::${{ steps.hello.outputs.greeting }}|${{ steps.hello.outputs.internal }}"
"#;
    let mut event = flowrun::TriggerEvent::new("push", "refs/heads/main");
    event.actor = "octocat".to_string();
    let outcome = Harness::new().event(event).run(yaml).await;

    let steps = &outcome.job("build").steps;
    assert_eq!(steps[0].conclusion, Status::Success);
    assert_eq!(steps[0].outputs.len(), 1);
    assert_eq!(steps[0].outputs["greeting"], "hi octocat");
    assert!(outcome.sink.text().contains("hello octocat from earth"));

    assert_eq!(steps[1].outcome, Status::Failure);
    let failure = steps[1].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Input);
    assert!(failure.message.contains("who"));

    assert_eq!(steps[2].outputs["seen"], "hi octocat|");
    assert_status(&outcome, "build", Status::Success);
}

#[tokio::test]
async fn test_workflow_action_without_declared_outputs() {
    let yaml = r#"
name: actions
actions:
  gen:
    run: echo "::set-output name=msg::hi"
jobs:
  - id: build
    steps:
      - id: g
        uses: gen
      - id: show
        run: echo "got=${{ steps.g.outputs.msg }}"
"#;
    let outcome = run(yaml).await;

    let steps = &outcome.job("build").steps;
    assert_eq!(steps[0].outputs["msg"], "hi");
    assert_eq!(steps[1].stdout, "got=hi");
    assert_status(&outcome, "build", Status::Success);
}

#[tokio::test]
async fn test_builtin_actions() {
    let yaml = r#"
name: builtins
jobs:
  - id: build
    steps:
      - id: say
        uses: echo
        with:
          message: building ${{ github.ref_name }}
      - id: set
        uses: set-output
        with:
          artifact: app.tar.gz
      - id: boom
        uses: fail@v1
        with:
          exit-code: 4
          message: broken on purpose
"#;
    let outcome = run(yaml).await;

    let steps = &outcome.job("build").steps;
    assert_eq!(steps[0].stdout, "building main");
    assert_eq!(steps[1].outputs["artifact"], "app.tar.gz");
    assert_eq!(steps[2].exit_code, Some(4));
    assert_eq!(
        steps[2].failure.as_ref().map(|f| f.kind.clone()),
        Some(FailureKind::ExitCode(4))
    );
    assert!(outcome.sink.text().contains("broken on purpose"));
    assert_status(&outcome, "build", Status::Failure);
}

#[tokio::test]
async fn test_unknown_action_fails_step() {
    let yaml = r#"
name: unknown
jobs:
  - id: build
    steps:
      - uses: does-not-exist@v2
"#;
    let outcome = run(yaml).await;

    let failure = outcome.job("build").steps[0].failure.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Action);
    assert!(failure.message.contains("does-not-exist"));
    assert_status(&outcome, "build", Status::Failure);
}

#[tokio::test]
async fn test_registered_action_with_version() {
    let yaml = r#"
name: registered
jobs:
  - id: build
    steps:
      - uses: sleep@v1
        with:
          ms: 10
"#;
    let sleep = SleepAction::new();
    let outcome = Harness::new().action("sleep", sleep.clone()).run(yaml).await;

    assert_eq!(sleep.calls(), 1);
    assert_status(&outcome, "build", Status::Success);
}
