//! `on:` event filters

use flowrun::core::{TriggerEvent, Workflow};

const WORKFLOW: &str = r#"
name: release
on:
  push:
    branches: [main, "release/**"]
    branches-ignore: ["release/old-*"]
    tags: ["v*"]
  pull_request:
jobs:
  - id: build
    steps:
      - run: "true"
"#;

fn triggered(event: &str, git_ref: &str) -> bool {
    let workflow = Workflow::from_yaml(WORKFLOW).unwrap();
    workflow.is_triggered_by(&TriggerEvent::new(event, git_ref))
}

#[test]
fn test_branch_filters() {
    assert!(triggered("push", "refs/heads/main"));
    assert!(triggered("push", "refs/heads/release/2.0"));
    assert!(!triggered("push", "refs/heads/release/old-1.0"));
    assert!(!triggered("push", "refs/heads/feature/x"));
}

#[test]
fn test_tag_filters() {
    assert!(triggered("push", "refs/tags/v1.2.0"));
    assert!(!triggered("push", "refs/tags/nightly"));
}

#[test]
fn test_event_without_filter_accepts_any_ref() {
    assert!(triggered("pull_request", "refs/heads/anything"));
    assert!(!triggered("schedule", "refs/heads/main"));
}

#[test]
fn test_missing_on_block_accepts_everything() {
    let workflow = Workflow::from_yaml(
        r#"
name: always
jobs:
  - id: build
    steps:
      - run: "true"
"#,
    )
    .unwrap();
    assert!(workflow.is_triggered_by(&TriggerEvent::new("workflow_dispatch", "refs/heads/dev")));
}
