//! Matrix expansion and fail-fast

use crate::helpers::*;
use flowrun::core::{ExecutionPlan, ExpansionPolicy, Status, Workflow};
use std::sync::Arc;

#[tokio::test]
async fn test_instances_follow_axis_order() {
    let yaml = r#"
name: matrix
jobs:
  - id: test
    strategy:
      matrix:
        os: [a, b]
        ver: [1, 2]
    steps:
      - id: show
        run: echo "::set-output name=combo::${{ matrix.os }}-${{ matrix.ver }}"
"#;
    let outcome = run(yaml).await;

    let ids: Vec<&str> = outcome.report.jobs.iter().map(|j| j.instance.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "test (os=a, ver=1)",
            "test (os=a, ver=2)",
            "test (os=b, ver=1)",
            "test (os=b, ver=2)",
        ]
    );
    for job in &outcome.report.jobs {
        assert_eq!(job.status, Status::Success);
    }
    assert_eq!(
        outcome.job("test (os=b, ver=1)").steps[0].outputs["combo"],
        "b-1"
    );
}

#[test]
fn test_plan_is_deterministic() {
    let yaml = r#"
name: matrix
jobs:
  - id: test
    strategy:
      matrix:
        os: [linux, mac]
        ver: [1, 2]
        exclude:
          - os: mac
            ver: 1
        include:
          - os: windows
            ver: 3
    steps:
      - run: "true"
"#;
    let ids = || {
        let workflow = Arc::new(Workflow::from_yaml(yaml).unwrap());
        let plan = ExecutionPlan::new(workflow, ExpansionPolicy::default()).unwrap();
        plan.instances.iter().map(|i| i.id.clone()).collect::<Vec<_>>()
    };

    let first = ids();
    assert_eq!(
        first,
        vec![
            "test (os=linux, ver=1)",
            "test (os=linux, ver=2)",
            "test (os=mac, ver=2)",
            "test (os=windows, ver=3)",
        ]
    );
    assert_eq!(first, ids());
}

#[tokio::test]
async fn test_fail_fast_cancels_siblings() {
    let yaml = r#"
name: fail-fast
jobs:
  - id: test
    strategy:
      fail-fast: true
      max-parallel: 1
      matrix:
        n: [1, 2, 3]
    steps:
      - run: test "${{ matrix.n }}" != "1"
"#;
    let outcome = run(yaml).await;

    assert_status(&outcome, "test (n=1)", Status::Failure);
    for id in ["test (n=2)", "test (n=3)"] {
        assert_status(&outcome, id, Status::Cancelled);
        assert_eq!(
            outcome.job(id).reason.as_deref(),
            Some("fail-fast: test (n=1) failed")
        );
    }
    assert_eq!(outcome.start_order(), vec!["test (n=1)"]);
}

#[tokio::test]
async fn test_without_fail_fast_siblings_finish() {
    let yaml = r#"
name: no-fail-fast
jobs:
  - id: test
    strategy:
      max-parallel: 1
      matrix:
        n: [1, 2, 3]
    steps:
      - run: test "${{ matrix.n }}" != "1"
"#;
    let outcome = run(yaml).await;

    assert_status(&outcome, "test (n=1)", Status::Failure);
    assert_status(&outcome, "test (n=2)", Status::Success);
    assert_status(&outcome, "test (n=3)", Status::Success);
    assert_eq!(outcome.report.status, flowrun::RunStatus::Failure);
}
