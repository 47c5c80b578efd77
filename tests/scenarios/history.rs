//! Saving finished runs to history

use crate::helpers::*;
use flowrun::core::{RunStatus, Status};
use flowrun::persistence::{InMemoryPersistence, PersistenceBackend};

const WORKFLOW: &str = r#"
name: history
jobs:
  - id: build
    steps:
      - id: ver
        run: echo "::set-output name=version::${{ secrets.TOKEN }}"
  - id: deploy
    needs: build
    steps:
      - run: exit 1
"#;

async fn check_roundtrip(store: &dyn PersistenceBackend) {
    let outcome = Harness::new().secret("TOKEN", "s3cr3t").run(WORKFLOW).await;
    store.save_run(&outcome.report).await.unwrap();

    let runs = store.list_runs(Some("history"), 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failure);
    assert_eq!(runs[0].succeeded, 1);
    assert_eq!(runs[0].failed, 1);

    let loaded = store.load_run(outcome.report.run_id).await.unwrap().unwrap();
    assert_eq!(loaded.jobs.len(), 2);
    assert_eq!(loaded.job("deploy").unwrap().status, Status::Failure);
    assert_eq!(loaded.job("build").unwrap().steps[0].outputs["version"], "***");
    assert!(!serde_json::to_string(&loaded).unwrap().contains("s3cr3t"));
}

#[tokio::test]
async fn test_in_memory_history() {
    check_roundtrip(&InMemoryPersistence::new()).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = flowrun::persistence::SqliteRunStore::new(&dir.path().join("history.db"))
        .await
        .unwrap();
    check_roundtrip(&store).await;
}
