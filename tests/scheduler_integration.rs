use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use brigade::config::BrigadeConfig;
use brigade::error::BrigadeError;
use brigade::events::EventEmitter;
use brigade::models::plan::Plan;
use brigade::scheduler::{RunResult, Scheduler, TaskFilter, WorkerPool};
use brigade::store::StateStore;
use brigade::vcs::{VcsCollaborator, VcsMark};
use brigade::worker::{Worker, WorkerOutcome};

/// A worker whose replies are scripted per task title (matched as a
/// substring of the composed prompt), consumed in order. Exercises the
/// scheduler end-to-end without spawning real processes.
struct ScriptedWorker {
    replies: Mutex<HashMap<&'static str, VecDeque<&'static str>>>,
}

impl ScriptedWorker {
    fn new(replies: HashMap<&'static str, Vec<&'static str>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect()),
        }
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn execute(
        &self,
        prompt: &str,
        _cwd: &Path,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<WorkerOutcome, BrigadeError> {
        let mut replies = self.replies.lock().unwrap();
        let key = replies
            .keys()
            .find(|k| prompt.contains(*k))
            .copied()
            .unwrap_or("");
        let output = replies
            .get_mut(key)
            .and_then(|q| q.pop_front())
            .unwrap_or("");
        Ok(WorkerOutcome {
            output: output.to_string(),
            exit_code: 0,
            duration: Duration::from_millis(1),
            crashed: false,
            timed_out: false,
            cancelled: false,
        })
    }
}

struct NullVcs;

impl VcsCollaborator for NullVcs {
    fn mark(&self) -> Result<VcsMark, BrigadeError> {
        Ok(VcsMark("0".to_string()))
    }
    fn files_changed_since(&self, _baseline: &VcsMark) -> Result<Vec<std::path::PathBuf>, BrigadeError> {
        Ok(vec![])
    }
    fn diff_summary(&self, _baseline: &VcsMark) -> Result<String, BrigadeError> {
        Ok(String::new())
    }
}

fn pool(replies: HashMap<&'static str, Vec<&'static str>>) -> WorkerPool {
    let worker: Arc<dyn Worker> = Arc::new(ScriptedWorker::new(replies));
    WorkerPool {
        junior: worker.clone(),
        senior: worker.clone(),
        executive: worker,
    }
}

fn scheduler_for(dir: &tempfile::TempDir, plan_json: &str, workers: WorkerPool) -> (Scheduler, std::path::PathBuf) {
    let plan_path = dir.path().join("plan.json");
    std::fs::write(&plan_path, plan_json).unwrap();
    let plan = Plan::load_file(&plan_path).unwrap();
    let mut config = BrigadeConfig::default();
    config.review_enabled = false;
    let store = StateStore::new(&plan_path, config.clone());
    let scheduler = Scheduler::new(
        plan,
        plan_path.clone(),
        dir.path().to_path_buf(),
        config,
        store,
        EventEmitter::disabled(),
        workers,
        Arc::new(NullVcs),
        TaskFilter::default(),
        CancellationToken::new(),
    );
    (scheduler, plan_path)
}

#[tokio::test]
async fn happy_path_both_tasks_complete() {
    let dir = tempfile::tempdir().unwrap();
    let plan_json = r#"{
        "featureName": "f", "branchName": "b",
        "tasks": [
            {"id": "A", "title": "Task A", "complexity": "junior", "verification": ["true"]},
            {"id": "B", "title": "Task B", "complexity": "junior", "dependsOn": ["A"], "verification": ["true"]}
        ]
    }"#;
    let mut replies = HashMap::new();
    replies.insert("Task A", vec!["<promise>COMPLETE</promise>"]);
    replies.insert("Task B", vec!["<promise>COMPLETE</promise>"]);

    let (mut scheduler, plan_path) = scheduler_for(&dir, plan_json, pool(replies));
    let result = scheduler.run().await.unwrap();
    assert_eq!(result, RunResult::AllComplete);

    let plan = Plan::load_file(&plan_path).unwrap();
    assert!(plan.task("A").unwrap().passes);
    assert!(plan.task("B").unwrap().passes);
}

#[tokio::test]
async fn escalation_after_repeated_failure_then_success() {
    let dir = tempfile::tempdir().unwrap();
    let plan_json = r#"{
        "featureName": "f", "branchName": "b",
        "tasks": [
            {"id": "X", "title": "Task X", "complexity": "junior", "verification": ["true"]}
        ]
    }"#;
    let mut replies = HashMap::new();
    replies.insert("Task X", vec!["no signal here", "no signal here", "no signal here", "<promise>COMPLETE</promise>"]);

    let (mut scheduler, plan_path) = scheduler_for(&dir, plan_json, pool(replies));
    let result = scheduler.run().await.unwrap();
    assert_eq!(result, RunResult::AllComplete);

    let plan = Plan::load_file(&plan_path).unwrap();
    assert!(plan.task("X").unwrap().passes);

    let store = StateStore::new(&plan_path, BrigadeConfig::default());
    let state = store.load().unwrap();
    assert_eq!(state.escalations.len(), 1);
    assert_eq!(state.task_history.len(), 4);
}

#[tokio::test]
async fn absorption_marks_complete_without_verification() {
    let dir = tempfile::tempdir().unwrap();
    let plan_json = r#"{
        "featureName": "f", "branchName": "b",
        "tasks": [
            {"id": "P", "title": "Task P", "complexity": "junior", "verification": ["true"]},
            {"id": "Q", "title": "Task Q", "complexity": "junior", "dependsOn": ["P"]}
        ]
    }"#;
    let mut replies = HashMap::new();
    replies.insert("Task P", vec!["<promise>COMPLETE</promise>"]);
    replies.insert("Task Q", vec!["<promise>ABSORBED_BY:P</promise>"]);

    let (mut scheduler, plan_path) = scheduler_for(&dir, plan_json, pool(replies));
    let result = scheduler.run().await.unwrap();
    assert_eq!(result, RunResult::AllComplete);

    let store = StateStore::new(&plan_path, BrigadeConfig::default());
    let state = store.load().unwrap();
    assert_eq!(state.absorptions.len(), 1);
    assert_eq!(state.absorptions[0].task_id, "Q");
    assert_eq!(state.absorptions[0].absorbed_by, "P");
}

#[tokio::test]
async fn verification_failure_is_retried_and_then_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let plan_json = r#"{
        "featureName": "f", "branchName": "b",
        "tasks": [
            {"id": "Z", "title": "Task Z", "complexity": "junior", "verification": ["false"]}
        ]
    }"#;
    // First attempt "completes" but verification (`false`) fails; scheduler
    // should not mark Z complete after only one attempt.
    let mut replies = HashMap::new();
    replies.insert("Task Z", vec!["<promise>COMPLETE</promise>"]);

    let (mut scheduler, plan_path) = scheduler_for(&dir, plan_json, pool(replies));
    let _ = tokio::time::timeout(Duration::from_secs(2), scheduler.run()).await;

    let plan = Plan::load_file(&plan_path).unwrap();
    assert!(!plan.task("Z").unwrap().passes);
}
