pub mod lock;

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::config::BrigadeConfig;
use crate::error::BrigadeError;
use crate::models::plan::Tier;
use crate::models::state::{
    AbsorptionEntry, EscalationEntry, HistoryStatus, ReviewEntry, ReviewResult,
    ScopeDecisionEntry, State, TaskHistoryEntry, WalkawayDecisionEntry, WalkawayDecisionKind,
};

use self::lock::FileLock;

/// Durable, crash-safe per-plan state store (C2, spec.md §4.2).
///
/// Every mutation acquires the sidecar lock, re-reads the current content,
/// applies the change, writes to a temp file in the same directory, fsyncs,
/// and renames atomically over the state file before releasing the lock.
pub struct StateStore {
    plan_path: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
    config: BrigadeConfig,
}

impl StateStore {
    pub fn new(plan_path: &Path, config: BrigadeConfig) -> Self {
        let state_path = Self::state_path_for(plan_path);
        let mut lock_os = state_path.as_os_str().to_owned();
        lock_os.push(".lock");
        Self {
            plan_path: plan_path.to_path_buf(),
            state_path,
            lock_path: PathBuf::from(lock_os),
            config,
        }
    }

    /// `P` with extension replaced by `.state` plus the plan extension
    /// (spec.md §4.2, §6): `plan.json` → `plan.state.json`.
    pub fn state_path_for(plan_path: &Path) -> PathBuf {
        match plan_path.extension() {
            Some(ext) => {
                let stem = plan_path.with_extension("");
                let mut os = stem.into_os_string();
                os.push(".state.");
                os.push(ext);
                PathBuf::from(os)
            }
            None => {
                let mut os = plan_path.as_os_str().to_owned();
                os.push(".state");
                PathBuf::from(os)
            }
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Load current state without taking the lock. If missing, returns a
    /// fresh state. If present but unparseable, backs it up under a
    /// timestamped suffix and returns a fresh state.
    pub fn load(&self) -> Result<State, BrigadeError> {
        if !self.state_path.exists() {
            return Ok(State::fresh());
        }
        let raw = std::fs::read_to_string(&self.state_path)?;
        match serde_json::from_str::<State>(&raw) {
            Ok(state) => Ok(state),
            Err(e) => {
                let backup = self.backup_path();
                warn!(path = %self.state_path.display(), backup = %backup.display(), error = %e, "state file unparseable, recovering fresh state");
                std::fs::rename(&self.state_path, &backup)?;
                Ok(State::fresh())
            }
        }
    }

    fn backup_path(&self) -> PathBuf {
        let ts = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut os = self.state_path.as_os_str().to_owned();
        os.push(format!(".corrupt-{ts}"));
        PathBuf::from(os)
    }

    fn acquire_lock(&self) -> Result<FileLock, BrigadeError> {
        FileLock::acquire(
            &self.lock_path,
            self.config.lock_acquire_timeout,
            self.config.lock_stale_threshold,
            self.config.lock_heartbeat_interval,
        )
    }

    /// Unconditionally breaks any existing lock once, up front (the CLI's
    /// `--force` flag, spec.md §7: "overridable by an explicit force flag
    /// that first breaks the lock").
    pub fn force_unlock(&self) -> Result<(), BrigadeError> {
        FileLock::force_break(&self.lock_path)
    }

    /// Atomically read-modify-write: acquire the lock, load the current
    /// state, apply `f`, then write+fsync+rename before releasing the lock.
    pub fn mutate_atomically<F>(&self, f: F) -> Result<State, BrigadeError>
    where
        F: FnOnce(&mut State),
    {
        let _lock = self.acquire_lock()?;
        let mut state = self.load()?;
        f(&mut state);
        self.write_atomic(&state)?;
        Ok(state)
    }

    fn write_atomic(&self, state: &State) -> Result<(), BrigadeError> {
        let json = serde_json::to_string_pretty(state)?;
        let dir = self
            .state_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;
        let mut tmp_name = self
            .state_path
            .file_name()
            .unwrap_or_default()
            .to_os_string();
        tmp_name.push(format!(".tmp-{}", std::process::id()));
        let tmp_path = dir.join(tmp_name);

        {
            use std::io::Write;
            let mut f = std::fs::File::create(&tmp_path)?;
            f.write_all(json.as_bytes())?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.state_path)?;
        Ok(())
    }

    pub fn set_current_task(&self, task_id: Option<&str>) -> Result<State, BrigadeError> {
        let task_id = task_id.map(|s| s.to_string());
        self.mutate_atomically(|s| s.current_task = task_id)
    }

    pub fn add_task_history(
        &self,
        task_id: &str,
        worker: Tier,
        status: HistoryStatus,
        approach: Option<String>,
        error_category: Option<String>,
    ) -> Result<State, BrigadeError> {
        let entry = TaskHistoryEntry {
            task_id: task_id.to_string(),
            worker,
            status,
            timestamp: Utc::now(),
            approach,
            error_category,
        };
        self.mutate_atomically(|s| s.task_history.push(entry))
    }

    pub fn record_escalation(
        &self,
        task_id: &str,
        from: Tier,
        to: Tier,
        reason: &str,
    ) -> Result<State, BrigadeError> {
        let entry = EscalationEntry {
            task_id: task_id.to_string(),
            from,
            to,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        self.mutate_atomically(|s| s.escalations.push(entry))
    }

    pub fn record_review(&self, task_id: &str, result: ReviewResult, reason: &str) -> Result<State, BrigadeError> {
        let entry = ReviewEntry {
            task_id: task_id.to_string(),
            result,
            reason: reason.to_string(),
        };
        self.mutate_atomically(|s| s.reviews.push(entry))
    }

    pub fn record_absorption(&self, task_id: &str, absorbed_by: &str) -> Result<State, BrigadeError> {
        let entry = AbsorptionEntry {
            task_id: task_id.to_string(),
            absorbed_by: absorbed_by.to_string(),
        };
        self.mutate_atomically(|s| s.absorptions.push(entry))
    }

    pub fn record_walkaway_decision(
        &self,
        task_id: &str,
        decision: WalkawayDecisionKind,
        reason: &str,
        failure_reason: &str,
    ) -> Result<State, BrigadeError> {
        let entry = WalkawayDecisionEntry {
            task_id: task_id.to_string(),
            decision,
            reason: reason.to_string(),
            failure_reason: failure_reason.to_string(),
        };
        self.mutate_atomically(|s| s.walkaway_decisions.push(entry))
    }

    pub fn record_scope_decision(&self, entry: ScopeDecisionEntry) -> Result<State, BrigadeError> {
        self.mutate_atomically(|s| s.scope_decisions.push(entry))
    }

    /// Sets `passes=true` for `task_id` in the plan file, rewritten
    /// atomically via the same temp-file-then-rename path as the state file
    /// (spec.md §4.2's `MarkComplete`).
    pub fn mark_complete(&self, task_id: &str) -> Result<(), BrigadeError> {
        let raw = std::fs::read_to_string(&self.plan_path)?;
        let mut value: serde_json::Value = serde_json::from_str(&raw)?;
        if let Some(tasks) = value.get_mut("tasks").and_then(|t| t.as_array_mut()) {
            for task in tasks.iter_mut() {
                if task.get("id").and_then(|v| v.as_str()) == Some(task_id) {
                    task["passes"] = serde_json::Value::Bool(true);
                }
            }
        }
        let json = serde_json::to_string_pretty(&value)?;
        let dir = self
            .plan_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let mut tmp_name = self.plan_path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(format!(".tmp-{}", std::process::id()));
        let tmp_path = dir.join(tmp_name);
        {
            use std::io::Write;
            let mut f = std::fs::File::create(&tmp_path)?;
            f.write_all(json.as_bytes())?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.plan_path)?;
        Ok(())
    }
}
