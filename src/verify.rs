use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::config::BrigadeConfig;
use crate::error::BrigadeError;
use crate::models::plan::{Task, VerificationSpec};
use crate::vcs::{VcsCollaborator, VcsMark};

/// Why verification failed, composed into the feedback carried to the next
/// attempt's prompt (spec.md §4.7).
#[derive(Debug, Clone)]
pub enum VerificationFailure {
    CommandFailed {
        cmd: String,
        exit_code: i32,
        tail: String,
    },
    IncompleteMarkers(Vec<MarkerHit>),
    PatternOnlyUnderWalkaway,
    ManualVerificationDenied,
    ManualVerificationTimedOut,
}

#[derive(Debug, Clone)]
pub struct MarkerHit {
    pub file: PathBuf,
    pub line: usize,
    pub marker: String,
}

impl VerificationFailure {
    pub fn feedback(&self) -> String {
        match self {
            Self::CommandFailed { cmd, exit_code, tail } => {
                format!("verification command `{cmd}` exited {exit_code}:\n{tail}")
            }
            Self::IncompleteMarkers(hits) => {
                let lines: Vec<String> = hits
                    .iter()
                    .map(|h| format!("{}:{}:{}", h.file.display(), h.line, h.marker))
                    .collect();
                format!("incomplete-work markers introduced:\n{}", lines.join("\n"))
            }
            Self::PatternOnlyUnderWalkaway => {
                "walkaway mode requires at least one execution-based verification, not just pattern checks"
                    .to_string()
            }
            Self::ManualVerificationDenied => "manual verification was denied".to_string(),
            Self::ManualVerificationTimedOut => {
                "manual verification timed out waiting for a supervisor decision".to_string()
            }
        }
    }
}

const TAIL_LINES: usize = 20;

/// Runs verification for a task that reported Complete (C7, spec.md §4.7).
///
/// `baseline` is the VCS mark captured before the task's first attempt;
/// incomplete-marker scanning only flags markers absent from that baseline.
pub async fn verify(
    task: &Task,
    cwd: &Path,
    config: &BrigadeConfig,
    vcs: &dyn VcsCollaborator,
    baseline: &VcsMark,
    walkaway: bool,
    manual_approver: &dyn ManualApprover,
) -> Result<(), VerificationFailure> {
    if walkaway && !task.verification.is_empty() && task.verification.iter().all(|v| v.is_pattern_only()) {
        return Err(VerificationFailure::PatternOnlyUnderWalkaway);
    }

    for spec in &task.verification {
        run_one(spec, cwd, config.verification_command_timeout).await?;
    }

    scan_for_incomplete_markers(vcs, baseline, config)?;

    if task.manual_verification {
        if walkaway {
            manual_approver.auto_approve(&task.id);
        } else if !manual_approver.request(&task.id, config.decision_gate_timeout).await {
            return Err(VerificationFailure::ManualVerificationTimedOut);
        }
    }

    Ok(())
}

async fn run_one(spec: &VerificationSpec, cwd: &Path, per_command_timeout: Duration) -> Result<(), VerificationFailure> {
    let run = async {
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&spec.cmd)
            .current_dir(cwd)
            .output()
            .await
    };

    let output = match timeout(per_command_timeout, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(VerificationFailure::CommandFailed {
                cmd: spec.cmd.clone(),
                exit_code: -1,
                tail: e.to_string(),
            })
        }
        Err(_) => {
            return Err(VerificationFailure::CommandFailed {
                cmd: spec.cmd.clone(),
                exit_code: -1,
                tail: "timed out".to_string(),
            })
        }
    };

    if output.status.success() {
        return Ok(());
    }

    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let tail: String = combined
        .lines()
        .rev()
        .take(TAIL_LINES)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("\n");

    Err(VerificationFailure::CommandFailed {
        cmd: spec.cmd.clone(),
        exit_code: output.status.code().unwrap_or(-1),
        tail,
    })
}

fn scan_for_incomplete_markers(
    vcs: &dyn VcsCollaborator,
    baseline: &VcsMark,
    config: &BrigadeConfig,
) -> Result<(), VerificationFailure> {
    let changed = vcs
        .files_changed_since(baseline)
        .map_err(|e| VerificationFailure::CommandFailed {
            cmd: "vcs files-changed".to_string(),
            exit_code: -1,
            tail: e.message,
        })?;

    let mut hits = Vec::new();
    for file in &changed {
        let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !config.marker_extensions.iter().any(|e| e == ext) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            for marker in &config.incomplete_markers {
                if line.contains(marker.as_str()) {
                    hits.push(MarkerHit {
                        file: file.clone(),
                        line: idx + 1,
                        marker: marker.clone(),
                    });
                }
            }
        }
    }

    if hits.is_empty() {
        Ok(())
    } else {
        Err(VerificationFailure::IncompleteMarkers(hits))
    }
}

/// The manual-verification gate's decision channel (spec.md §4.7.4). The
/// interactive path is implemented by the decision gate (C11); walkaway mode
/// never calls `request`.
#[async_trait::async_trait]
pub trait ManualApprover: Send + Sync {
    fn auto_approve(&self, task_id: &str);
    async fn request(&self, task_id: &str, timeout: Duration) -> bool;
}

/// No-op approver used when manual verification never occurs in a run
/// (tests, or plans with no `manualVerification` tasks).
pub struct NullApprover;

#[async_trait::async_trait]
impl ManualApprover for NullApprover {
    fn auto_approve(&self, task_id: &str) {
        warn!(task_id, "manual verification auto-approved with no recorder attached");
    }

    async fn request(&self, _task_id: &str, _timeout: Duration) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::{Complexity, VerificationKind};

    struct FakeVcs {
        changed: Vec<PathBuf>,
    }

    impl VcsCollaborator for FakeVcs {
        fn mark(&self) -> Result<VcsMark, BrigadeError> {
            Ok(VcsMark("fake".to_string()))
        }
        fn files_changed_since(&self, _baseline: &VcsMark) -> Result<Vec<PathBuf>, BrigadeError> {
            Ok(self.changed.clone())
        }
        fn diff_summary(&self, _baseline: &VcsMark) -> Result<String, BrigadeError> {
            Ok(String::new())
        }
    }

    fn base_task() -> Task {
        Task {
            id: "z".into(),
            title: "Z".into(),
            acceptance_criteria: vec![],
            depends_on: vec![],
            complexity: Complexity::Junior,
            passes: false,
            verification: vec![],
            manual_verification: false,
        }
    }

    #[tokio::test]
    async fn command_verification_passes_with_true() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = base_task();
        task.verification.push(VerificationSpec { kind: None, cmd: "true".into() });
        let vcs = FakeVcs { changed: vec![] };
        let baseline = vcs.mark().unwrap();
        let result = verify(
            &task,
            dir.path(),
            &BrigadeConfig::default(),
            &vcs,
            &baseline,
            false,
            &NullApprover,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn command_verification_fails_with_false() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = base_task();
        task.verification.push(VerificationSpec { kind: None, cmd: "false".into() });
        let vcs = FakeVcs { changed: vec![] };
        let baseline = vcs.mark().unwrap();
        let result = verify(
            &task,
            dir.path(),
            &BrigadeConfig::default(),
            &vcs,
            &baseline,
            false,
            &NullApprover,
        )
        .await;
        assert!(matches!(result, Err(VerificationFailure::CommandFailed { .. })));
    }

    #[tokio::test]
    async fn pattern_only_fails_under_walkaway() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = base_task();
        task.verification.push(VerificationSpec {
            kind: Some(VerificationKind::Pattern),
            cmd: "grep TODO src".into(),
        });
        let vcs = FakeVcs { changed: vec![] };
        let baseline = vcs.mark().unwrap();
        let result = verify(
            &task,
            dir.path(),
            &BrigadeConfig::default(),
            &vcs,
            &baseline,
            true,
            &NullApprover,
        )
        .await;
        assert!(matches!(result, Err(VerificationFailure::PatternOnlyUnderWalkaway)));
    }

    #[tokio::test]
    async fn incomplete_markers_fail_verification() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "fn x() {}\n// TODO finish this\n").unwrap();
        let task = base_task();
        let vcs = FakeVcs { changed: vec![file] };
        let baseline = vcs.mark().unwrap();
        let result = verify(
            &task,
            dir.path(),
            &BrigadeConfig::default(),
            &vcs,
            &baseline,
            false,
            &NullApprover,
        )
        .await;
        assert!(matches!(result, Err(VerificationFailure::IncompleteMarkers(_))));
    }
}
