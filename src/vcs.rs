use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::BrigadeError;

/// An opaque point in version-control history, used as a baseline for
/// "files changed since" queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsMark(pub String);

/// The external VCS collaborator the verification and review engines
/// depend on (spec.md §6). The core does not implement VCS logic itself;
/// this trait is the narrow boundary that keeps it that way.
pub trait VcsCollaborator: Send + Sync {
    fn mark(&self) -> Result<VcsMark, BrigadeError>;
    fn files_changed_since(&self, baseline: &VcsMark) -> Result<Vec<PathBuf>, BrigadeError>;
    fn diff_summary(&self, baseline: &VcsMark) -> Result<String, BrigadeError>;
}

/// Shells out to `git`, grounded in the teacher's narrow single-purpose
/// repo modules (`db::connection::find_git_root`).
pub struct GitVcs {
    repo_root: PathBuf,
}

impl GitVcs {
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }

    fn run(&self, args: &[&str]) -> Result<String, BrigadeError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| BrigadeError::invariant(format!("failed to spawn git: {e}")))?;
        if !output.status.success() {
            return Err(BrigadeError::invariant(format!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl VcsCollaborator for GitVcs {
    fn mark(&self) -> Result<VcsMark, BrigadeError> {
        Ok(VcsMark(self.run(&["rev-parse", "HEAD"])?))
    }

    fn files_changed_since(&self, baseline: &VcsMark) -> Result<Vec<PathBuf>, BrigadeError> {
        let out = self.run(&["diff", "--name-only", &baseline.0])?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| self.repo_root.join(l))
            .collect())
    }

    fn diff_summary(&self, baseline: &VcsMark) -> Result<String, BrigadeError> {
        self.run(&["diff", "--stat", &baseline.0])
    }
}

/// Find the `.git` root by walking up from `start`, per the teacher's
/// `find_git_root` convention.
pub fn find_git_root(start: &Path) -> Result<PathBuf, BrigadeError> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(
                BrigadeError::invariant("not inside a git repository")
                    .with_remedy("run brigade from within a git working tree"),
            );
        }
    }
}
