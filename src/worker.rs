use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::CommandTemplate;
use crate::error::BrigadeError;
use crate::runner::process::{run_process_group, RunOutcome};

/// The result of one worker attempt: captured output, exit code, and timing
/// (spec.md §4.5's worker-runner output).
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub output: String,
    pub exit_code: i32,
    pub duration: Duration,
    pub crashed: bool,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl From<RunOutcome> for WorkerOutcome {
    fn from(o: RunOutcome) -> Self {
        Self {
            output: o.output,
            exit_code: o.exit_code,
            duration: o.duration,
            crashed: o.crashed,
            timed_out: o.timed_out,
            cancelled: o.cancelled,
        }
    }
}

/// Heterogeneous "worker" construct (SPEC_FULL.md §6.2, DESIGN NOTES §9):
/// a capability interface the router and escalation controller select by
/// tier, never talking to a process directly.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(
        &self,
        prompt: &str,
        cwd: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WorkerOutcome, BrigadeError>;
}

/// The sole concrete `Worker`: an opaque shell command template, with the
/// prompt delivered on stdin (spec.md §6).
pub struct ShellWorker {
    template: CommandTemplate,
    health_check_interval: Duration,
    termination_grace_period: Duration,
    crash_exit_code: i32,
    timeout_exit_code: i32,
}

impl ShellWorker {
    pub fn new(
        template: CommandTemplate,
        health_check_interval: Duration,
        termination_grace_period: Duration,
        crash_exit_code: i32,
        timeout_exit_code: i32,
    ) -> Self {
        Self {
            template,
            health_check_interval,
            termination_grace_period,
            crash_exit_code,
            timeout_exit_code,
        }
    }
}

#[async_trait]
impl Worker for ShellWorker {
    async fn execute(
        &self,
        prompt: &str,
        cwd: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WorkerOutcome, BrigadeError> {
        let outcome = run_process_group(
            &self.template.command,
            prompt,
            cwd,
            timeout,
            self.health_check_interval,
            self.termination_grace_period,
            self.crash_exit_code,
            self.timeout_exit_code,
            cancel,
        )
        .await?;
        Ok(outcome.into())
    }
}
