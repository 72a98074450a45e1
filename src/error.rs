use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    PlanLoad,
    StateCorrupt,
    LockTimeout,
    WorkerFailure,
    VerificationFailure,
    ReviewFailure,
    SupervisorIo,
    Cancelled,
    Invariant,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanLoad => "PLAN_LOAD",
            Self::StateCorrupt => "STATE_CORRUPT",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::WorkerFailure => "WORKER_FAILURE",
            Self::VerificationFailure => "VERIFICATION_FAILURE",
            Self::ReviewFailure => "REVIEW_FAILURE",
            Self::SupervisorIo => "SUPERVISOR_IO",
            Self::Cancelled => "CANCELLED",
            Self::Invariant => "INVARIANT",
        }
    }
}

/// An error classified per the core's error taxonomy (see SPEC_FULL.md §7).
///
/// Every user-visible message names the component (via `code`), the task id
/// (if any), and a one-line remedy.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BrigadeError {
    pub code: ErrorCode,
    pub task_id: Option<String>,
    pub remedy: Option<String>,
    pub message: String,
}

impl BrigadeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            task_id: None,
            remedy: None,
            message: message.into(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_remedy(mut self, remedy: impl Into<String>) -> Self {
        self.remedy = Some(remedy.into());
        self
    }

    pub fn plan_load(violations: &[String]) -> Self {
        Self::new(
            ErrorCode::PlanLoad,
            format!("plan failed to load: {}", violations.join("; ")),
        )
        .with_remedy("fix the listed violations in the plan file and retry")
    }

    pub fn state_corrupt(path: &str, cause: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::StateCorrupt,
            format!("state file {path} is unparseable: {}", cause.into()),
        )
        .with_remedy("a fresh state was recorded; the corrupt file was backed up alongside it")
    }

    pub fn lock_timeout(path: &str) -> Self {
        Self::new(
            ErrorCode::LockTimeout,
            format!("timed out acquiring lock for {path}"),
        )
        .with_remedy("another instance may be running; pass --force to break a stale lock")
    }

    pub fn worker_failure(task_id: &str, detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::WorkerFailure, detail.into())
            .with_task(task_id)
            .with_remedy("inspect the worker's captured output for the failing tier")
    }

    pub fn verification_failure(task_id: &str, detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::VerificationFailure, detail.into())
            .with_task(task_id)
            .with_remedy("the failure feedback will be included in the next attempt's prompt")
    }

    pub fn review_failure(task_id: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::ReviewFailure, reason.into())
            .with_task(task_id)
            .with_remedy("the review feedback will be included in the next attempt's prompt")
    }

    pub fn supervisor_io(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::SupervisorIo, detail.into())
            .with_remedy("supervisor I/O degrades to the mode default and is not fatal")
    }

    pub fn cancelled(task_id: &str) -> Self {
        Self::new(ErrorCode::Cancelled, "attempt cancelled").with_task(task_id)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invariant, message).with_remedy("this indicates a core bug; file a report")
    }
}

impl From<std::io::Error> for BrigadeError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorCode::StateCorrupt, e.to_string())
    }
}

impl From<serde_json::Error> for BrigadeError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorCode::StateCorrupt, e.to_string())
    }
}
