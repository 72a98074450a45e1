use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BrigadeConfig;
use crate::decision::{DecisionAction, DecisionGate};
use crate::error::BrigadeError;
use crate::escalate::{self, Decision as EscalationDecision};
use crate::events::{EventEmitter, StatusSnapshot};
use crate::models::plan::{Plan, Tier};
use crate::models::state::{HistoryStatus, ReviewResult, ScopeDecisionEntry, WalkawayDecisionKind};
use crate::review::{self, Verdict};
use crate::router;
use crate::signal::{self, SignalStatus};
use crate::store::StateStore;
use crate::verify::{self, ManualApprover, VerificationFailure};
use crate::vcs::{GitVcs, VcsCollaborator, VcsMark};
use crate::worker::Worker;

/// Per-invocation filter sets interpreted over the topological order
/// (spec.md §4.10): filtered-out tasks are treated as satisfied but never
/// mutated.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub only: Option<HashSet<String>>,
    pub skip: HashSet<String>,
    pub from: Option<String>,
    pub until: Option<String>,
}

impl TaskFilter {
    pub fn filtered_out(&self, order: &[String]) -> HashSet<String> {
        let mut excluded = HashSet::new();

        if let Some(only) = &self.only {
            for id in order {
                if !only.contains(id) {
                    excluded.insert(id.clone());
                }
            }
        }
        for id in &self.skip {
            excluded.insert(id.clone());
        }

        if self.from.is_some() || self.until.is_some() {
            let mut active = self.from.is_none();
            for id in order {
                if Some(id) == self.from.as_ref() {
                    active = true;
                }
                if !active {
                    excluded.insert(id.clone());
                }
                if Some(id) == self.until.as_ref() {
                    active = false;
                }
            }
        }

        excluded
    }
}

/// Per-tier worker set the scheduler dispatches into, keyed by tier.
pub struct WorkerPool {
    pub junior: Arc<dyn Worker>,
    pub senior: Arc<dyn Worker>,
    pub executive: Arc<dyn Worker>,
}

impl WorkerPool {
    pub fn for_tier(&self, tier: Tier) -> Arc<dyn Worker> {
        match tier {
            Tier::Junior => self.junior.clone(),
            Tier::Senior => self.senior.clone(),
            Tier::Executive => self.executive.clone(),
        }
    }
}

/// Outcome of the whole scheduler run (spec.md §4.10's final report).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    AllComplete,
    Incomplete { remaining: Vec<String> },
    Aborted { reason: String },
}

struct AttemptResult {
    task_id: String,
    tier: Tier,
    signal: signal::ParsedSignal,
    verification_feedback: Option<String>,
    review_feedback: Option<String>,
    learnings: Vec<String>,
    backlog: Vec<String>,
    scope_questions: Vec<String>,
    /// The attempt was cut short by `CancellationToken`, not by the worker's
    /// own signal. Cancelled attempts never reach escalation bookkeeping or
    /// `task_history` (spec.md §9: cancellation is non-terminal and does not
    /// count toward a tier's iterations).
    cancelled: bool,
}

/// The main loop (C10, spec.md §4.10): picks ready tasks bounded by
/// `maxParallel`, dispatches attempts, and feeds outcomes back through
/// verification, review, escalation, and the decision gate.
pub struct Scheduler {
    plan: Plan,
    plan_path: PathBuf,
    cwd: PathBuf,
    config: BrigadeConfig,
    store: StateStore,
    events: EventEmitter,
    workers: WorkerPool,
    vcs: Arc<dyn VcsCollaborator>,
    filter: TaskFilter,
    cancel: CancellationToken,
    command_file: Option<PathBuf>,
    /// Most recent verification/review failure text per task, fed back into
    /// that task's next retry prompt (spec.md §4.7/§4.9, Scenario 5 §8).
    task_feedback: HashMap<String, String>,
    /// Advisory notes workers reported via `<learnings>`, carried across
    /// tasks for the remainder of the run (spec.md §4.7).
    learnings: Vec<String>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan: Plan,
        plan_path: PathBuf,
        cwd: PathBuf,
        config: BrigadeConfig,
        store: StateStore,
        events: EventEmitter,
        workers: WorkerPool,
        vcs: Arc<dyn VcsCollaborator>,
        filter: TaskFilter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            plan,
            plan_path,
            cwd,
            config,
            store,
            events,
            workers,
            vcs,
            filter,
            cancel,
            command_file: None,
            task_feedback: HashMap::new(),
            learnings: Vec::new(),
        }
    }

    pub fn with_command_file(mut self, command_file: Option<PathBuf>) -> Self {
        self.command_file = command_file;
        self
    }

    pub async fn run(&mut self) -> Result<RunResult, BrigadeError> {
        let order = self.plan.topological_order();
        let filtered_out = self.filter.filtered_out(&order);
        let total = order.iter().filter(|id| !filtered_out.contains(*id)).count();

        self.events.service_start(total);
        let start = Instant::now();

        let mut in_flight: HashSet<String> = HashSet::new();
        let mut in_flight_tier: HashMap<String, Tier> = HashMap::new();
        let mut baselines: HashMap<String, VcsMark> = HashMap::new();
        let (tx, mut rx) = mpsc::channel::<AttemptResult>(self.config.max_parallel.max(1));

        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunResult::Aborted { reason: "cancelled".to_string() });
            }

            let ready = crate::graph::ready::ready(&self.plan, &in_flight, &filtered_out);
            while in_flight.len() < self.config.max_parallel && !ready.is_empty() {
                let Some(task_id) = ready.iter().find(|id| !in_flight.contains(*id)).cloned() else {
                    break;
                };
                in_flight.insert(task_id.clone());
                self.store.set_current_task(Some(&task_id))?;

                let baseline = self.vcs.mark()?;
                baselines.insert(task_id.clone(), baseline);

                let tier = self.current_tier_for(&task_id)?;
                in_flight_tier.insert(task_id.clone(), tier);
                self.dispatch(task_id, tier, tx.clone());

                if in_flight.len() >= self.config.max_parallel {
                    break;
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let Some(result) = rx.recv().await else {
                break;
            };
            in_flight.remove(&result.task_id);
            in_flight_tier.remove(&result.task_id);
            let baseline = baselines.get(&result.task_id).cloned().unwrap_or(VcsMark(String::new()));
            self.process_outcome(result, &baseline).await?;

            let done = self.plan.tasks.iter().filter(|t| t.passes).count();
            let current = in_flight.iter().next().cloned();
            let worker = current.as_ref().and_then(|id| in_flight_tier.get(id)).map(|t| t.as_str().to_string());
            self.events.write_status(&StatusSnapshot {
                prd: self.plan.feature_name.clone(),
                done,
                total,
                current,
                worker,
                elapsed: start.elapsed().as_secs(),
                attention: false,
                reason: None,
            });
        }

        self.store.set_current_task(None)?;
        let done = self.plan.tasks.iter().filter(|t| t.passes).count();
        self.events.service_complete(done, total);

        let remaining: Vec<String> = order
            .into_iter()
            .filter(|id| !filtered_out.contains(id))
            .filter(|id| !self.plan.task(id).map(|t| t.passes).unwrap_or(true))
            .collect();

        if remaining.is_empty() {
            Ok(RunResult::AllComplete)
        } else {
            Ok(RunResult::Incomplete { remaining })
        }
    }

    fn current_tier_for(&self, task_id: &str) -> Result<Tier, BrigadeError> {
        let state = self.store.load()?;
        let tier = state.current_tier(task_id);
        if state
            .escalations
            .iter()
            .any(|e| e.task_id == task_id)
        {
            Ok(tier)
        } else {
            let task = self
                .plan
                .task(task_id)
                .ok_or_else(|| BrigadeError::invariant(format!("unknown task {task_id}")))?;
            Ok(router::route(task))
        }
    }

    fn dispatch(&self, task_id: String, tier: Tier, tx: mpsc::Sender<AttemptResult>) {
        let worker = self.workers.for_tier(tier);
        let task = self.plan.task(&task_id).cloned();
        let cwd = self.cwd.clone();
        let timeout = self.config.tier_timeout(tier);
        let crash = self.config.crash_exit_code;
        let to_code = self.config.timeout_exit_code;
        let cancel = self.cancel.clone();
        let feedback = self.task_feedback.get(&task_id).cloned();
        let learnings = self.learnings.clone();

        self.events.task_start(&task_id, tier.as_str());

        tokio::spawn(async move {
            let Some(task) = task else { return };
            let prompt = compose_prompt(&task, feedback.as_deref(), &learnings);
            let outcome = worker.execute(&prompt, &cwd, timeout, &cancel).await;

            let result = match outcome {
                Ok(outcome) if outcome.cancelled => AttemptResult {
                    task_id: task_id.clone(),
                    tier,
                    signal: signal::ParsedSignal::default(),
                    verification_feedback: None,
                    review_feedback: None,
                    learnings: Vec::new(),
                    backlog: Vec::new(),
                    scope_questions: Vec::new(),
                    cancelled: true,
                },
                Ok(outcome) => {
                    let parsed = signal::parse(&outcome.output, outcome.exit_code, crash, to_code);
                    AttemptResult {
                        task_id: task_id.clone(),
                        tier,
                        learnings: parsed.learnings.clone(),
                        backlog: parsed.backlog.clone(),
                        scope_questions: parsed.scope_questions.clone(),
                        signal: parsed,
                        verification_feedback: None,
                        review_feedback: None,
                        cancelled: false,
                    }
                }
                Err(e) => AttemptResult {
                    task_id: task_id.clone(),
                    tier,
                    signal: signal::ParsedSignal {
                        status: Some(SignalStatus::NeedsIteration),
                        error_category: None,
                        ..Default::default()
                    },
                    verification_feedback: Some(e.message),
                    review_feedback: None,
                    learnings: Vec::new(),
                    backlog: Vec::new(),
                    scope_questions: Vec::new(),
                    cancelled: false,
                },
            };
            let _ = tx.send(result).await;
        });
    }

    async fn process_outcome(&mut self, result: AttemptResult, baseline: &VcsMark) -> Result<(), BrigadeError> {
        let task_id = result.task_id.clone();
        let tier = result.tier;

        if result.cancelled {
            // Non-terminal by definition: leave currentTask set so a resumed
            // run retries the same task at the same tier, and don't touch
            // task_history or the escalation counters.
            return Ok(());
        }

        for learning in &result.learnings {
            info!(task_id = %task_id, learning, "worker reported a learning");
            if !self.learnings.contains(learning) {
                self.learnings.push(learning.clone());
            }
        }
        for item in &result.backlog {
            info!(task_id = %task_id, item, "worker deferred a backlog item");
        }

        if self.handle_scope_questions(&task_id, &result.scope_questions).await? {
            return Ok(());
        }

        match result.signal.status.clone() {
            Some(SignalStatus::Complete) => self.handle_complete(&task_id, tier, baseline).await,
            Some(SignalStatus::AlreadyDone) => {
                self.store.mark_complete(&task_id)?;
                if let Some(t) = self.plan.task_mut(&task_id) {
                    t.passes = true;
                }
                self.store.add_task_history(&task_id, tier, HistoryStatus::Complete, None, None)?;
                self.events.task_complete(&task_id);
                self.task_feedback.remove(&task_id);
                Ok(())
            }
            Some(SignalStatus::AbsorbedBy(absorbed_by)) => {
                self.handle_absorbed(&task_id, &absorbed_by, tier).await
            }
            Some(SignalStatus::Blocked) => self.handle_non_terminal(&task_id, tier, false, true).await,
            Some(SignalStatus::NeedsIteration) | None => {
                let timed_out = matches!(result.signal.error_category, Some(signal::ErrorCategory::Timeout));
                self.handle_non_terminal(&task_id, tier, timed_out, false).await
            }
        }
    }

    /// Routes worker-raised scope questions through the decision gate
    /// (spec.md §4.11: walkaway mode resolves them itself with a
    /// scope-tailored prompt; interactive mode surfaces them to the
    /// supervisor and pauses). Returns `true` if the caller should stop
    /// processing this attempt further (the task paused on a question).
    async fn handle_scope_questions(&mut self, task_id: &str, questions: &[String]) -> Result<bool, BrigadeError> {
        if questions.is_empty() {
            return Ok(false);
        }

        if self.plan.walkaway {
            let task = self
                .plan
                .task(task_id)
                .cloned()
                .ok_or_else(|| BrigadeError::invariant(format!("unknown task {task_id}")))?;
            let executive = self.workers.for_tier(Tier::Executive);
            for question in questions {
                let prompt = compose_scope_prompt(&task, question);
                let outcome = executive
                    .execute(&prompt, &self.cwd, self.config.tier_timeout(Tier::Executive), &self.cancel)
                    .await?;
                let (decision, reason) = parse_scope_reply(&outcome.output);
                self.store.record_scope_decision(ScopeDecisionEntry {
                    task_id: task_id.to_string(),
                    question: question.clone(),
                    decision: decision.clone(),
                    reason,
                    reviewed_by_human: false,
                })?;
                self.events.scope_decision(task_id, question, &decision);
            }
            Ok(false)
        } else {
            for question in questions {
                self.store.record_scope_decision(ScopeDecisionEntry {
                    task_id: task_id.to_string(),
                    question: question.clone(),
                    decision: "pending".to_string(),
                    reason: "awaiting supervisor review".to_string(),
                    reviewed_by_human: false,
                })?;
                self.events.scope_decision(task_id, question, "pending");
            }
            self.events.attention("paused: worker raised a scope question");
            Ok(true)
        }
    }

    async fn handle_complete(&mut self, task_id: &str, tier: Tier, baseline: &VcsMark) -> Result<(), BrigadeError> {
        let task = self
            .plan
            .task(task_id)
            .cloned()
            .ok_or_else(|| BrigadeError::invariant(format!("unknown task {task_id}")))?;

        let verification = verify::verify(
            &task,
            &self.cwd,
            &self.config,
            self.vcs.as_ref(),
            baseline,
            self.plan.walkaway,
            &crate::verify::NullApprover,
        )
        .await;

        if let Err(failure) = verification {
            self.store
                .add_task_history(task_id, tier, HistoryStatus::Blocked, None, Some("verification".to_string()))?;
            return self
                .handle_non_terminal_with_feedback(task_id, tier, false, false, failure.feedback())
                .await;
        }

        if review::should_review(self.config.review_enabled, self.config.review_junior_only, tier) {
            let executive = self.workers.for_tier(Tier::Executive);
            let outcome = review::review(
                &task,
                &self.cwd,
                executive.as_ref(),
                self.config.tier_timeout(Tier::Executive),
                self.vcs.as_ref(),
                baseline,
                &self.cancel,
            )
            .await?;

            self.store.record_review(
                task_id,
                if outcome.verdict == Verdict::Pass { ReviewResult::Pass } else { ReviewResult::Fail },
                &outcome.reason,
            )?;
            self.events.review(task_id, if outcome.verdict == Verdict::Pass { "PASS" } else { "FAIL" }, &outcome.reason);

            if outcome.verdict == Verdict::Fail {
                return self
                    .handle_non_terminal_with_feedback(task_id, tier, false, false, outcome.reason)
                    .await;
            }
        }

        self.store.mark_complete(task_id)?;
        if let Some(t) = self.plan.task_mut(task_id) {
            t.passes = true;
        }
        self.store.add_task_history(task_id, tier, HistoryStatus::Complete, None, None)?;
        self.events.task_complete(task_id);
        self.task_feedback.remove(task_id);
        Ok(())
    }

    async fn handle_absorbed(&mut self, task_id: &str, absorbed_by: &str, tier: Tier) -> Result<(), BrigadeError> {
        let referent_known = self.plan.task(absorbed_by).is_some();
        if !referent_known {
            return self
                .handle_non_terminal_with_feedback(
                    task_id,
                    tier,
                    false,
                    false,
                    format!("ABSORBED_BY referenced unknown task {absorbed_by}"),
                )
                .await;
        }

        self.store.record_absorption(task_id, absorbed_by)?;
        self.store.mark_complete(task_id)?;
        if let Some(t) = self.plan.task_mut(task_id) {
            t.passes = true;
        }
        self.store.add_task_history(task_id, tier, HistoryStatus::Absorbed, None, None)?;
        self.events.task_complete(task_id);
        self.task_feedback.remove(task_id);
        Ok(())
    }

    async fn handle_non_terminal(
        &mut self,
        task_id: &str,
        tier: Tier,
        timed_out: bool,
        blocked: bool,
    ) -> Result<(), BrigadeError> {
        self.handle_non_terminal_with_feedback(task_id, tier, timed_out, blocked, String::new())
            .await
    }

    async fn handle_non_terminal_with_feedback(
        &mut self,
        task_id: &str,
        tier: Tier,
        timed_out: bool,
        blocked: bool,
        feedback: String,
    ) -> Result<(), BrigadeError> {
        let state = self.store.load()?;
        let decision = escalate::decide(&state, task_id, tier, &self.config, timed_out, blocked);

        if feedback.is_empty() {
            self.task_feedback.remove(task_id);
        } else {
            info!(task_id, feedback = %feedback, "carrying failure feedback into the next attempt");
            self.task_feedback.insert(task_id.to_string(), feedback);
        }

        self.store.add_task_history(
            task_id,
            tier,
            HistoryStatus::Blocked,
            None,
            if timed_out { Some("timeout".to_string()) } else { None },
        )?;

        match decision {
            EscalationDecision::Retry => Ok(()),
            EscalationDecision::Promote(next) => {
                let reason = escalate::trigger_reason(timed_out, blocked, true);
                self.store.record_escalation(task_id, tier, next, reason)?;
                self.events.escalation(task_id, tier.as_str(), next.as_str(), reason);
                Ok(())
            }
            EscalationDecision::DecisionGate => self.run_decision_gate(task_id, tier).await,
        }
    }

    async fn run_decision_gate(&mut self, task_id: &str, _tier: Tier) -> Result<(), BrigadeError> {
        let state = self.store.load()?;
        let consecutive_skips = state.consecutive_skips();

        let action = if self.plan.walkaway {
            let task = self
                .plan
                .task(task_id)
                .cloned()
                .ok_or_else(|| BrigadeError::invariant(format!("unknown task {task_id}")))?;
            let executive = self.workers.for_tier(Tier::Executive);
            let prompt = compose_decision_prompt(&task);
            let gate = DecisionGate::new(
                None,
                self.config.supervisor_poll_interval,
                self.config.decision_gate_timeout,
                &self.events,
            );
            let (action, reason, kind) = gate
                .ask_walkaway(
                    task_id,
                    &prompt,
                    &self.cwd,
                    executive.as_ref(),
                    self.config.tier_timeout(Tier::Executive),
                    consecutive_skips,
                    self.config.consecutive_skip_limit,
                    &self.cancel,
                )
                .await?;
            self.store
                .record_walkaway_decision(task_id, kind, &reason, "persistent escalation at executive tier")?;
            action
        } else {
            let gate = DecisionGate::new(
                self.command_file.clone(),
                self.config.supervisor_poll_interval,
                self.config.decision_gate_timeout,
                &self.events,
            );
            let decision = gate
                .ask_interactive(task_id, "persistent escalation at executive tier", &self.cancel)
                .await;
            let kind = match decision.action {
                DecisionAction::Retry(_) => WalkawayDecisionKind::Retry,
                DecisionAction::Skip => WalkawayDecisionKind::Skip,
                DecisionAction::Abort | DecisionAction::Pause => WalkawayDecisionKind::Abort,
            };
            self.store
                .record_walkaway_decision(task_id, kind, &decision.reason, "persistent escalation at executive tier")?;
            decision.action
        };

        match action {
            DecisionAction::Retry(_) => Ok(()),
            DecisionAction::Skip => {
                self.store
                    .add_task_history(task_id, Tier::Executive, HistoryStatus::Skipped, None, None)?;
                Ok(())
            }
            DecisionAction::Abort => Err(BrigadeError::invariant(format!(
                "decision gate aborted on task {task_id}"
            ))
            .with_task(task_id)),
            DecisionAction::Pause => {
                self.events.attention("paused awaiting supervisor decision");
                Ok(())
            }
        }
    }
}

fn compose_prompt(task: &crate::models::plan::Task, feedback: Option<&str>, learnings: &[String]) -> String {
    let criteria = task
        .acceptance_criteria
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    let mut prompt = format!("Task: {}\n\nAcceptance criteria:\n{criteria}\n", task.title);

    if let Some(feedback) = feedback {
        prompt.push_str(&format!("\nFeedback from the previous attempt:\n{feedback}\n"));
    }
    if !learnings.is_empty() {
        let notes = learnings.iter().map(|l| format!("- {l}")).collect::<Vec<_>>().join("\n");
        prompt.push_str(&format!("\nLearnings carried over from earlier tasks:\n{notes}\n"));
    }

    prompt
}

fn compose_decision_prompt(task: &crate::models::plan::Task) -> String {
    format!(
        "Task \"{}\" has escalated through every tier without completing. Decide RETRY, SKIP, or ABORT.\nRespond with <decision>...</decision><reason>...</reason>.",
        task.title
    )
}

fn compose_scope_prompt(task: &crate::models::plan::Task, question: &str) -> String {
    format!(
        "Task \"{}\" raised a scope question: {question}\nDecide how to proceed.\nRespond with <decision>...</decision><reason>...</reason>.",
        task.title
    )
}

fn parse_scope_reply(output: &str) -> (String, String) {
    let reason = extract_tag(output, "reason").unwrap_or_else(|| "no reason given".to_string());
    let decision = extract_tag(output, "decision").unwrap_or_else(|| "proceed as scoped".to_string());
    (decision, reason)
}

fn extract_tag(output: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = output.find(&open)?;
    let after = &output[start + open.len()..];
    let end = after.find(&close)?;
    Some(after[..end].trim().to_string())
}

/// Convenience constructor used by the CLI (src/cli) to assemble a scheduler
/// from a plan file path and config, defaulting the VCS collaborator to git.
pub async fn build_default(
    plan_path: &Path,
    filter: TaskFilter,
    workers: WorkerPool,
    cancel: CancellationToken,
) -> Result<Scheduler, BrigadeError> {
    let plan = Plan::load_file(plan_path)?;
    let config = BrigadeConfig::load(plan_path)?;
    let cwd = crate::vcs::find_git_root(plan_path.parent().unwrap_or_else(|| Path::new(".")))?;
    let store = StateStore::new(plan_path, config.clone());
    let events = EventEmitter::disabled();
    let vcs: Arc<dyn VcsCollaborator> = Arc::new(GitVcs::new(cwd.clone()));

    Ok(Scheduler::new(
        plan,
        plan_path.to_path_buf(),
        cwd,
        config,
        store,
        events,
        workers,
        vcs,
        filter,
        cancel,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_only_excludes_everything_else() {
        let filter = TaskFilter {
            only: Some(["b".to_string()].into_iter().collect()),
            ..Default::default()
        };
        let order = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let excluded = filter.filtered_out(&order);
        assert!(excluded.contains("a"));
        assert!(!excluded.contains("b"));
        assert!(excluded.contains("c"));
    }

    #[test]
    fn filter_from_until_bounds_a_window() {
        let filter = TaskFilter {
            from: Some("b".to_string()),
            until: Some("b".to_string()),
            ..Default::default()
        };
        let order = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let excluded = filter.filtered_out(&order);
        assert!(excluded.contains("a"));
        assert!(!excluded.contains("b"));
        assert!(excluded.contains("c"));
    }
}
