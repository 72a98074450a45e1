use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::plan::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Complete,
    Blocked,
    Skipped,
    Absorbed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub task_id: String,
    pub worker: Tier,
    pub status: HistoryStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approach: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationEntry {
    pub task_id: String,
    pub from: Tier,
    pub to: Tier,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbsorptionEntry {
    pub task_id: String,
    pub absorbed_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewResult {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub task_id: String,
    pub result: ReviewResult,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WalkawayDecisionKind {
    Retry,
    Skip,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkawayDecisionEntry {
    pub task_id: String,
    pub decision: WalkawayDecisionKind,
    pub reason: String,
    pub failure_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeDecisionEntry {
    pub task_id: String,
    pub question: String,
    pub decision: String,
    pub reason: String,
    pub reviewed_by_human: bool,
}

/// Durable per-plan state (spec.md §3 "State"). This is the sole payload of
/// the `.state` sidecar file written by the state store (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_start_time: DateTime<Utc>,
    pub current_task: Option<String>,
    #[serde(default)]
    pub task_history: Vec<TaskHistoryEntry>,
    #[serde(default)]
    pub escalations: Vec<EscalationEntry>,
    #[serde(default)]
    pub absorptions: Vec<AbsorptionEntry>,
    #[serde(default)]
    pub reviews: Vec<ReviewEntry>,
    #[serde(default)]
    pub phase_reviews: Vec<ReviewEntry>,
    #[serde(default)]
    pub walkaway_decisions: Vec<WalkawayDecisionEntry>,
    #[serde(default)]
    pub scope_decisions: Vec<ScopeDecisionEntry>,
}

impl State {
    pub fn fresh() -> Self {
        let now = Utc::now();
        Self {
            session_id: Ulid::new().to_string(),
            started_at: now,
            last_start_time: now,
            current_task: None,
            task_history: Vec::new(),
            escalations: Vec::new(),
            absorptions: Vec::new(),
            reviews: Vec::new(),
            phase_reviews: Vec::new(),
            walkaway_decisions: Vec::new(),
            scope_decisions: Vec::new(),
        }
    }

    /// Per-task counters derived from `escalations`/`task_history`, used by
    /// the escalation controller (C9) to resume mid-run bookkeeping.
    pub fn current_tier(&self, task_id: &str) -> Tier {
        self.escalations
            .iter()
            .filter(|e| e.task_id == task_id)
            .last()
            .map(|e| e.to)
            .unwrap_or(Tier::Junior)
    }

    pub fn iterations_at_current_tier(&self, task_id: &str) -> u32 {
        let tier = self.current_tier(task_id);
        let since = self
            .escalations
            .iter()
            .filter(|e| e.task_id == task_id && e.to == tier)
            .last()
            .map(|e| e.timestamp);

        self.task_history
            .iter()
            .filter(|h| h.task_id == task_id && h.worker == tier)
            .filter(|h| since.map(|s| h.timestamp >= s).unwrap_or(true))
            .count() as u32
    }

    pub fn consecutive_skips(&self) -> u32 {
        let mut count = 0;
        for d in self.walkaway_decisions.iter().rev() {
            if d.decision == WalkawayDecisionKind::Skip {
                count += 1;
            } else {
                break;
            }
        }
        count
    }
}
