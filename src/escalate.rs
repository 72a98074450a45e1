use crate::config::BrigadeConfig;
use crate::models::plan::Tier;
use crate::models::state::State;

/// A reason an attempt counts against the escalation controller (C9,
/// spec.md §4.9). `Cancelled` attempts never reach here — spec.md §9
/// resolves that cancelled attempts do not count toward iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ThresholdReached,
    Timeout,
    Blocked,
}

/// What the escalation controller decided after one failed/non-terminal
/// attempt at `tier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Stay at the same tier; iterate again.
    Retry,
    /// Promote to the given tier.
    Promote(Tier),
    /// Already at executive and triggered again: escalate to the decision gate.
    DecisionGate,
}

/// Decides whether a task should iterate, promote, or fall to the decision
/// gate, given the iteration count just observed at `tier` (not yet
/// incremented in `state`) and whether the runner/parser raised a timeout or
/// blocked trigger this attempt.
pub fn decide(
    state: &State,
    task_id: &str,
    tier: Tier,
    config: &BrigadeConfig,
    timed_out: bool,
    blocked: bool,
) -> Decision {
    let iterations = state.iterations_at_current_tier(task_id) + 1;

    let triggered = timed_out
        || blocked
        || config
            .tier_threshold(tier)
            .map(|threshold| iterations >= threshold)
            .unwrap_or(false);

    if !triggered {
        return Decision::Retry;
    }

    match tier.next() {
        Some(next) => Decision::Promote(next),
        None => Decision::DecisionGate,
    }
}

pub fn trigger_reason(timed_out: bool, blocked: bool, threshold_reached: bool) -> &'static str {
    if timed_out {
        "worker runner reported timeout at current tier"
    } else if blocked {
        "signal parser returned Blocked"
    } else if threshold_reached {
        "iteration threshold at current tier reached"
    } else {
        "retry"
    }
}
