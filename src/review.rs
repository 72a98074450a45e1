use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::BrigadeError;
use crate::models::plan::{Task, Tier};
use crate::vcs::{VcsCollaborator, VcsMark};
use crate::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub verdict: Verdict,
    pub reason: String,
}

/// Whether the review engine runs at all for a given attempt (spec.md §4.8,
/// resolving the "review-junior-only" ambiguity as "tier of the worker that
/// produced the current attempt", per spec.md §9).
pub fn should_review(review_enabled: bool, review_junior_only: bool, attempt_tier: Tier) -> bool {
    review_enabled && (!review_junior_only || attempt_tier == Tier::Junior)
}

/// Runs the executive-tier review of a completed task (C8).
pub async fn review(
    task: &Task,
    cwd: &Path,
    executive: &dyn Worker,
    timeout: Duration,
    vcs: &dyn VcsCollaborator,
    baseline: &VcsMark,
    cancel: &CancellationToken,
) -> Result<ReviewOutcome, BrigadeError> {
    let diff = vcs.diff_summary(baseline)?;
    let prompt = compose_review_prompt(task, &diff);

    let outcome = executive.execute(&prompt, cwd, timeout, cancel).await?;
    Ok(parse_verdict(&outcome.output))
}

fn compose_review_prompt(task: &Task, diff_summary: &str) -> String {
    let criteria = task
        .acceptance_criteria
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Review the following completed task.\n\nTask: {}\n\nAcceptance criteria:\n{criteria}\n\nChanges:\n{diff_summary}\n\nRespond with <verdict>PASS</verdict> or <verdict>FAIL</verdict> followed by <reason>...</reason>.",
        task.title,
    )
}

fn parse_verdict(output: &str) -> ReviewOutcome {
    let reason = extract_tag(output, "reason").unwrap_or_else(|| "no reason given".to_string());
    let verdict = match extract_tag(output, "verdict").as_deref() {
        Some("PASS") => Verdict::Pass,
        _ => Verdict::Fail,
    };
    ReviewOutcome { verdict, reason }
}

fn extract_tag(output: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = output.find(&open)?;
    let after = &output[start + open.len()..];
    let end = after.find(&close)?;
    Some(after[..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_review_respects_junior_only_flag() {
        assert!(should_review(true, false, Tier::Executive));
        assert!(should_review(true, true, Tier::Junior));
        assert!(!should_review(true, true, Tier::Senior));
        assert!(!should_review(false, false, Tier::Junior));
    }

    #[test]
    fn parses_pass_verdict() {
        let out = "<verdict>PASS</verdict><reason>meets criteria</reason>";
        let outcome = parse_verdict(out);
        assert_eq!(outcome.verdict, Verdict::Pass);
        assert_eq!(outcome.reason, "meets criteria");
    }

    #[test]
    fn parses_fail_verdict() {
        let out = "<verdict>FAIL</verdict><reason>missing edge case handling</reason>";
        let outcome = parse_verdict(out);
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.reason, "missing edge case handling");
    }

    #[test]
    fn missing_verdict_tag_defaults_to_fail() {
        let outcome = parse_verdict("no tags here");
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.reason, "no reason given");
    }
}
