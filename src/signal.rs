use serde::{Deserialize, Serialize};

/// The terminal (or non-terminal) status extracted from a worker's captured
/// output (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Complete,
    AlreadyDone,
    AbsorbedBy(String),
    Blocked,
    NeedsIteration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Crash,
    Timeout,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crash => "crash",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedSignal {
    pub status: Option<SignalStatus>,
    pub learnings: Vec<String>,
    pub backlog: Vec<String>,
    pub approach: Option<String>,
    pub scope_questions: Vec<String>,
    pub error_category: Option<ErrorCategory>,
}

/// Scans captured worker output for tag markers (spec.md §4.6).
///
/// Priority when multiple `promise:` signals occur in the same output:
/// COMPLETE > ALREADY_DONE > ABSORBED_BY > BLOCKED > (none, i.e. NeedsIteration).
pub fn parse(output: &str, exit_code: i32, crash_exit_code: i32, timeout_exit_code: i32) -> ParsedSignal {
    let promises = extract_tag_contents(output, "promise");

    let status = if promises.iter().any(|p| p.trim() == "COMPLETE") {
        Some(SignalStatus::Complete)
    } else if promises.iter().any(|p| p.trim() == "ALREADY_DONE") {
        Some(SignalStatus::AlreadyDone)
    } else if let Some(abs) = promises.iter().find_map(|p| {
        p.trim()
            .strip_prefix("ABSORBED_BY:")
            .map(|id| id.trim().to_string())
    }) {
        Some(SignalStatus::AbsorbedBy(abs))
    } else if promises.iter().any(|p| p.trim() == "BLOCKED") {
        Some(SignalStatus::Blocked)
    } else {
        None
    };

    let (status, error_category) = match status {
        Some(s) => (s, None),
        None => {
            let category = if exit_code == crash_exit_code {
                Some(ErrorCategory::Crash)
            } else if exit_code == timeout_exit_code {
                Some(ErrorCategory::Timeout)
            } else {
                None
            };
            (SignalStatus::NeedsIteration, category)
        }
    };

    ParsedSignal {
        status: Some(status),
        learnings: extract_tag_contents(output, "learning"),
        backlog: extract_tag_contents(output, "backlog"),
        approach: extract_tag_contents(output, "approach").into_iter().last(),
        scope_questions: extract_tag_contents(output, "scope-question"),
        error_category,
    }
}

/// Extracts the text content of every `<tag>...</tag>` occurrence, in order.
fn extract_tag_contents(output: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut results = Vec::new();
    let mut rest = output;
    while let Some(start) = rest.find(&open) {
        let after_open = &rest[start + open.len()..];
        match after_open.find(&close) {
            Some(end) => {
                results.push(after_open[..end].trim().to_string());
                rest = &after_open[end + close.len()..];
            }
            None => break,
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_wins_over_blocked() {
        let out = "<promise>BLOCKED</promise> then <promise>COMPLETE</promise>";
        let parsed = parse(out, 0, 125, 124);
        assert_eq!(parsed.status, Some(SignalStatus::Complete));
    }

    #[test]
    fn absorbed_by_captures_task_id() {
        let out = "<promise>ABSORBED_BY:task-1</promise>";
        let parsed = parse(out, 0, 125, 124);
        assert_eq!(parsed.status, Some(SignalStatus::AbsorbedBy("task-1".into())));
    }

    #[test]
    fn no_signal_with_crash_exit_code_is_needs_iteration_with_category() {
        let parsed = parse("no markers here", 125, 125, 124);
        assert_eq!(parsed.status, Some(SignalStatus::NeedsIteration));
        assert_eq!(parsed.error_category, Some(ErrorCategory::Crash));
    }

    #[test]
    fn no_signal_with_timeout_exit_code() {
        let parsed = parse("no markers here", 124, 125, 124);
        assert_eq!(parsed.error_category, Some(ErrorCategory::Timeout));
    }

    #[test]
    fn extracts_learnings_backlog_approach_scope_questions() {
        let out = "\
<learning>use the builder pattern</learning>
<backlog>add caching later</backlog>
<approach>tried A</approach>
<approach>tried B</approach>
<scope-question>should X include Y?</scope-question>
<promise>COMPLETE</promise>";
        let parsed = parse(out, 0, 125, 124);
        assert_eq!(parsed.learnings, vec!["use the builder pattern"]);
        assert_eq!(parsed.backlog, vec!["add caching later"]);
        assert_eq!(parsed.approach.as_deref(), Some("tried B"));
        assert_eq!(parsed.scope_questions, vec!["should X include Y?"]);
    }

    #[test]
    fn no_markers_is_needs_iteration_without_category() {
        let parsed = parse("plain text", 0, 125, 124);
        assert_eq!(parsed.status, Some(SignalStatus::NeedsIteration));
        assert_eq!(parsed.error_category, None);
    }
}
