use crate::models::plan::{Complexity, Task, Tier};

const AUTO_JUNIOR_KEYWORDS: &[&str] = &["test", "boilerplate", "simple"];

/// Chooses the initial worker tier for a task from its declared complexity
/// (spec.md §4.4). Stateless: escalation (C9), not the router, promotes a
/// task to a higher tier during execution.
pub fn route(task: &Task) -> Tier {
    match task.complexity {
        Complexity::Junior => Tier::Junior,
        Complexity::Senior => Tier::Senior,
        Complexity::Auto => {
            let title = task.title.to_lowercase();
            // "add … flag" is one combined phrase (e.g. "add a --verbose
            // flag"), not two independent keywords: bare "add" is too common
            // a word to route junior on its own.
            let matches_keyword = AUTO_JUNIOR_KEYWORDS.iter().any(|kw| title.contains(kw))
                || (title.contains("add") && title.contains("flag"));
            if matches_keyword || task.acceptance_criteria.len() <= 3 {
                Tier::Junior
            } else {
                Tier::Senior
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::VerificationSpec;

    fn task(title: &str, complexity: Complexity, criteria: usize) -> Task {
        Task {
            id: "t".into(),
            title: title.into(),
            acceptance_criteria: (0..criteria).map(|i| format!("criterion {i}")).collect(),
            depends_on: vec![],
            complexity,
            passes: false,
            verification: Vec::<VerificationSpec>::new(),
            manual_verification: false,
        }
    }

    #[test]
    fn junior_and_senior_are_explicit() {
        assert_eq!(route(&task("anything", Complexity::Junior, 10)), Tier::Junior);
        assert_eq!(route(&task("anything", Complexity::Senior, 0)), Tier::Senior);
    }

    #[test]
    fn auto_routes_junior_by_keyword() {
        assert_eq!(
            route(&task("Add a feature flag", Complexity::Auto, 10)),
            Tier::Junior
        );
        assert_eq!(
            route(&task("Write a unit test", Complexity::Auto, 10)),
            Tier::Junior
        );
    }

    #[test]
    fn auto_routes_junior_by_small_criteria_count() {
        assert_eq!(
            route(&task("Refactor the gateway", Complexity::Auto, 2)),
            Tier::Junior
        );
    }

    #[test]
    fn auto_routes_senior_otherwise() {
        assert_eq!(
            route(&task("Redesign the distributed consensus layer", Complexity::Auto, 8)),
            Tier::Senior
        );
    }
}
