use std::collections::HashSet;

use crate::models::plan::Plan;

/// Returns every task with `passes=false`, not currently in flight, and with
/// all dependencies satisfied, in stable topological order (spec.md §4.3).
///
/// `in_flight` and `filtered_out` are excluded from the result; `filtered_out`
/// tasks are otherwise treated as satisfied dependencies for readiness
/// purposes (spec.md §4.10's {only, skip, from, until} filters).
pub fn ready(plan: &Plan, in_flight: &HashSet<String>, filtered_out: &HashSet<String>) -> Vec<String> {
    plan.topological_order()
        .into_iter()
        .filter(|id| {
            let task = match plan.task(id) {
                Some(t) => t,
                None => return false,
            };
            !task.passes
                && !in_flight.contains(id)
                && !filtered_out.contains(id)
                && dependencies_satisfied(plan, id, filtered_out)
        })
        .collect()
}

fn dependencies_satisfied(plan: &Plan, id: &str, filtered_out: &HashSet<String>) -> bool {
    match plan.task(id) {
        None => false,
        Some(t) => t.depends_on.iter().all(|dep| {
            filtered_out.contains(dep)
                || plan.task(dep).map(|d| d.passes).unwrap_or(false)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::Plan;

    #[test]
    fn ready_respects_dependencies_and_in_flight() {
        let plan = Plan::load_str(
            r#"{"featureName":"f","branchName":"b","tasks":[
                {"id":"a","title":"A","complexity":"junior"},
                {"id":"b","title":"B","complexity":"junior","dependsOn":["a"]}
            ]}"#,
        )
        .unwrap();

        let in_flight = HashSet::new();
        let filtered = HashSet::new();
        assert_eq!(ready(&plan, &in_flight, &filtered), vec!["a"]);

        let mut plan2 = plan.clone();
        plan2.task_mut("a").unwrap().passes = true;
        assert_eq!(ready(&plan2, &in_flight, &filtered), vec!["b"]);

        let mut in_flight2 = HashSet::new();
        in_flight2.insert("b".to_string());
        assert!(ready(&plan2, &in_flight2, &filtered).is_empty());
    }

    #[test]
    fn filtered_out_tasks_count_as_satisfied() {
        let plan = Plan::load_str(
            r#"{"featureName":"f","branchName":"b","tasks":[
                {"id":"a","title":"A","complexity":"junior"},
                {"id":"b","title":"B","complexity":"junior","dependsOn":["a"]}
            ]}"#,
        )
        .unwrap();
        let in_flight = HashSet::new();
        let mut filtered = HashSet::new();
        filtered.insert("a".to_string());
        assert_eq!(ready(&plan, &in_flight, &filtered), vec!["b"]);
    }
}
