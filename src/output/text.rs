use crate::models::plan::Plan;
use crate::models::state::State;
use crate::scheduler::RunResult;

pub fn print_plan_summary(plan: &Plan) {
    println!("Feature: {} ({})", plan.feature_name, plan.branch_name);
    if plan.walkaway {
        println!("  Mode: walkaway");
    }
    println!("  Tasks: {}", plan.tasks.len());
}

pub fn print_status(plan: &Plan, state: &State) {
    let done = plan.tasks.iter().filter(|t| t.passes).count();
    println!("Feature: {} ({})", plan.feature_name, plan.branch_name);
    println!("Progress: {done}/{}", plan.tasks.len());
    match &state.current_task {
        Some(id) => println!("Current task: {id}"),
        None => println!("Current task: (idle)"),
    }
    println!("Escalations: {}", state.escalations.len());
    println!("Absorptions: {}", state.absorptions.len());
    println!();
    for t in &plan.tasks {
        let marker = if t.passes { "x" } else { " " };
        println!("  [{marker}] {} {}", t.id, t.title);
    }
}

pub fn print_run_result(result: &RunResult) {
    match result {
        RunResult::AllComplete => println!("All tasks complete."),
        RunResult::Incomplete { remaining } => {
            println!("Incomplete; remaining tasks:");
            for id in remaining {
                println!("  {id}");
            }
        }
        RunResult::Aborted { reason } => println!("Aborted: {reason}"),
    }
}
