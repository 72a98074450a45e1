use serde_json::{json, Value};

use crate::error::BrigadeError;
use crate::models::plan::Plan;
use crate::models::state::State;
use crate::scheduler::RunResult;

pub fn success(data: Value) -> Value {
    json!({
        "success": true,
        "data": data
    })
}

pub fn error(err: &BrigadeError) -> Value {
    json!({
        "success": false,
        "error": {
            "code": err.code.as_str(),
            "taskId": err.task_id,
            "remedy": err.remedy,
            "message": err.message
        }
    })
}

pub fn run_result(result: &RunResult) -> Value {
    match result {
        RunResult::AllComplete => json!({"outcome": "complete"}),
        RunResult::Incomplete { remaining } => json!({"outcome": "incomplete", "remaining": remaining}),
        RunResult::Aborted { reason } => json!({"outcome": "aborted", "reason": reason}),
    }
}

pub fn status_json(plan: &Plan, state: &State) -> Value {
    let done = plan.tasks.iter().filter(|t| t.passes).count();
    json!({
        "featureName": plan.feature_name,
        "branchName": plan.branch_name,
        "walkaway": plan.walkaway,
        "total": plan.tasks.len(),
        "done": done,
        "currentTask": state.current_task,
        "sessionId": state.session_id,
        "startedAt": state.started_at,
        "escalations": state.escalations.len(),
        "absorptions": state.absorptions.len(),
        "tasks": plan.tasks.iter().map(task_summary).collect::<Vec<_>>(),
    })
}

pub fn task_summary(t: &crate::models::plan::Task) -> Value {
    json!({
        "id": t.id,
        "title": t.title,
        "complexity": t.complexity,
        "passes": t.passes,
        "dependsOn": t.depends_on,
    })
}
