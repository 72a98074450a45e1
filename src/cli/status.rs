use std::path::Path;

use crate::config::BrigadeConfig;
use crate::error::BrigadeError;
use crate::models::plan::Plan;
use crate::output;
use crate::store::StateStore;

pub fn run(plan_path: &Path, json_output: bool) -> i32 {
    match run_inner(plan_path, json_output) {
        Ok(code) => code,
        Err(e) => {
            if json_output {
                println!("{}", serde_json::to_string_pretty(&output::json::error(&e)).unwrap());
            } else {
                eprintln!("Error: {}", e.message);
            }
            1
        }
    }
}

fn run_inner(plan_path: &Path, json_output: bool) -> Result<i32, BrigadeError> {
    let plan = Plan::load_file(plan_path)?;
    let config = BrigadeConfig::load(plan_path)?;
    let store = StateStore::new(plan_path, config);
    let state = store.load()?;

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&output::json::success(output::json::status_json(&plan, &state))).unwrap()
        );
    } else {
        output::text::print_status(&plan, &state);
    }

    Ok(0)
}
