use serde_json::json;

use crate::cli::commands::DecideArgs;
use crate::error::BrigadeError;

/// Writes a supervisor decision record to the command file a running
/// `brigade run` is polling (spec.md §6's command path: `{decision, action,
/// reason?, guidance?}`).
pub fn run(args: DecideArgs) -> i32 {
    match run_inner(args) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e.message);
            1
        }
    }
}

fn run_inner(args: DecideArgs) -> Result<(), BrigadeError> {
    if !matches!(args.action.as_str(), "retry" | "skip" | "abort" | "pause") {
        return Err(BrigadeError::invariant(format!(
            "unknown action \"{}\"; expected retry|skip|abort|pause",
            args.action
        )));
    }

    let record = json!({
        "decision": args.decision,
        "action": args.action,
        "reason": args.reason,
        "guidance": args.guidance,
    });

    if let Some(parent) = args.command_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&args.command_file, serde_json::to_string_pretty(&record)?)?;
    Ok(())
}
