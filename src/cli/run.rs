use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::cli::commands::RunArgs;
use crate::config::BrigadeConfig;
use crate::error::BrigadeError;
use crate::events::EventEmitter;
use crate::models::plan::Plan;
use crate::output;
use crate::scheduler::{RunResult, Scheduler, TaskFilter, WorkerPool};
use crate::store::StateStore;
use crate::vcs::{find_git_root, GitVcs};
use crate::worker::ShellWorker;

pub async fn run(args: RunArgs, json_output: bool) -> i32 {
    match run_inner(args, json_output).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e.message, "run failed");
            if json_output {
                println!("{}", serde_json::to_string_pretty(&output::json::error(&e)).unwrap());
            } else {
                eprintln!("Error: {}", e.message);
                if let Some(remedy) = &e.remedy {
                    eprintln!("  remedy: {remedy}");
                }
            }
            1
        }
    }
}

async fn run_inner(args: RunArgs, json_output: bool) -> Result<i32, BrigadeError> {
    let plan = Plan::load_file(&args.plan)?;
    let mut config = BrigadeConfig::load(&args.plan)?;
    if let Some(max_parallel) = args.max_parallel {
        config.max_parallel = max_parallel;
    }

    let filter = TaskFilter {
        only: args.only.map(|ids| ids.into_iter().collect::<HashSet<_>>()),
        skip: args.skip.into_iter().collect(),
        from: args.from,
        until: args.until,
    };

    if args.dry_run {
        return dry_run(&plan, &filter, json_output);
    }

    let cwd = find_git_root(args.plan.parent().unwrap_or_else(|| std::path::Path::new(".")))?;
    let store = StateStore::new(&args.plan, config.clone());
    if args.force {
        store.force_unlock()?;
    }

    let events = EventEmitter::new(args.events.clone(), args.status.clone());
    let vcs = Arc::new(GitVcs::new(cwd.clone()));

    let workers = WorkerPool {
        junior: Arc::new(ShellWorker::new(
            config.worker_commands.junior.clone(),
            config.health_check_interval,
            config.termination_grace_period,
            config.crash_exit_code,
            config.timeout_exit_code,
        )),
        senior: Arc::new(ShellWorker::new(
            config.worker_commands.senior.clone(),
            config.health_check_interval,
            config.termination_grace_period,
            config.crash_exit_code,
            config.timeout_exit_code,
        )),
        executive: Arc::new(ShellWorker::new(
            config.worker_commands.executive.clone(),
            config.health_check_interval,
            config.termination_grace_period,
            config.crash_exit_code,
            config.timeout_exit_code,
        )),
    };

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_for_signal.cancel();
        }
    });

    let mut scheduler = Scheduler::new(
        plan,
        args.plan.clone(),
        cwd,
        config,
        store,
        events,
        workers,
        vcs,
        filter,
        cancel,
    )
    .with_command_file(args.command_file);

    let result = scheduler.run().await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&output::json::run_result(&result)).unwrap());
    } else {
        output::text::print_run_result(&result);
    }

    Ok(match result {
        RunResult::AllComplete => 0,
        RunResult::Incomplete { .. } => 2,
        RunResult::Aborted { .. } => 1,
    })
}

fn dry_run(plan: &Plan, filter: &TaskFilter, json_output: bool) -> Result<i32, BrigadeError> {
    let order = plan.topological_order();
    let filtered_out = filter.filtered_out(&order);
    let would_run: Vec<&String> = order.iter().filter(|id| !filtered_out.contains(*id)).collect();

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({"wouldRun": would_run})).unwrap()
        );
    } else {
        println!("Would run {} of {} tasks:", would_run.len(), plan.tasks.len());
        for id in would_run {
            println!("  {id}");
        }
    }
    Ok(0)
}
