use std::process;

use clap::Parser;

use brigade::cli::{Cli, Commands};
use brigade::{cli, logging};

#[tokio::main]
async fn main() {
    logging::init();

    let cli_args = Cli::parse();
    let json_output = cli_args.json;

    let exit_code = match cli_args.command {
        Commands::Run(args) => cli::run::run(args, json_output).await,
        Commands::Status { plan } => cli::status::run(&plan, json_output),
        Commands::Decide(args) => cli::decide::run(args),
    };

    process::exit(exit_code);
}
