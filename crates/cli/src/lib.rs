pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "furlo",
    about = "Furlo operator CLI",
    long_about = "Operate Furlo migrations, demo fixtures, readiness checks, chain simulation and escalation sweeps.",
    after_help = "Examples:\n  furlo doctor --json\n  furlo simulate --user e1\n  furlo sweep"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo dataset and verify it against its contract")]
    Seed,
    #[command(about = "Validate config, database connectivity, and org readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Dry-run the approval chain for a requester without persisting anything")]
    Simulate {
        #[arg(long, help = "Employee ID to simulate the chain for")]
        user: String,
    },
    #[command(about = "Run one escalation pass over stale pending requests")]
    Sweep {
        #[arg(long, help = "Escalate only these request IDs, skipping the staleness cutoff")]
        id: Vec<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Simulate { user } => commands::simulate::run(&user),
        Command::Sweep { id } => commands::sweep::run(&id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
