pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "propline",
    about = "Propline operator CLI",
    long_about = "Operate the proposal lifecycle service: migrations, demo fixtures, config inspection, readiness checks and number allocation.",
    after_help = "Examples:\n  propline doctor --json\n  propline config\n  propline number --client client-acme --user user-joana"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo client and user directory (idempotent)")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, discount policy, DB connectivity and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Allocate the next proposal number for a client and responsible user")]
    Number {
        #[arg(long, help = "Client id as stored in the client directory")]
        client: String,
        #[arg(long, help = "Responsible user id; the generic code is used when omitted")]
        user: Option<String>,
        #[arg(long, default_value_t = 0, help = "Revision index printed as the REVnn suffix")]
        revision: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Number { client, user, revision } => {
            commands::number::run(&client, user.as_deref(), revision)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
