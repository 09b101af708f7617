pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::resolve::ResolveArgs;

#[derive(Debug, Parser)]
#[command(
    name = "expensecart",
    about = "Conversational expense cart",
    long_about = "Build an expense cart by chatting, resolve GL coding, and inspect readiness.",
    after_help = "Examples:\n  expensecart chat --offline\n  expensecart resolve --department 620 --category \"team meal\" --offline\n  expensecart doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive expense conversation on stdin/stdout")]
    Chat {
        #[arg(long, help = "Use the seeded in-memory backend; nothing is submitted")]
        offline: bool,
        #[arg(long = "as", value_name = "EMAIL", help = "Signed-in email used for \"me\"")]
        signed_in: Option<String>,
    },
    #[command(about = "Resolve GL coding for a department and expense category")]
    Resolve {
        #[arg(long, help = "Three-digit department code")]
        department: String,
        #[arg(long, help = "Expense category text, e.g. \"team meal\"")]
        category: String,
        #[arg(long, help = "Capital purchase")]
        capital: bool,
        #[arg(long, value_name = "ID", help = "Work order identifier")]
        work_order: Option<String>,
        #[arg(long, help = "Use the seeded in-memory backend")]
        offline: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config and probe backend health")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Chat { offline, signed_in } => commands::chat::run(offline, signed_in),
        Command::Resolve { department, category, capital, work_order, offline } => {
            commands::resolve::run(ResolveArgs { department, category, capital, work_order, offline })
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
