pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "clientdesk",
    about = "Clientdesk operator CLI",
    long_about = "Inspect configuration and the module table, check CRM readiness, and run one-off chat turns.",
    after_help = "Examples:\n  clientdesk doctor --json\n  clientdesk config\n  clientdesk chat --module deals --id 4000000000100 \"Give me a brief\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "List the CRM modules the agent can work with")]
    Modules,
    #[command(about = "Validate config, the module table, CRM token exchange, and LLM credentials")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run a single chat turn against the configured CRM and print the response")]
    Chat {
        #[arg(long, help = "Module slug, e.g. deals or contacts")]
        module: String,
        #[arg(long, help = "Id of the record the user is looking at")]
        id: Option<String>,
        #[arg(long, help = "Treat the turn as confirmed so planned writes may run")]
        confirm: bool,
        query: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Modules => commands::modules::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Chat { module, id, confirm, query } => {
            commands::chat::run(&module, id.as_deref(), confirm, &query)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
