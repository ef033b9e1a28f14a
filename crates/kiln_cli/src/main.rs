//! Kiln CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Generation failure
//! - 4: Template error
//! - 5: Sandbox error

use std::process::ExitCode;

use clap::Parser;
use kiln_agent::AgentError;
use kiln_core::CoreError;
use kiln_sandbox::SandboxError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const GENERATION_FAILURE: u8 = 3;
    pub const TEMPLATE_ERROR: u8 = 4;
    pub const SANDBOX_ERROR: u8 = 5;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let result = match cli.command {
        Commands::Generate(args) => commands::generate::execute(args).await,
        Commands::Template(args) => commands::template::execute(args).await,
        Commands::Status(args) => commands::status::execute(args),
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "kiln=debug,info" } else { "kiln=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let log_result = tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().with_target(false)))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(agent) = cause.downcast_ref::<AgentError>() {
            return match agent {
                AgentError::Sandbox(_) => ExitCodes::SANDBOX_ERROR,
                AgentError::Config(_) | AgentError::LlmNotConfigured => ExitCodes::INVALID_ARGS,
                AgentError::Core(CoreError::InvalidBlueprint(_)) => ExitCodes::INVALID_ARGS,
                _ => ExitCodes::GENERATION_FAILURE,
            };
        }
        if let Some(core) = cause.downcast_ref::<CoreError>() {
            return match core {
                CoreError::InvalidBlueprint(_) => ExitCodes::INVALID_ARGS,
                CoreError::Sandbox(_) => ExitCodes::SANDBOX_ERROR,
                _ => ExitCodes::GENERAL_ERROR,
            };
        }
        if cause.downcast_ref::<SandboxError>().is_some() {
            return ExitCodes::SANDBOX_ERROR;
        }
    }

    let msg = e.to_string().to_lowercase();
    if msg.contains("template") {
        ExitCodes::TEMPLATE_ERROR
    } else if msg.contains("argument") || msg.contains("not found") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}
