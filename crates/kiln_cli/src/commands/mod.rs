//! CLI command definitions.

use clap::{Parser, Subcommand};

pub mod generate;
pub mod status;
pub mod template;

/// Kiln - phase-by-phase project generation in a sandbox
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version, about = "Kiln - phase-by-phase project generation in a sandbox")]
#[command(long_about = r#"
Kiln turns a request and a blueprint into a working project. Each phase is
planned, implemented and reviewed inside a sandbox, then the project is
finalized with a README and an optional deployment.

COMMANDS:
  generate   → Run a generation session
  template   → Show the files and dependencies of a template
  status     → Summarize a saved session

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Generation failure
  4 - Template error
  5 - Sandbox error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a project from a request and an optional blueprint
    Generate(generate::GenerateArgs),

    /// Show template details
    Template(template::TemplateArgs),

    /// Show the status of a saved session
    Status(status::StatusArgs),
}
