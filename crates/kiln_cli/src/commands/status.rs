//! Status command - Summarize a saved session.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use kiln_core::{GenerationState, StateStore};

#[derive(Args)]
pub struct StatusArgs {
    /// Path to a state.json file
    #[arg(conflicts_with = "session")]
    path: Option<PathBuf>,

    /// Session id under .kiln/sessions
    #[arg(short, long)]
    session: Option<String>,

    /// Also print the session's event log
    #[arg(long)]
    events: bool,

    /// Print the status as JSON
    #[arg(long)]
    json: bool,
}

pub fn execute(args: StatusArgs) -> Result<()> {
    let store = StateStore::new(std::env::current_dir()?);

    let state = match (&args.path, &args.session) {
        (Some(path), _) => StateStore::load_file(path)
            .with_context(|| format!("Failed to load session state {}", path.display()))?,
        (None, Some(id)) => store
            .load(id)
            .with_context(|| format!("Session not found: {}", id))?,
        (None, None) => {
            let sessions = store.list_sessions()?;
            if sessions.is_empty() {
                anyhow::bail!("No saved sessions found; pass a state.json path or --session");
            }
            for id in sessions {
                println!("{}", id);
            }
            return Ok(());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&state.status())?);
    } else {
        print_status(&state);
    }

    if args.events {
        let events = store.load_events(state.session_id())?;
        println!();
        println!("Events ({}):", events.len());
        for record in events {
            println!(
                "  {} {}",
                record.timestamp.format("%H:%M:%S"),
                serde_json::to_string(&record.event)?
            );
        }
    }
    Ok(())
}

fn print_status(state: &GenerationState) {
    let status = state.status();
    println!("Session: {}", state.session_id());
    println!("Request: {}", state.query());
    println!("Mode:    {}", state.mode());
    println!("State:   {}", status.current_state);
    println!(
        "Phases:  {}/{} completed",
        status.completed_phases,
        status.phases.len()
    );
    if status.finalized {
        println!("Finalized");
    }
    if let Some(sandbox) = &status.sandbox {
        println!("Sandbox: {} ({})", sandbox.run_id, sandbox.preview_url);
    }

    println!();
    for phase in &status.phases {
        let mark = if phase.completed { "x" } else { " " };
        println!("[{}] {} ({} files)", mark, phase.name, phase.files.len());
    }

    println!();
    println!("Files ({}):", status.total_files);
    for file in &status.files {
        println!("  {}", file);
    }
}
