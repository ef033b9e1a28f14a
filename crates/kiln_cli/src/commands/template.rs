//! Template command - Show what a project template contains.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use kiln_sandbox::{TemplateCatalog, TemplateDetails};

#[derive(Args)]
pub struct TemplateArgs {
    /// Template name; lists all templates when omitted
    name: Option<String>,

    /// Extra template directory to load
    #[arg(long, env = "KILN_TEMPLATES_DIR")]
    templates_dir: Option<PathBuf>,

    /// Print the full details as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: TemplateArgs) -> Result<()> {
    let mut catalog = TemplateCatalog::builtin();
    if let Some(dir) = &args.templates_dir {
        catalog
            .load_dir(dir)
            .with_context(|| format!("Failed to load templates from {}", dir.display()))?;
    }

    let Some(name) = &args.name else {
        for name in catalog.names() {
            println!("{}", name);
        }
        return Ok(());
    };

    let details = catalog
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("Template not found: {}", name))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(details)?);
    } else {
        print_details(details);
    }
    Ok(())
}

fn print_details(details: &TemplateDetails) {
    println!("Template: {}", details.name);
    println!();
    println!("{}", details.description.selection);
    if !details.description.usage.is_empty() {
        println!();
        println!("Usage: {}", details.description.usage);
    }

    println!();
    println!("Files ({}):", details.files.len());
    for file in &details.files {
        let marker = if details.dont_touch_files.contains(&file.path) {
            " (do not modify)"
        } else {
            ""
        };
        println!("  {}{}", file.path, marker);
    }

    if !details.deps.is_empty() {
        println!();
        println!("Dependencies:");
        for (name, version) in &details.deps {
            println!("  {} {}", name, version);
        }
    }
}
