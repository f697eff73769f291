use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

mod actions;
mod cli;
mod cluster;
mod config;
mod course;
mod error;
mod model;
mod paths;
mod pipeline;
mod render;
mod report;
mod similarity;
mod util;

use cli::{Command, GenerateConfigArgs, OverrideArgs, RootArgs, RunArgs};
use config::{ConfigSnapshot, FileConfig, DEFAULT_CONFIG_FILE};
use pipeline::ActionContext;

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Run(args) => cmd_run(args),
        Command::GenerateConfig(args) => cmd_generate_config(args),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "casebook=debug" } else { "casebook=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn resolve_snapshot(overrides: &OverrideArgs) -> Result<ConfigSnapshot> {
    let config_path = overrides
        .config
        .clone()
        .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE).to_path_buf());
    let file = FileConfig::load_optional(&config_path)?;
    ConfigSnapshot::resolve(file, overrides)
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let snapshot = resolve_snapshot(&args.overrides)?;
    let registry = actions::registry()?;
    let requested = actions::requested_actions(&registry, &snapshot);
    let ctx = ActionContext::new(snapshot);

    let report = pipeline::execute(&registry, &ctx, &requested)?;
    for entry in &report.actions {
        println!("{}: {}", entry.name, entry.outcome.label());
    }
    if let Some(failed) = report.failure() {
        return Err(anyhow!(
            "action {} failed: {}",
            failed.name,
            failed.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

fn cmd_generate_config(args: GenerateConfigArgs) -> Result<()> {
    let snapshot = resolve_snapshot(&args.overrides)?;
    let rendered = config::render_config(&snapshot)?;
    match &args.output {
        Some(path) => {
            fs::write(path, rendered).with_context(|| format!("write {}", path.display()))?;
            println!("Wrote config to {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
