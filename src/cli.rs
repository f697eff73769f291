//! CLI argument parsing for the report pipeline.
//!
//! The CLI is intentionally thin: it collects the override layer of the
//! configuration and routes to one of two commands, so the same core
//! logic can be driven from a config file alone.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "casebook",
    version,
    about = "Similarity case-report pipeline for course submissions",
    after_help = "Commands:\n  run                  Run the pipeline (all actions, or --actions <subset>)\n  generate-config      Emit the resolved configuration as TOML\n\nExamples:\n  casebook run --course csc108 --assignment a1 --language python\n  casebook run --actions compile-report --force\n  casebook run -s case_3\n  casebook run -s group_a group_b\n  casebook generate-config casebook.toml --course csc108",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Emit a verbose transcript of the run
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    GenerateConfig(GenerateConfigArgs),
}

/// Run the pipeline.
#[derive(Parser, Debug)]
#[command(about = "Run the report pipeline in dependency order")]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: OverrideArgs,
}

/// Emit the resolved configuration.
#[derive(Parser, Debug)]
#[command(about = "Emit the resolved configuration as TOML")]
pub struct GenerateConfigArgs {
    /// Destination file; stdout when omitted
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

/// Command-line overrides layered over the config file. Every value here
/// wins over its file counterpart.
#[derive(Args, Debug, Default, Clone)]
pub struct OverrideArgs {
    /// Config file providing the base layer
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// API key for the course-management service
    #[arg(long)]
    pub api_key: Option<String>,

    /// Base URL of the course-management service
    #[arg(long)]
    pub service_url: Option<String>,

    /// Course name on the course-management service
    #[arg(long)]
    pub course: Option<String>,

    /// Assignment short identifier
    #[arg(long)]
    pub assignment: Option<String>,

    /// Numeric user id for the similarity service
    #[arg(long)]
    pub similarity_user_id: Option<u64>,

    /// Existing similarity report URL (skips submission)
    #[arg(long)]
    pub report_url: Option<String>,

    /// Working directory for downloaded and generated artifacts
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Source language submitted to the similarity service
    #[arg(long)]
    pub language: Option<String>,

    /// Glob matching submission files inside each group directory
    #[arg(long)]
    pub file_glob: Option<String>,

    /// Restrict the run to these group names
    #[arg(long, num_args = 1..)]
    pub groups: Vec<String>,

    /// Actions to run (dependencies are pulled in automatically)
    #[arg(long, num_args = 1..)]
    pub actions: Vec<String>,

    /// External renderer command (default: pandoc from PATH)
    #[arg(long)]
    pub renderer_command: Option<String>,

    /// A single case number, or a list of group names
    #[arg(long, short = 's', num_args = 1..)]
    pub select: Vec<String>,

    /// Re-run requested actions even when their completion marker exists
    #[arg(long, short = 'f')]
    pub force: bool,
}
