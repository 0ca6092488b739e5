use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tutorlens",
    version,
    about = "Learner progress analytics and misconception tagging"
)]
pub struct Cli {
    /// Database path
    #[arg(long, env = "TUTORLENS_DB", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print a learner's progress report as JSON
    Progress(ProgressArgs),
    /// Classify an interaction and save its result
    Finalize(FinalizeArgs),
    /// Import exercises, interactions and results as JSON lines from stdin
    Import,
    /// Start MCP server on stdio
    Serve,
    /// Show database counts and classifier outcomes
    Status,
    /// List the alternative-conception vocabulary
    Vocab,
}

#[derive(Parser)]
pub struct ProgressArgs {
    /// Learner ID (24-char hex)
    pub learner: String,

    /// Pretty-print the JSON output
    #[arg(long)]
    pub pretty: bool,
}

#[derive(Parser)]
pub struct FinalizeArgs {
    /// Learner ID (24-char hex)
    #[arg(long)]
    pub learner: String,

    /// Exercise ID (24-char hex)
    #[arg(long)]
    pub exercise: String,

    /// Interaction ID whose transcript is classified (24-char hex)
    #[arg(long)]
    pub interaction: String,

    /// The learner solved the exercise on the first attempt
    #[arg(long)]
    pub solved_first_try: bool,

    /// Save without calling the classifier (status "skipped")
    #[arg(long)]
    pub no_classify: bool,
}
