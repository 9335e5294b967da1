use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the section plan that needs no analysis (outline or skeleton).
    Plan(PlanArgs),
    /// Scrape one page into Markdown with front matter.
    Scrape(ScrapeArgs),
    /// Analyze the reference and write the full article.
    Generate(GenerateArgs),
    /// Write the article saved by an earlier session.
    Restore(RestoreArgs),
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Article config (YAML or JSON).
    #[arg(long)]
    pub config: String,
}

#[derive(Debug, Args)]
pub struct ScrapeArgs {
    /// Page URL (must be http/https).
    #[arg(long)]
    pub url: String,

    /// Output Markdown file.
    #[arg(long)]
    pub out: String,

    /// Request timeout.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Overwrite the output file if it exists.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Article config (YAML or JSON).
    #[arg(long)]
    pub config: String,

    /// Output Markdown file.
    #[arg(long)]
    pub out: String,

    /// Write all sections in parallel (overrides `turbo_mode` in the config).
    #[arg(long, default_value_t = false)]
    pub turbo: bool,

    /// Maximum concurrent section writes in turbo mode (0 = unbounded).
    #[arg(long, default_value_t = 0)]
    pub concurrency: usize,

    /// Pause before reporting completion.
    #[arg(long, default_value_t = 500)]
    pub settle_ms: u64,

    /// Directory for session snapshots.
    #[arg(long)]
    pub session_dir: Option<String>,

    /// Session id (defaults to a new UUID when `--session-dir` is set).
    #[arg(long, requires = "session_dir")]
    pub session_id: Option<String>,

    /// Attach semantically closest reference excerpts to each section prompt.
    #[arg(long, default_value_t = false)]
    pub semantic_rag: bool,

    /// Scrape timeout for `reference_url`.
    #[arg(long, default_value_t = 30)]
    pub scrape_timeout_secs: u64,

    /// Overwrite the output file if it exists.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct RestoreArgs {
    /// Directory for session snapshots.
    #[arg(long)]
    pub session_dir: String,

    #[arg(long)]
    pub session_id: String,

    /// Output Markdown file.
    #[arg(long)]
    pub out: String,

    /// Overwrite the output file if it exists.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Delete the saved session after writing the article.
    #[arg(long, default_value_t = false)]
    pub clear: bool,
}
