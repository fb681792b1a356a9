use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::models::AnalysisScope;
use crate::report::OutputFormat;

/// Command line interface definition for gitpulse.
#[derive(Parser, Debug)]
#[command(name = "gitpulse")]
#[command(about = "Score commit quality per author with an LLM")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbosity")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Command selected by CLI parsing.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Score commits and report per-author results
    Analyze(AnalyzeArgs),
    /// Estimate oracle calls and cost without scoring
    Estimate(EstimateArgs),
    /// Rebuild a report from cached scores without calling the LLM
    Report(ReportArgs),
    /// Analyze and compare two authors dimension by dimension
    Compare(CompareArgs),
    /// Inspect or clear the score cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Remove every cached score for the repository
    Clear(RepoArgs),
    /// Show cache entry counts for the repository
    Stats(RepoArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RepoArgs {
    /// Repository to analyze (default: current directory)
    #[arg(value_name = "PATH", default_value = ".")]
    pub path: PathBuf,
}

/// Which commits to include.
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// Branch or revision to walk (default: HEAD)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Only commits after this date (anything `git log --since` accepts)
    #[arg(long)]
    pub since: Option<String>,

    /// Only commits before this date
    #[arg(long)]
    pub until: Option<String>,

    /// Only commits by this author (repeatable)
    #[arg(short, long = "author")]
    pub authors: Vec<String>,

    /// Stop after this many commits
    #[arg(short = 'n', long)]
    pub max_commits: Option<usize>,
}

impl ScopeArgs {
    pub fn to_scope(&self) -> AnalysisScope {
        AnalysisScope {
            branch: self.branch.clone(),
            since: self.since.clone(),
            until: self.until.clone(),
            authors: self.authors.clone(),
            max_commits: self.max_commits,
        }
    }
}

/// LLM selection flags. Override environment and config files.
#[derive(Args, Debug, Clone, Default)]
pub struct LlmArgs {
    /// LLM provider: claude or opencode
    #[arg(long)]
    pub provider: Option<String>,

    /// Model passed to the provider
    #[arg(long)]
    pub model: Option<String>,

    /// Backend for the opencode provider (e.g. ollama, lmstudio)
    #[arg(long)]
    pub opencode_backend: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    #[command(flatten)]
    pub scope: ScopeArgs,

    #[command(flatten)]
    pub llm: LlmArgs,

    /// Report format (default from config, else pretty)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Ignore and do not update the persistent score cache
    #[arg(long)]
    pub no_cache: bool,

    /// Maximum concurrent oracle calls
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Report without commits that could not be scored instead of failing
    #[arg(long)]
    pub partial: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EstimateArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Output format (default from config, else pretty)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Count every commit as uncached
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ReportArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    /// Report format (default from config, else pretty)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CompareArgs {
    /// First author (substring of name or email)
    pub first: String,

    /// Second author (substring of name or email)
    pub second: String,

    #[command(flatten)]
    pub repo: RepoArgs,

    #[command(flatten)]
    pub scope: ScopeArgs,

    #[command(flatten)]
    pub llm: LlmArgs,

    /// Ignore and do not update the persistent score cache
    #[arg(long)]
    pub no_cache: bool,

    /// Maximum concurrent oracle calls
    #[arg(short, long)]
    pub concurrency: Option<usize>,
}
