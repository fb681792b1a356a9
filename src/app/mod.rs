use std::fs;
use std::io::Write;
use std::path::Path;

use log::{debug, info, warn};

use crate::cache::{CacheError, FileScoreCache, MemoryScoreCache, ScoreCache};
use crate::cancel;
use crate::cli::{
    AnalyzeArgs, CacheCommand, Command, CompareArgs, EstimateArgs, LlmArgs, RepoArgs, ReportArgs,
};
use crate::config::{ConfigError, GitPulseConfig};
use crate::git::{CommitSource, Git, GitError};
use crate::llm::LlmProvider;
use crate::oracle::LlmOracle;
use crate::pipeline::{AnalysisError, Analyzer, Phase, ProgressEvent};
use crate::report::{
    cached_report, find_author, format_comparison, format_estimate, format_report, AnalysisReport,
};
use crate::rubric::{RubricError, RubricSet};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Rubric(#[from] RubricError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    User(String),
}

/// Application entry point. Reports and stats are written to `out`;
/// diagnostics go through the logger.
pub struct App<W: Write> {
    out: W,
}

impl<W: Write> App<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn run(&mut self, command: Command) -> Result<(), AppError> {
        match command {
            Command::Analyze(args) => self.handle_analyze(args),
            Command::Estimate(args) => self.handle_estimate(args),
            Command::Report(args) => self.handle_report(args),
            Command::Compare(args) => self.handle_compare(args),
            Command::Cache(CacheCommand::Clear(repo)) => self.handle_cache_clear(repo),
            Command::Cache(CacheCommand::Stats(repo)) => self.handle_cache_stats(repo),
        }
    }

    fn handle_analyze(&mut self, args: AnalyzeArgs) -> Result<(), AppError> {
        let (report, config) = run_analysis(&args)?;
        let format = args.format.unwrap_or(config.output.format);
        self.emit(&format_report(&report, format), args.output.as_deref())
    }

    fn handle_compare(&mut self, args: CompareArgs) -> Result<(), AppError> {
        let analyze = AnalyzeArgs {
            repo: args.repo,
            scope: args.scope,
            llm: args.llm,
            no_cache: args.no_cache,
            concurrency: args.concurrency,
            ..AnalyzeArgs::default()
        };
        info!("Comparing {} vs {}", args.first, args.second);
        let (report, _) = run_analysis(&analyze)?;

        let first = find_author(&report.authors, &args.first)
            .ok_or_else(|| AppError::User(format!("Author not found: {}", args.first)))?;
        let second = find_author(&report.authors, &args.second)
            .ok_or_else(|| AppError::User(format!("Author not found: {}", args.second)))?;
        self.emit(&format_comparison(first, second), None)
    }

    fn handle_report(&mut self, args: ReportArgs) -> Result<(), AppError> {
        let git = Git::open(&args.repo.path)?;
        let config = GitPulseConfig::load(Some(git.repo_path()))?;
        let rubric_hash = RubricSet::load(Some(git.repo_path()))?.hash();
        let cache = FileScoreCache::new(git.repo_path())?;

        let cached = cache.get_all(&rubric_hash);
        if cached.is_empty() {
            warn!("No cached scores found. Run `gitpulse analyze` first.");
            return Ok(());
        }
        info!("Found {} cached commit scores", cached.len());

        let report = cached_report(
            cached.into_values().collect(),
            git.repo_path().to_path_buf(),
            config.scoring.weights,
            config.llm.provider.to_string(),
            config.llm.model_name(),
        );
        let format = args.format.unwrap_or(config.output.format);
        self.emit(&format_report(&report, format), args.output.as_deref())
    }

    /// Write rendered output to `path`, or to `out` when none is given.
    fn emit(&mut self, rendered: &str, path: Option<&Path>) -> Result<(), AppError> {
        match path {
            Some(path) => {
                fs::write(path, rendered)?;
                info!("Report written to {}", path.display());
            }
            None => writeln!(self.out, "{}", rendered)?,
        }
        Ok(())
    }

    fn handle_estimate(&mut self, args: EstimateArgs) -> Result<(), AppError> {
        let git = Git::open(&args.repo.path)?;
        let config = GitPulseConfig::load(Some(git.repo_path()))?;
        let rubrics = RubricSet::load(Some(git.repo_path()))?;
        let rubric_hash = rubrics.hash();
        let oracle = LlmOracle::new(
            config.llm.create_client(),
            rubrics,
            config.llm.provider.to_string(),
            config.llm.model_name(),
        );
        let cache = open_cache(&git, args.no_cache)?;

        let analyzer = Analyzer::new(
            &git,
            &oracle,
            cache.as_ref(),
            rubric_hash,
            config.analyzer_settings(),
        );
        let estimate = analyzer.estimate(&args.scope.to_scope())?;

        let format = args.format.unwrap_or(config.output.format);
        writeln!(self.out, "{}", format_estimate(&estimate, format))?;
        Ok(())
    }

    fn handle_cache_clear(&mut self, repo: RepoArgs) -> Result<(), AppError> {
        let git = Git::open(&repo.path)?;
        let cache = FileScoreCache::new(git.repo_path())?;
        cache.clear()?;
        info!("Cleared cached scores in {}", cache.scores_dir().display());
        Ok(())
    }

    fn handle_cache_stats(&mut self, repo: RepoArgs) -> Result<(), AppError> {
        let git = Git::open(&repo.path)?;
        let cache = FileScoreCache::new(git.repo_path())?;
        let rubric_hash = RubricSet::load(Some(git.repo_path()))?.hash();
        let stats = cache.stats(&rubric_hash);

        writeln!(self.out, "Location: {}", cache.scores_dir().display())?;
        writeln!(self.out, "Entries: {}", stats.total_entries)?;
        writeln!(
            self.out,
            "Valid for current rubrics ({}): {}",
            rubric_hash, stats.valid_entries
        )?;
        Ok(())
    }
}

/// Score the repository named by `args` and return the report with the
/// effective configuration.
fn run_analysis(args: &AnalyzeArgs) -> Result<(AnalysisReport, GitPulseConfig), AppError> {
    let git = Git::open(&args.repo.path)?;
    let mut config = GitPulseConfig::load(Some(git.repo_path()))?;
    apply_overrides(&mut config, &args.llm, args.concurrency)?;

    let rubrics = RubricSet::load(Some(git.repo_path()))?;
    let rubric_hash = rubrics.hash();
    let oracle = LlmOracle::new(
        config.llm.create_client(),
        rubrics,
        config.llm.provider.to_string(),
        config.llm.model_name(),
    );
    let cache = open_cache(&git, args.no_cache)?;

    let mut settings = config.analyzer_settings();
    settings.allow_partial = args.partial;
    info!(
        "Analyzing {} with {} (concurrency {})",
        git.repo_path().display(),
        config.llm.provider,
        settings.concurrency
    );

    let analyzer = Analyzer::new(&git, &oracle, cache.as_ref(), rubric_hash, settings)
        .with_cancel(cancel::register_handler());
    let scope = args.scope.to_scope();
    let report = analyzer.analyze(&scope, &mut |event| log_progress(event))?;

    if report.metadata.cache_write_failures > 0 {
        warn!(
            "{} scores could not be cached and will be re-scored next run",
            report.metadata.cache_write_failures
        );
    }
    Ok((report, config))
}

fn open_cache(git: &Git, no_cache: bool) -> Result<Box<dyn ScoreCache>, AppError> {
    if no_cache {
        debug!("Persistent cache disabled for this run");
        Ok(Box::new(MemoryScoreCache::new()))
    } else {
        Ok(Box::new(FileScoreCache::new(git.repo_path())?))
    }
}

/// Apply command-line flags on top of loaded configuration.
fn apply_overrides(
    config: &mut GitPulseConfig,
    llm: &LlmArgs,
    concurrency: Option<usize>,
) -> Result<(), AppError> {
    let provider = llm
        .provider
        .as_deref()
        .map(str::parse::<LlmProvider>)
        .transpose()
        .map_err(AppError::User)?;
    config.llm = config.llm.clone().with_overrides(
        provider,
        llm.model.clone(),
        llm.opencode_backend.clone(),
    );
    if let Some(concurrency) = concurrency {
        config.analysis.max_concurrency = concurrency;
    }
    config.validate()?;
    Ok(())
}

fn log_progress(event: ProgressEvent) {
    match event.phase {
        Phase::Scoring => info!(
            "[{}/{}] Scored {}",
            event.current, event.total, event.message
        ),
        Phase::Extracting | Phase::Aggregating => debug!(
            "{} {}/{}: {}",
            event.phase, event.current, event.total, event.message
        ),
    }
}
