//! Analysis report structure and output formatting.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AnalysisScope, AuthorInfo, CommitDiff};
use crate::scoring::{AuthorScore, CommitScore, Dimension, DimensionWeight, TrendDirection};
use crate::utils::short_sha;

/// Rough token cost of one oracle call, prompt and response together.
pub const TOKENS_PER_CALL: u64 = 8500;
/// Rough blended price per million tokens, in dollars.
pub const COST_PER_MILLION_TOKENS: f64 = 2.5;

/// Output format for reports and estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable formatted output.
    #[default]
    Pretty,
    /// JSON output.
    Json,
    /// Markdown report.
    Markdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub repository_path: PathBuf,
    pub scope: AnalysisScope,
    pub dimension_weights: DimensionWeight,
    pub total_commits: usize,
    pub analyzed_commits: usize,
    pub cached_commits: usize,
    pub skipped_commits: usize,
    /// Commits left out because the oracle failed on them.
    #[serde(default)]
    pub failed_commits: usize,
    #[serde(default)]
    pub cache_write_failures: usize,
    #[serde(default)]
    pub tokens_used: u64,
    pub llm_provider: String,
    pub llm_model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub average_score: f64,
    pub median_score: f64,
    pub top_performer: Option<String>,
    pub total_authors: usize,
    pub date_range: Option<DateRange>,
}

/// What an author contributed, independent of scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorContribution {
    pub author: AuthorInfo,
    pub commit_count: usize,
    pub total_additions: usize,
    pub total_deletions: usize,
    pub files_changed: usize,
    /// Distinct UTC calendar days with at least one commit.
    pub active_days: usize,
    pub first_commit_date: DateTime<Utc>,
    pub last_commit_date: DateTime<Utc>,
}

impl AuthorContribution {
    /// Build from an author's diffs. Returns `None` for an empty slice.
    pub fn from_diffs(author: AuthorInfo, diffs: &[&CommitDiff]) -> Option<Self> {
        let first = diffs.iter().map(|d| d.commit.date).min()?;
        let last = diffs.iter().map(|d| d.commit.date).max()?;
        let days: HashSet<_> = diffs.iter().map(|d| d.commit.date.date_naive()).collect();
        let files: HashSet<&str> = diffs
            .iter()
            .flat_map(|d| d.files.iter().map(|f| f.path.as_str()))
            .collect();

        Some(Self {
            author,
            commit_count: diffs.len(),
            total_additions: diffs.iter().map(|d| d.stats.total_additions).sum(),
            total_deletions: diffs.iter().map(|d| d.stats.total_deletions).sum(),
            files_changed: files.len(),
            active_days: days.len(),
            first_commit_date: first,
            last_commit_date: last,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorReport {
    pub score: AuthorScore,
    pub contribution: AuthorContribution,
    pub highlights: Vec<String>,
    pub recommendations: Vec<String>,
}

impl AuthorReport {
    pub fn new(score: AuthorScore, contribution: AuthorContribution) -> Self {
        let highlights = highlights(&score);
        let recommendations = recommendations(&score);
        Self {
            score,
            contribution,
            highlights,
            recommendations,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub metadata: ReportMetadata,
    pub summary: ReportSummary,
    pub authors: Vec<AuthorReport>,
    pub commit_scores: Vec<CommitScore>,
}

/// Projected oracle usage for an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub total_commits: usize,
    pub cached_commits: usize,
    pub to_analyze: usize,
    pub estimated_llm_calls: usize,
    pub estimated_tokens: u64,
    /// Dollars.
    pub estimated_cost: f64,
    pub cost_per_commit: f64,
}

impl CostEstimate {
    pub fn new(total_commits: usize, cached_commits: usize, to_analyze: usize, calls: usize) -> Self {
        let estimated_tokens = calls as u64 * TOKENS_PER_CALL;
        let estimated_cost = estimated_tokens as f64 / 1_000_000.0 * COST_PER_MILLION_TOKENS;
        let cost_per_commit = if to_analyze > 0 {
            estimated_cost / to_analyze as f64
        } else {
            0.0
        };
        Self {
            total_commits,
            cached_commits,
            to_analyze,
            estimated_llm_calls: calls,
            estimated_tokens,
            estimated_cost,
            cost_per_commit,
        }
    }
}

pub fn highlights(score: &AuthorScore) -> Vec<String> {
    let dims = &score.dimension_scores;
    let mut out = Vec::new();
    if score.overall_score >= 80.0 {
        out.push("Consistently high-quality contributions".to_string());
    }
    if dims.code_quality.score >= 85.0 {
        out.push("Excellent code quality".to_string());
    }
    if dims.commit_discipline.score >= 85.0 {
        out.push("Strong commit discipline".to_string());
    }
    if score.trend.direction == TrendDirection::Improving {
        out.push("Showing improvement over time".to_string());
    }
    if score.scored_commit_count >= 20 {
        out.push("High commit volume".to_string());
    }
    out
}

/// Suggestions for an author. Nothing is suggested without scored commits.
pub fn recommendations(score: &AuthorScore) -> Vec<String> {
    if score.scored_commit_count == 0 {
        return Vec::new();
    }
    let dims = &score.dimension_scores;
    let mut out = Vec::new();
    if dims.code_quality.score < 60.0 {
        out.push("Focus on code readability and best practices".to_string());
    }
    if dims.commit_discipline.score < 60.0 {
        out.push("Improve commit message quality and commit size".to_string());
    }
    if dims.collaboration.score < 50.0 {
        out.push("Increase cross-module contributions and documentation".to_string());
    }
    if score.trend.direction == TrendDirection::Declining {
        out.push("Recent trend shows declining quality, consider a review".to_string());
    }
    out
}

/// Summary over authors already sorted by score, best first.
pub fn summarize<I>(authors: &[AuthorReport], commit_dates: I) -> ReportSummary
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let mut scores: Vec<f64> = authors.iter().map(|a| a.score.overall_score).collect();
    scores.sort_by(|a, b| a.total_cmp(b));

    let average_score = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };
    let median_score = scores.get(scores.len() / 2).copied().unwrap_or(0.0);

    let mut dates = commit_dates.into_iter();
    let date_range = dates.next().map(|first| {
        dates.fold(
            DateRange {
                start: first,
                end: first,
            },
            |range, date| DateRange {
                start: range.start.min(date),
                end: range.end.max(date),
            },
        )
    });

    ReportSummary {
        average_score,
        median_score,
        top_performer: authors.first().map(|a| a.score.author_name.clone()),
        total_authors: authors.len(),
        date_range,
    }
}

/// Report rebuilt from cached scores alone, without reading history.
///
/// Cached records carry no author identity, so the author list is empty and
/// the summary covers commit scores. Skipped scores are counted but excluded
/// from the averages.
pub fn cached_report(
    mut scores: Vec<CommitScore>,
    repository_path: PathBuf,
    weights: DimensionWeight,
    llm_provider: impl Into<String>,
    llm_model: impl Into<String>,
) -> AnalysisReport {
    for score in &mut scores {
        score.reweigh(&weights);
    }
    scores.sort_by(|a, b| {
        a.metadata
            .timestamp
            .cmp(&b.metadata.timestamp)
            .then_with(|| a.commit_hash.cmp(&b.commit_hash))
    });

    let mut overall: Vec<f64> = scores
        .iter()
        .filter(|s| !s.is_skipped())
        .map(CommitScore::overall_score)
        .collect();
    overall.sort_by(|a, b| a.total_cmp(b));
    let average_score = if overall.is_empty() {
        0.0
    } else {
        overall.iter().sum::<f64>() / overall.len() as f64
    };
    let skipped_commits = scores.len() - overall.len();

    AnalysisReport {
        metadata: ReportMetadata {
            generated_at: Utc::now(),
            repository_path,
            scope: AnalysisScope::default(),
            dimension_weights: weights,
            total_commits: scores.len(),
            analyzed_commits: scores.len(),
            cached_commits: scores.len(),
            skipped_commits,
            failed_commits: 0,
            cache_write_failures: 0,
            tokens_used: 0,
            llm_provider: llm_provider.into(),
            llm_model: llm_model.into(),
        },
        summary: ReportSummary {
            average_score,
            median_score: overall.get(overall.len() / 2).copied().unwrap_or(0.0),
            top_performer: None,
            total_authors: 0,
            date_range: None,
        },
        authors: Vec::new(),
        commit_scores: scores,
    }
}

/// First author whose name or email contains `needle`, ignoring case.
pub fn find_author<'a>(authors: &'a [AuthorReport], needle: &str) -> Option<&'a AuthorReport> {
    let needle = needle.to_lowercase();
    authors.iter().find(|a| {
        a.score.author_name.to_lowercase().contains(&needle)
            || a.score.author_email.to_lowercase().contains(&needle)
    })
}

/// Side-by-side dimension table for two authors.
pub fn format_comparison(first: &AuthorReport, second: &AuthorReport) -> String {
    let (a, b) = (&first.score, &second.score);
    let width = a.author_name.len().max(b.author_name.len()).max(15);
    let mut output = format!(
        "{:<20} {:<width$} {:<width$} Winner\n{}\n",
        "Dimension",
        a.author_name,
        b.author_name,
        "-".repeat(20 + width * 2 + 8),
    );

    let mut rows = vec![("Overall", a.overall_score, b.overall_score)];
    for dimension in Dimension::ALL {
        rows.push((
            dimension.name(),
            a.dimension_scores.get(dimension).score,
            b.dimension_scores.get(dimension).score,
        ));
    }
    for (label, left, right) in rows {
        let winner = if left > right {
            a.author_name.as_str()
        } else if right > left {
            b.author_name.as_str()
        } else {
            "Tie"
        };
        output.push_str(&format!(
            "{:<20} {:<width$.1} {:<width$.1} {}\n",
            label, left, right, winner
        ));
    }

    output.push_str(&format!(
        "\n{:<20} {:<width$} {:<width$}\n",
        "Scored commits", a.scored_commit_count, b.scored_commit_count
    ));
    output.push_str(&format!(
        "{:<20} {:<width$} {:<width$}\n",
        "Trend",
        a.trend.direction.to_string(),
        b.trend.direction.to_string()
    ));
    output
}

pub fn format_report(report: &AnalysisReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Pretty => format_pretty(report),
        OutputFormat::Json => to_json(report),
        OutputFormat::Markdown => format_markdown(report),
    }
}

pub fn format_estimate(estimate: &CostEstimate, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(estimate),
        OutputFormat::Pretty | OutputFormat::Markdown => format!(
            "Commits: {} total, {} cached, {} to analyze\n\
             Estimated LLM calls: {}\n\
             Estimated tokens: {}\n\
             Estimated cost: ${:.4} (${:.4} per commit)\n",
            estimate.total_commits,
            estimate.cached_commits,
            estimate.to_analyze,
            estimate.estimated_llm_calls,
            estimate.estimated_tokens,
            estimate.estimated_cost,
            estimate.cost_per_commit
        ),
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("Error: {}", e))
}

fn format_date_range(range: &Option<DateRange>) -> String {
    match range {
        Some(range) => format!(
            "{} to {}",
            range.start.format("%Y-%m-%d"),
            range.end.format("%Y-%m-%d")
        ),
        None => "n/a".to_string(),
    }
}

fn format_pretty(report: &AnalysisReport) -> String {
    let meta = &report.metadata;
    let summary = &report.summary;
    let mut output = String::new();

    output.push_str(&format!("Repository: {}\n", meta.repository_path.display()));
    output.push_str(&format!(
        "Commits: {} total, {} analyzed, {} cached, {} skipped",
        meta.total_commits, meta.analyzed_commits, meta.cached_commits, meta.skipped_commits
    ));
    if meta.failed_commits > 0 {
        output.push_str(&format!(", {} failed", meta.failed_commits));
    }
    output.push('\n');
    output.push_str(&format!(
        "Model: {}/{} ({} tokens)\n",
        meta.llm_provider, meta.llm_model, meta.tokens_used
    ));
    output.push_str(&format!("Period: {}\n\n", format_date_range(&summary.date_range)));

    output.push_str(&format!(
        "Average Score: {:.1}  Median: {:.1}  Top: {}\n\n",
        summary.average_score,
        summary.median_score,
        summary.top_performer.as_deref().unwrap_or("n/a")
    ));

    if report.authors.is_empty() && !report.commit_scores.is_empty() {
        output.push_str("Commits:\n");
        for score in &report.commit_scores {
            output.push_str(&format!(
                "  {}  {:>5.1}  {}\n",
                short_sha(&score.commit_hash),
                score.overall_score(),
                score.reasoning
            ));
        }
        return output;
    }

    output.push_str("Authors:\n");
    for (rank, author) in report.authors.iter().enumerate() {
        let score = &author.score;
        output.push_str(&format!(
            "\n  {}. {} <{}>  {:.1} ({})\n",
            rank + 1,
            score.author_name,
            score.author_email,
            score.overall_score,
            score.trend.direction
        ));
        output.push_str(&format!(
            "     {} commits ({} scored, {} skipped), +{} -{}, {} active days\n",
            score.commit_count,
            score.scored_commit_count,
            score.skipped_commit_count,
            author.contribution.total_additions,
            author.contribution.total_deletions,
            author.contribution.active_days
        ));
        for dimension in Dimension::ALL {
            output.push_str(&format!(
                "     {:<20} {:>5.1}\n",
                dimension.name(),
                score.dimension_scores.get(dimension).score
            ));
        }
        if !score.trend.sparkline.is_empty() {
            let points: Vec<String> = score
                .trend
                .sparkline
                .iter()
                .map(|v| format!("{:.0}", v))
                .collect();
            output.push_str(&format!("     Trend: {}\n", points.join(" -> ")));
        }
        for flag in &score.flags {
            output.push_str(&format!("     ! {}\n", flag.message));
        }
        for highlight in &author.highlights {
            output.push_str(&format!("     + {}\n", highlight));
        }
        for recommendation in &author.recommendations {
            output.push_str(&format!("     - {}\n", recommendation));
        }
    }

    output
}

fn format_markdown(report: &AnalysisReport) -> String {
    let meta = &report.metadata;
    let summary = &report.summary;
    let mut output = String::new();

    output.push_str(&format!(
        "# GitPulse Report\n\n**Repository**: `{}`\n**Period**: {}\n**Model**: {}/{}\n\n",
        meta.repository_path.display(),
        format_date_range(&summary.date_range),
        meta.llm_provider,
        meta.llm_model
    ));

    output.push_str("## Summary\n\n| Metric | Value |\n|--------|-------|\n");
    output.push_str(&format!("| Authors | {} |\n", summary.total_authors));
    output.push_str(&format!("| Average score | {:.1} |\n", summary.average_score));
    output.push_str(&format!("| Median score | {:.1} |\n", summary.median_score));
    output.push_str(&format!(
        "| Top performer | {} |\n",
        summary.top_performer.as_deref().unwrap_or("n/a")
    ));
    output.push_str(&format!(
        "| Commits | {} total, {} analyzed, {} cached, {} skipped, {} failed |\n\n",
        meta.total_commits,
        meta.analyzed_commits,
        meta.cached_commits,
        meta.skipped_commits,
        meta.failed_commits
    ));

    output.push_str("## Authors\n\n| Author | Score | Trend | Commits |");
    for dimension in Dimension::ALL {
        output.push_str(&format!(" {} |", dimension.name()));
    }
    output.push_str("\n|--------|-------|-------|---------|");
    for _ in Dimension::ALL {
        output.push_str("------|");
    }
    output.push('\n');

    for author in &report.authors {
        let score = &author.score;
        output.push_str(&format!(
            "| {} | {:.1} | {} | {} |",
            score.author_name, score.overall_score, score.trend.direction, score.commit_count
        ));
        for dimension in Dimension::ALL {
            output.push_str(&format!(" {:.1} |", score.dimension_scores.get(dimension).score));
        }
        output.push('\n');
    }
    output.push('\n');

    for author in &report.authors {
        if author.highlights.is_empty()
            && author.recommendations.is_empty()
            && author.score.flags.is_empty()
        {
            continue;
        }
        output.push_str(&format!("### {}\n\n", author.score.author_name));
        for highlight in &author.highlights {
            output.push_str(&format!("- {}\n", highlight));
        }
        for recommendation in &author.recommendations {
            output.push_str(&format!("- *Recommendation*: {}\n", recommendation));
        }
        for flag in &author.score.flags {
            output.push_str(&format!("- *Flag*: {}\n", flag.message));
        }
        output.push('\n');
    }

    output
}
