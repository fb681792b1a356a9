//! Combine commit-level scores into one author-level score.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::CommitDiff;
use crate::scoring::dimensions::{weighted_combine, Dimension, DimensionWeight};
use crate::scoring::types::{
    AuthorScore, CommitScore, DimensionScore, DimensionScores, FlagKind, PeriodScore, ScoreFlag,
    Trend, TrendDirection,
};
use crate::utils::short_sha;

/// Minimum scored commits before outliers, trend and periods are computed.
const MIN_COMMITS_FOR_STATISTICS: usize = 4;
const SEGMENTS: usize = 4;
const TREND_THRESHOLD: f64 = 5.0;
const IQR_FACTOR: f64 = 1.5;
const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone)]
pub struct AggregationOptions {
    pub weights: DimensionWeight,
    pub time_decay: bool,
    pub time_decay_lambda: f64,
    /// Reference point for time decay.
    pub now: DateTime<Utc>,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            weights: DimensionWeight::default(),
            time_decay: false,
            time_decay_lambda: 0.01,
            now: Utc::now(),
        }
    }
}

/// A scorable commit with its date and aggregation weight.
struct Entry<'a> {
    score: &'a CommitScore,
    date: Option<DateTime<Utc>>,
    weight: f64,
}

/// Aggregate one author's commit scores.
///
/// Scores flagged as skipped are counted but excluded from every statistic.
pub fn aggregate(
    author_email: &str,
    author_name: &str,
    commit_scores: &[CommitScore],
    commit_diffs: &[CommitDiff],
    options: &AggregationOptions,
) -> AuthorScore {
    let diffs: HashMap<&str, &CommitDiff> = commit_diffs.iter().map(|d| (d.hash(), d)).collect();

    let skipped_count = commit_scores.iter().filter(|s| s.is_skipped()).count();
    let entries: Vec<Entry> = commit_scores
        .iter()
        .filter(|s| !s.is_skipped())
        .map(|score| {
            let diff = diffs.get(score.commit_hash.as_str());
            let effective_changes = diff.map(|d| d.effective_changes()).unwrap_or(1);
            let mut weight = (1.0 + effective_changes as f64).log2();
            if options.time_decay {
                if let Some(diff) = diff {
                    let days = (options.now - diff.commit.date).num_seconds() as f64
                        / SECONDS_PER_DAY;
                    weight *= (-options.time_decay_lambda * days).exp();
                }
            }
            Entry {
                score,
                date: diff.map(|d| d.commit.date),
                weight,
            }
        })
        .collect();

    if entries.is_empty() {
        return empty_author_score(author_email, author_name, commit_scores.len(), skipped_count);
    }

    let dimension_scores = weighted_dimension_scores(&entries);
    let overall_score = weighted_combine(&dimension_scores, &options.weights);

    let scored: Vec<&CommitScore> = entries.iter().map(|e| e.score).collect();
    let chronological = chronological(&entries, options.now);

    AuthorScore {
        author_name: author_name.to_string(),
        author_email: author_email.to_string(),
        overall_score,
        dimension_scores,
        commit_count: commit_scores.len(),
        scored_commit_count: entries.len(),
        skipped_commit_count: skipped_count,
        trend: analyze_trend(&scored, &chronological),
        period_scores: period_scores(&chronological),
        flags: detect_outliers(&scored),
    }
}

fn weighted_dimension_scores(entries: &[Entry]) -> DimensionScores {
    let total_weight: f64 = entries.iter().map(|e| e.weight).sum();
    DimensionScores::from_fn(|dimension: Dimension| {
        let score = if total_weight > 0.0 {
            entries
                .iter()
                .map(|e| e.score.dimensions.get(dimension).score * e.weight)
                .sum::<f64>()
                / total_weight
        } else {
            0.0
        };
        DimensionScore::new(score, format!("Aggregated from {} commits", entries.len()))
    })
}

/// Scores sorted by commit date; commits without a known diff sort as `now`.
fn chronological<'a>(
    entries: &[Entry<'a>],
    now: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, &'a CommitScore)> {
    let mut dated: Vec<_> = entries
        .iter()
        .map(|e| (e.date.unwrap_or(now), e.score))
        .collect();
    dated.sort_by_key(|(date, _)| *date);
    dated
}

/// Flag commits outside the interquartile fences.
pub fn detect_outliers(scores: &[&CommitScore]) -> Vec<ScoreFlag> {
    if scores.len() < MIN_COMMITS_FOR_STATISTICS {
        return Vec::new();
    }

    let mut sorted: Vec<f64> = scores.iter().map(|s| s.overall_score()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let q1 = sorted[(n as f64 * 0.25).floor() as usize];
    let q3 = sorted[(n as f64 * 0.75).floor() as usize];
    let iqr = q3 - q1;
    let lower = q1 - IQR_FACTOR * iqr;
    let upper = q3 + IQR_FACTOR * iqr;

    let mut flags = Vec::new();
    for score in scores {
        let overall = score.overall_score();
        let short = short_sha(&score.commit_hash);
        if overall < lower {
            flags.push(ScoreFlag::new(
                FlagKind::OutlierLow,
                format!(
                    "Commit {} scored {:.1} (below IQR lower bound {:.1})",
                    short, overall, lower
                ),
            ));
        } else if overall > upper {
            flags.push(ScoreFlag::new(
                FlagKind::OutlierHigh,
                format!(
                    "Commit {} scored {:.1} (above IQR upper bound {:.1})",
                    short, overall, upper
                ),
            ));
        }
    }
    flags
}

fn analyze_trend(scores: &[&CommitScore], chronological: &[(DateTime<Utc>, &CommitScore)]) -> Trend {
    if scores.len() < MIN_COMMITS_FOR_STATISTICS {
        return Trend::stable(scores.iter().map(|s| s.overall_score()).collect());
    }

    let n = chronological.len();
    let segment_size = n / SEGMENTS;
    let segments: Vec<f64> = (0..SEGMENTS)
        .map(|i| {
            let start = i * segment_size;
            let end = if i == SEGMENTS - 1 { n } else { start + segment_size };
            let segment = &chronological[start..end];
            segment.iter().map(|(_, s)| s.overall_score()).sum::<f64>() / segment.len() as f64
        })
        .collect();

    let first_half = (segments[0] + segments[1]) / 2.0;
    let second_half = (segments[2] + segments[3]) / 2.0;
    let delta = second_half - first_half;

    let direction = if delta > TREND_THRESHOLD {
        TrendDirection::Improving
    } else if delta < -TREND_THRESHOLD {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };

    Trend {
        direction,
        sparkline: segments,
    }
}

fn period_scores(chronological: &[(DateTime<Utc>, &CommitScore)]) -> Vec<PeriodScore> {
    if chronological.len() < MIN_COMMITS_FOR_STATISTICS {
        return Vec::new();
    }

    let (first, last) = match (chronological.first(), chronological.last()) {
        (Some((first, _)), Some((last, _))) => (*first, *last),
        _ => return Vec::new(),
    };
    let range_ms = (last - first).num_milliseconds();
    let period_ms = range_ms as f64 / SEGMENTS as f64;

    (0..SEGMENTS)
        .map(|i| {
            let start = first + Duration::milliseconds((i as f64 * period_ms) as i64);
            let end = if i == SEGMENTS - 1 {
                last
            } else {
                first + Duration::milliseconds(((i + 1) as f64 * period_ms) as i64)
            };
            let members: Vec<f64> = chronological
                .iter()
                .filter(|(date, _)| {
                    *date >= start && if i == SEGMENTS - 1 { *date <= end } else { *date < end }
                })
                .map(|(_, s)| s.overall_score())
                .collect();
            let average_score = if members.is_empty() {
                0.0
            } else {
                members.iter().sum::<f64>() / members.len() as f64
            };
            PeriodScore {
                period_index: i,
                start_date: start,
                end_date: end,
                average_score,
                commit_count: members.len(),
            }
        })
        .collect()
}

fn empty_author_score(
    email: &str,
    name: &str,
    commit_count: usize,
    skipped_count: usize,
) -> AuthorScore {
    AuthorScore {
        author_name: name.to_string(),
        author_email: email.to_string(),
        overall_score: 0.0,
        dimension_scores: DimensionScores::uniform(0.0, "No commits scored"),
        commit_count,
        scored_commit_count: 0,
        skipped_commit_count: skipped_count,
        trend: Trend::stable(Vec::new()),
        period_scores: Vec::new(),
        flags: Vec::new(),
    }
}
