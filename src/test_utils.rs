//! Shared test utilities for creating test fixtures.

use chrono::{DateTime, TimeZone, Utc};

use crate::models::{AuthorInfo, CommitDiff, CommitInfo, FileDiff, FileStatus};
use crate::scoring::{
    CommitScore, DimensionScore, DimensionScores, DimensionWeight, ScoreMetadata,
};

/// Dimension scores with empty sub-scores.
pub fn dimension_scores(
    code_quality: f64,
    complexity_impact: f64,
    commit_discipline: f64,
    collaboration: f64,
) -> DimensionScores {
    DimensionScores {
        code_quality: DimensionScore::new(code_quality, "test"),
        complexity_impact: DimensionScore::new(complexity_impact, "test"),
        commit_discipline: DimensionScore::new(commit_discipline, "test"),
        collaboration: DimensionScore::new(collaboration, "test"),
    }
}

/// A commit score with every dimension at `value`.
pub fn commit_score(hash: &str, value: f64) -> CommitScore {
    CommitScore::new(
        hash,
        dimension_scores(value, value, value, value),
        "test",
        ScoreMetadata::new("test", "mock", 100),
        &DimensionWeight::uniform(),
    )
}

pub fn fixed_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}

/// A one-file commit by Ada with `changes` added lines.
pub fn make_diff(hash: &str, message: &str, changes: usize) -> CommitDiff {
    make_diff_by(hash, message, changes, "Ada", "ada@example.com")
}

pub fn make_diff_by(
    hash: &str,
    message: &str,
    changes: usize,
    name: &str,
    email: &str,
) -> CommitDiff {
    let commit = CommitInfo::new(hash, AuthorInfo::new(name, email), fixed_date(), message)
        .with_parents(vec!["parent".to_string()]);
    let file = FileDiff::new("src/lib.rs", FileStatus::Modified, changes, 0)
        .with_content(format!("+{}", "x\n+".repeat(changes)));
    CommitDiff::new(commit, vec![file])
}

pub fn make_diff_at(hash: &str, date: DateTime<Utc>, changes: usize) -> CommitDiff {
    let mut diff = make_diff(hash, "Update code", changes);
    diff.commit.date = date;
    diff
}

/// A commit touching `file_count` files.
pub fn make_diff_with_files(hash: &str, file_count: usize, changes_per_file: usize) -> CommitDiff {
    let commit = CommitInfo::new(
        hash,
        AuthorInfo::new("Ada", "ada@example.com"),
        fixed_date(),
        "Rework modules",
    )
    .with_parents(vec!["parent".to_string()]);
    let files = (0..file_count)
        .map(|i| FileDiff::new(format!("src/mod_{}.rs", i), FileStatus::Modified, changes_per_file, 0))
        .collect();
    CommitDiff::new(commit, files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_diff() {
        let diff = make_diff("abc1234", "Add feature", 12);
        assert_eq!(diff.hash(), "abc1234");
        assert_eq!(diff.effective_changes(), 12);
        assert!(!diff.commit.is_merge());
    }

    #[test]
    fn test_commit_score() {
        let score = commit_score("abc1234", 64.0);
        assert!((score.overall_score() - 64.0).abs() < 1e-9);
    }
}
