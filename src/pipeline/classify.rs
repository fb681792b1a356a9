//! Commit classification by size and message.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::CommitDiff;

/// Subject prefixes of commits produced by tooling rather than authored work.
const MECHANICAL_PATTERNS: &[&str] = &[
    r"(?i)^merge (branch|pull request|remote)",
    r#"(?i)^revert ""#,
    r"(?i)^bump version",
    r"(?i)^auto-?generated",
    r"(?i)^\[skip ci\]",
    r"(?i)^chore\(deps\)",
    r"(?i)^chore\(release\)",
];

static MECHANICAL_RE: OnceLock<Vec<Regex>> = OnceLock::new();

fn mechanical_patterns() -> &'static [Regex] {
    MECHANICAL_RE.get_or_init(|| {
        MECHANICAL_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// How a commit is treated by the scoring pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Merge commit, never scored.
    Skipped,
    /// Tooling-generated or empty change, never scored.
    Mechanical,
    Small,
    Normal,
    Large,
}

impl Classification {
    /// Whether commits of this class go to the oracle.
    pub fn is_scored(&self) -> bool {
        !matches!(self, Self::Skipped | Self::Mechanical)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::Mechanical => write!(f, "mechanical"),
            Self::Small => write!(f, "small"),
            Self::Normal => write!(f, "normal"),
            Self::Large => write!(f, "large"),
        }
    }
}

/// Thresholds used by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub small_commit_threshold: usize,
    pub large_commit_threshold: usize,
    pub skip_merge_commits: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            small_commit_threshold: 10,
            large_commit_threshold: 500,
            skip_merge_commits: true,
        }
    }
}

/// Classify a commit. Pure: depends only on the diff and the thresholds.
pub fn classify(diff: &CommitDiff, config: &ClassifierConfig) -> Classification {
    if config.skip_merge_commits && diff.commit.is_merge() {
        return Classification::Skipped;
    }

    if diff.files.is_empty() || is_mechanical_message(&diff.commit.message) {
        return Classification::Mechanical;
    }

    let changes = diff.effective_changes();
    if changes < config.small_commit_threshold {
        Classification::Small
    } else if changes > config.large_commit_threshold {
        Classification::Large
    } else {
        Classification::Normal
    }
}

pub fn is_mechanical_message(message: &str) -> bool {
    let message = message.trim_start();
    mechanical_patterns().iter().any(|re| re.is_match(message))
}
