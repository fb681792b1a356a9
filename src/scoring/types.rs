//! Core types for commit and author scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::dimensions::{weighted_combine, Dimension, DimensionWeight};

/// A named component of a dimension score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    pub name: String,
    pub score: f64,
    pub weight: f64,
}

/// Score for one dimension (0-100) with its breakdown and rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: f64,
    #[serde(default)]
    pub sub_scores: Vec<SubScore>,
    #[serde(default)]
    pub reasoning: String,
}

impl DimensionScore {
    pub fn new(score: f64, reasoning: impl Into<String>) -> Self {
        Self {
            score,
            sub_scores: Vec::new(),
            reasoning: reasoning.into(),
        }
    }

    pub fn with_sub_scores(mut self, sub_scores: Vec<SubScore>) -> Self {
        self.sub_scores = sub_scores;
        self
    }
}

/// The four dimension scores of a commit or author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub code_quality: DimensionScore,
    pub complexity_impact: DimensionScore,
    pub commit_discipline: DimensionScore,
    pub collaboration: DimensionScore,
}

impl DimensionScores {
    /// All four dimensions at the same score and rationale.
    pub fn uniform(score: f64, reasoning: &str) -> Self {
        Self::from_fn(|_| DimensionScore::new(score, reasoning))
    }

    pub fn from_fn(mut f: impl FnMut(Dimension) -> DimensionScore) -> Self {
        Self {
            code_quality: f(Dimension::CodeQuality),
            complexity_impact: f(Dimension::ComplexityImpact),
            commit_discipline: f(Dimension::CommitDiscipline),
            collaboration: f(Dimension::Collaboration),
        }
    }

    pub fn get(&self, dimension: Dimension) -> &DimensionScore {
        match dimension {
            Dimension::CodeQuality => &self.code_quality,
            Dimension::ComplexityImpact => &self.complexity_impact,
            Dimension::CommitDiscipline => &self.commit_discipline,
            Dimension::Collaboration => &self.collaboration,
        }
    }
}

/// Kind of annotation attached to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlagKind {
    OutlierHigh,
    OutlierLow,
    Skipped,
    Batched,
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFlag {
    pub kind: FlagKind,
    pub message: String,
}

impl ScoreFlag {
    pub fn new(kind: FlagKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Where a score came from and what it cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetadata {
    pub provider: String,
    pub model: String,
    pub tokens_used: u64,
    pub timestamp: DateTime<Utc>,
    /// Rubric hash in force when the score was produced.
    pub rubric_hash: String,
}

impl ScoreMetadata {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            tokens_used,
            timestamp: Utc::now(),
            rubric_hash: String::new(),
        }
    }
}

/// Score of a single commit.
///
/// The overall score is derived from the dimensions and cannot be set directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitScore {
    pub commit_hash: String,
    pub dimensions: DimensionScores,
    overall_score: f64,
    #[serde(default)]
    pub flags: Vec<ScoreFlag>,
    #[serde(default)]
    pub reasoning: String,
    pub metadata: ScoreMetadata,
}

impl CommitScore {
    pub fn new(
        commit_hash: impl Into<String>,
        dimensions: DimensionScores,
        reasoning: impl Into<String>,
        metadata: ScoreMetadata,
        weights: &DimensionWeight,
    ) -> Self {
        let overall_score = weighted_combine(&dimensions, weights);
        Self {
            commit_hash: commit_hash.into(),
            dimensions,
            overall_score,
            flags: Vec::new(),
            reasoning: reasoning.into(),
            metadata,
        }
    }

    /// All-zero score for a commit that never reaches the oracle.
    pub fn unscored(commit_hash: impl Into<String>, reason: &str) -> Self {
        let mut score = Self::new(
            commit_hash,
            DimensionScores::uniform(0.0, "Skipped"),
            format!("Commit classified as {}, not scored", reason),
            ScoreMetadata::new("none", "none", 0),
            &DimensionWeight::default(),
        );
        score.add_flag(FlagKind::Skipped, format!("Classified as {}", reason));
        score
    }

    pub fn overall_score(&self) -> f64 {
        self.overall_score
    }

    /// Recompute the overall score under different dimension weights.
    pub fn reweigh(&mut self, weights: &DimensionWeight) {
        self.overall_score = weighted_combine(&self.dimensions, weights);
    }

    pub fn add_flag(&mut self, kind: FlagKind, message: impl Into<String>) {
        if !self.has_flag(kind) {
            self.flags.push(ScoreFlag::new(kind, message));
        }
    }

    pub fn has_flag(&self, kind: FlagKind) -> bool {
        self.flags.iter().any(|f| f.kind == kind)
    }

    pub fn is_skipped(&self) -> bool {
        self.has_flag(FlagKind::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Improving => write!(f, "improving"),
            Self::Stable => write!(f, "stable"),
            Self::Declining => write!(f, "declining"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// Up to four chronological segment averages.
    pub sparkline: Vec<f64>,
}

impl Trend {
    pub fn stable(sparkline: Vec<f64>) -> Self {
        Self {
            direction: TrendDirection::Stable,
            sparkline,
        }
    }
}

/// Average score over one calendar slice of an author's activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodScore {
    pub period_index: usize,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub average_score: f64,
    pub commit_count: usize,
}

/// Aggregated score for one author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorScore {
    pub author_name: String,
    pub author_email: String,
    pub overall_score: f64,
    pub dimension_scores: DimensionScores,
    pub commit_count: usize,
    pub scored_commit_count: usize,
    pub skipped_commit_count: usize,
    pub trend: Trend,
    pub period_scores: Vec<PeriodScore>,
    pub flags: Vec<ScoreFlag>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::dimension_scores;

    #[test]
    fn overall_score_follows_dimensions() {
        let score = CommitScore::new(
            "abc123",
            dimension_scores(80.0, 60.0, 40.0, 20.0),
            "ok",
            ScoreMetadata::new("test", "mock", 10),
            &DimensionWeight::uniform(),
        );

        assert!((score.overall_score() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn reweigh_recomputes_overall() {
        let mut score = CommitScore::new(
            "abc123",
            dimension_scores(80.0, 60.0, 40.0, 20.0),
            "ok",
            ScoreMetadata::new("test", "mock", 10),
            &DimensionWeight::uniform(),
        );

        score.reweigh(&DimensionWeight::new(0.0, 0.0, 0.0, 1.0));

        assert!((score.overall_score() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn unscored_is_zero_and_flagged() {
        let score = CommitScore::unscored("abc123", "skipped");

        assert_eq!(score.overall_score(), 0.0);
        assert!(score.is_skipped());
        assert_eq!(score.metadata.provider, "none");
        for dimension in Dimension::ALL {
            assert_eq!(score.dimensions.get(dimension).score, 0.0);
        }
    }

    #[test]
    fn flags_are_not_duplicated() {
        let mut score = CommitScore::unscored("abc123", "mechanical");
        score.add_flag(FlagKind::Skipped, "again");

        assert_eq!(score.flags.len(), 1);
    }

    #[test]
    fn commit_score_serialization() {
        let score = CommitScore::new(
            "abc123",
            dimension_scores(70.0, 70.0, 70.0, 70.0),
            "consistent",
            ScoreMetadata::new("claude", "sonnet", 1200),
            &DimensionWeight::uniform(),
        );

        let json = serde_json::to_string(&score).unwrap();
        let restored: CommitScore = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, score);
        assert!(json.contains("\"overall_score\""));
    }
}
