//! The four scoring dimensions and their weighting.

use serde::{Deserialize, Serialize};

use crate::scoring::types::DimensionScores;

/// One of the four fixed scoring axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    CodeQuality,
    ComplexityImpact,
    CommitDiscipline,
    Collaboration,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::CodeQuality,
        Dimension::ComplexityImpact,
        Dimension::CommitDiscipline,
        Dimension::Collaboration,
    ];

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CodeQuality => "Code Quality",
            Self::ComplexityImpact => "Complexity & Impact",
            Self::CommitDiscipline => "Commit Discipline",
            Self::Collaboration => "Collaboration",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::CodeQuality => "Readability, maintainability, best practices, and consistency",
            Self::ComplexityImpact => "Scope, technical complexity, business impact, and test coverage",
            Self::CommitDiscipline => "Message quality, commit size, atomicity, and frequency",
            Self::Collaboration => "Cross-module contributions, documentation, and mentoring",
        }
    }

    /// Key used in oracle responses.
    pub fn response_key(&self) -> &'static str {
        match self {
            Self::CodeQuality => "codeQuality",
            Self::ComplexityImpact => "complexityImpact",
            Self::CommitDiscipline => "commitDiscipline",
            Self::Collaboration => "collaboration",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Relative weight of each dimension in the overall score.
///
/// Weights need not sum to 1: every combination divides by the sum actually used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionWeight {
    pub code_quality: f64,
    pub complexity_impact: f64,
    pub commit_discipline: f64,
    pub collaboration: f64,
}

impl Default for DimensionWeight {
    fn default() -> Self {
        Self {
            code_quality: 0.30,
            complexity_impact: 0.25,
            commit_discipline: 0.25,
            collaboration: 0.20,
        }
    }
}

impl DimensionWeight {
    pub fn new(
        code_quality: f64,
        complexity_impact: f64,
        commit_discipline: f64,
        collaboration: f64,
    ) -> Self {
        Self {
            code_quality,
            complexity_impact,
            commit_discipline,
            collaboration,
        }
    }

    /// Equal weight on every dimension.
    pub fn uniform() -> Self {
        Self::new(1.0, 1.0, 1.0, 1.0)
    }

    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::CodeQuality => self.code_quality,
            Dimension::ComplexityImpact => self.complexity_impact,
            Dimension::CommitDiscipline => self.commit_discipline,
            Dimension::Collaboration => self.collaboration,
        }
    }

    pub fn total(&self) -> f64 {
        Dimension::ALL.iter().map(|d| self.get(*d)).sum()
    }
}

/// Combine four dimension scores into one overall score.
///
/// Returns 0 when every weight is 0.
pub fn weighted_combine(scores: &DimensionScores, weights: &DimensionWeight) -> f64 {
    let total_weight = weights.total();
    if total_weight <= 0.0 {
        return 0.0;
    }

    let weighted: f64 = Dimension::ALL
        .iter()
        .map(|d| scores.get(*d).score * weights.get(*d))
        .sum();

    weighted / total_weight
}
