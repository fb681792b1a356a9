//! Response parsing for LLM commit scoring.

use serde::Deserialize;

use crate::scoring::{Dimension, DimensionScore, DimensionScores, SubScore};
use crate::utils::extract_json_str;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubScore {
    name: String,
    score: f64,
    weight: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDimension {
    score: f64,
    #[serde(default)]
    sub_scores: Vec<RawSubScore>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommitScore {
    code_quality: RawDimension,
    complexity_impact: RawDimension,
    commit_discipline: RawDimension,
    collaboration: RawDimension,
    #[serde(default)]
    overall_reasoning: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBatchEntry {
    commit_hash: String,
    #[serde(flatten)]
    score: RawCommitScore,
}

#[derive(Debug, Deserialize)]
struct RawBatchResponse {
    scores: Vec<RawBatchEntry>,
}

/// Parse error types.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("No JSON found in response")]
    NoJson,
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("{field} score {value} out of range 0-100")]
    ScoreOutOfRange { field: String, value: f64 },
    #[error("{field} weight {value} out of range 0-1")]
    WeightOutOfRange { field: String, value: f64 },
}

/// Dimension scores and overall rationale for one commit.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedScore {
    pub dimensions: DimensionScores,
    pub reasoning: String,
}

/// Parse a single-commit response.
pub fn parse_commit_response(response: &str) -> Result<ParsedScore, ParseError> {
    let json_str = extract_json_str(response).ok_or(ParseError::NoJson)?;
    let raw: RawCommitScore =
        serde_json::from_str(json_str).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    convert(raw)
}

/// Parse a batch response into `(commit hash, score)` pairs in response order.
pub fn parse_batch_response(response: &str) -> Result<Vec<(String, ParsedScore)>, ParseError> {
    let json_str = extract_json_str(response).ok_or(ParseError::NoJson)?;
    let raw: RawBatchResponse =
        serde_json::from_str(json_str).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    raw.scores
        .into_iter()
        .map(|entry| Ok((entry.commit_hash, convert(entry.score)?)))
        .collect()
}

fn convert(raw: RawCommitScore) -> Result<ParsedScore, ParseError> {
    let RawCommitScore {
        code_quality,
        complexity_impact,
        commit_discipline,
        collaboration,
        overall_reasoning,
    } = raw;

    Ok(ParsedScore {
        dimensions: DimensionScores {
            code_quality: convert_dimension(Dimension::CodeQuality, code_quality)?,
            complexity_impact: convert_dimension(Dimension::ComplexityImpact, complexity_impact)?,
            commit_discipline: convert_dimension(Dimension::CommitDiscipline, commit_discipline)?,
            collaboration: convert_dimension(Dimension::Collaboration, collaboration)?,
        },
        reasoning: overall_reasoning,
    })
}

fn convert_dimension(dimension: Dimension, raw: RawDimension) -> Result<DimensionScore, ParseError> {
    check_score(dimension.response_key(), raw.score)?;

    let sub_scores = raw
        .sub_scores
        .into_iter()
        .map(|sub| {
            let field = format!("{}.{}", dimension.response_key(), sub.name);
            check_score(&field, sub.score)?;
            if !(0.0..=1.0).contains(&sub.weight) {
                return Err(ParseError::WeightOutOfRange {
                    field,
                    value: sub.weight,
                });
            }
            Ok(SubScore {
                name: sub.name,
                score: sub.score,
                weight: sub.weight,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DimensionScore::new(raw.score, raw.reasoning).with_sub_scores(sub_scores))
}

fn check_score(field: &str, value: f64) -> Result<(), ParseError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ParseError::ScoreOutOfRange {
            field: field.to_string(),
            value,
        })
    }
}
