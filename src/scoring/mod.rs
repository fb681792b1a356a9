//! Score types, dimension weighting and author-level aggregation.

pub mod aggregator;
pub mod dimensions;
pub mod normalizer;
pub mod types;

pub use aggregator::{aggregate, AggregationOptions};
pub use dimensions::{weighted_combine, Dimension, DimensionWeight};
pub use normalizer::{clamp_score, normalize_scores, round_score};
pub use types::{
    AuthorScore, CommitScore, DimensionScore, DimensionScores, FlagKind, PeriodScore, ScoreFlag,
    ScoreMetadata, SubScore, Trend, TrendDirection,
};
