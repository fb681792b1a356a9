//! The scoring pipeline: classify, batch, score with bounded concurrency, aggregate.

pub mod analyzer;
pub mod batch;
pub mod classify;
pub mod orchestrator;
pub mod pool;

pub use analyzer::{AnalysisError, Analyzer, AnalyzerSettings};
pub use batch::{estimate_llm_calls, group_into_units, UnitKind, WorkUnit, DEFAULT_BATCH_SIZE};
pub use classify::{classify, Classification, ClassifierConfig};
pub use orchestrator::{
    Orchestrator, Phase, ProgressEvent, ScoringOutcome, ScoringSettings, UnitFailure, UnitOutcome,
};
pub use pool::WorkerPool;
