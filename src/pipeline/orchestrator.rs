//! Bounded-concurrency scoring of work units.
//!
//! Units that need the oracle run on a [`WorkerPool`]; each task writes its own
//! scores to the cache and returns a [`UnitOutcome`], so one failing unit never
//! affects another. Progress events are emitted from the calling thread only.

use log::{debug, warn};
use serde::Serialize;

use crate::cache::ScoreCache;
use crate::cancel::CancelToken;
use crate::models::CommitDiff;
use crate::oracle::{DiffPayload, OracleError, OracleScore, ScoringOracle};
use crate::pipeline::batch::{UnitKind, WorkUnit};
use crate::pipeline::pool::WorkerPool;
use crate::scoring::{CommitScore, DimensionWeight, FlagKind, ScoreMetadata};

/// Shortest hash prefix accepted when matching batch results to commits.
const MIN_HASH_PREFIX: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Extracting,
    Scoring,
    Aggregating,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extracting => write!(f, "extracting"),
            Self::Scoring => write!(f, "scoring"),
            Self::Aggregating => write!(f, "aggregating"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(phase: Phase, current: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            phase,
            current,
            total,
            message: message.into(),
        }
    }
}

/// Result of scoring one work unit.
#[derive(Debug)]
pub enum UnitOutcome {
    Scored {
        scores: Vec<CommitScore>,
        tokens_used: u64,
        cache_failures: usize,
    },
    /// Batch response that left out some members.
    Partial {
        scores: Vec<CommitScore>,
        missing: Vec<String>,
        tokens_used: u64,
        cache_failures: usize,
    },
    Failed {
        hashes: Vec<String>,
        error: String,
    },
}

/// Commits of one unit that could not be scored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub hashes: Vec<String>,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ScoringOutcome {
    /// Synthetic and oracle scores, at most one per commit.
    pub scores: Vec<CommitScore>,
    pub failures: Vec<UnitFailure>,
    pub tokens_used: u64,
    /// Calls made by units that ran; cancelled units are not counted.
    pub oracle_calls: usize,
    pub cache_write_failures: usize,
    /// Oracle units that ran to completion (successfully or not).
    pub completed_units: usize,
    pub total_units: usize,
    /// Units never started because the run was cancelled.
    pub cancelled_units: usize,
}

impl ScoringOutcome {
    pub fn failed_hashes(&self) -> Vec<String> {
        self.failures
            .iter()
            .flat_map(|f| f.hashes.iter().cloned())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.cancelled_units == 0
    }
}

#[derive(Debug, Clone)]
pub struct ScoringSettings {
    pub concurrency: usize,
    pub max_tokens_per_diff: usize,
    pub weights: DimensionWeight,
    pub rubric_hash: String,
}

pub struct Orchestrator<'a, O: ?Sized, C: ?Sized> {
    oracle: &'a O,
    cache: &'a C,
    settings: ScoringSettings,
    cancel: Option<CancelToken>,
}

impl<'a, O, C> Orchestrator<'a, O, C>
where
    O: ScoringOracle + ?Sized,
    C: ScoreCache + ?Sized,
{
    pub fn new(oracle: &'a O, cache: &'a C, settings: ScoringSettings) -> Self {
        Self {
            oracle,
            cache,
            settings,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Score every unit. Never fails as a whole; failures are reported per unit.
    pub fn run(
        &self,
        units: Vec<WorkUnit<'_>>,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> ScoringOutcome {
        let mut outcome = ScoringOutcome::default();

        let (oracle_units, synthetic_units): (Vec<_>, Vec<_>) =
            units.into_iter().partition(|u| u.needs_oracle());

        for unit in &synthetic_units {
            for diff in unit.members() {
                outcome
                    .scores
                    .push(CommitScore::unscored(diff.hash(), &unit.classification.to_string()));
            }
        }

        let total = oracle_units.len();
        outcome.total_units = total;
        let planned_calls: Vec<usize> = oracle_units.iter().map(calls_for).collect();
        let labels: Vec<String> = oracle_units.iter().map(|u| u.label()).collect();

        let mut pool = WorkerPool::new(self.settings.concurrency);
        if let Some(token) = &self.cancel {
            pool = pool.with_cancel(token.clone());
        }

        let mut completed = 0;
        let results = pool.run(
            oracle_units,
            |_, unit| self.score_unit(&unit),
            |index, _| {
                completed += 1;
                progress(ProgressEvent::new(
                    Phase::Scoring,
                    completed,
                    total,
                    labels[index].clone(),
                ));
            },
        );

        outcome.completed_units = results.len();
        outcome.cancelled_units = total - results.len();
        outcome.oracle_calls = results.iter().map(|(index, _)| planned_calls[*index]).sum();

        for (_, unit_outcome) in results {
            match unit_outcome {
                UnitOutcome::Scored {
                    scores,
                    tokens_used,
                    cache_failures,
                } => {
                    outcome.scores.extend(scores);
                    outcome.tokens_used += tokens_used;
                    outcome.cache_write_failures += cache_failures;
                }
                UnitOutcome::Partial {
                    scores,
                    missing,
                    tokens_used,
                    cache_failures,
                } => {
                    outcome.scores.extend(scores);
                    outcome.tokens_used += tokens_used;
                    outcome.cache_write_failures += cache_failures;
                    outcome.failures.push(UnitFailure {
                        hashes: missing,
                        error: "missing from batch response".to_string(),
                    });
                }
                UnitOutcome::Failed { hashes, error } => {
                    outcome.failures.push(UnitFailure { hashes, error });
                }
            }
        }

        outcome
    }

    /// Runs on a worker thread.
    fn score_unit(&self, unit: &WorkUnit<'_>) -> UnitOutcome {
        let members = unit.members();

        let result = if unit.kind == UnitKind::Batch && members.len() > 1 {
            self.score_batch(members)
        } else {
            self.score_each(members)
        };

        let (scores, missing) = match result {
            Ok(scored) => scored,
            Err(e) => {
                warn!("Scoring failed for {}: {}", unit.label(), e);
                return UnitOutcome::Failed {
                    hashes: members.iter().map(|d| d.hash().to_string()).collect(),
                    error: e.to_string(),
                };
            }
        };

        let tokens_used: u64 = scores.iter().map(|s| s.metadata.tokens_used).sum();
        let cache_failures = self.write_through(&scores);

        if missing.is_empty() {
            UnitOutcome::Scored {
                scores,
                tokens_used,
                cache_failures,
            }
        } else {
            warn!(
                "Batch response omitted {} of {} commits",
                missing.len(),
                members.len()
            );
            UnitOutcome::Partial {
                scores,
                missing,
                tokens_used,
                cache_failures,
            }
        }
    }

    fn score_each(
        &self,
        members: &[&CommitDiff],
    ) -> Result<(Vec<CommitScore>, Vec<String>), OracleError> {
        let mut scores = Vec::with_capacity(members.len());
        for diff in members {
            let payload = DiffPayload::new(diff, self.settings.max_tokens_per_diff);
            let raw = self.oracle.score_one(&payload)?;
            scores.push(self.finish(raw, &payload, false));
        }
        Ok((scores, Vec::new()))
    }

    fn score_batch(
        &self,
        members: &[&CommitDiff],
    ) -> Result<(Vec<CommitScore>, Vec<String>), OracleError> {
        let budget = self.settings.max_tokens_per_diff / members.len();
        let payloads: Vec<DiffPayload> = members
            .iter()
            .map(|diff| DiffPayload::new(diff, budget))
            .collect();

        let mut returned: Vec<Option<OracleScore>> =
            self.oracle.score_batch(&payloads)?.into_iter().map(Some).collect();

        let mut scores = Vec::new();
        let mut missing = Vec::new();
        for payload in &payloads {
            let found = returned.iter_mut().find(|slot| {
                slot.as_ref()
                    .is_some_and(|r| hashes_match(&r.commit_hash, payload.hash()))
            });
            match found.and_then(Option::take) {
                Some(raw) => scores.push(self.finish(raw, payload, true)),
                None => missing.push(payload.hash().to_string()),
            }
        }
        Ok((scores, missing))
    }

    /// Turn a raw oracle score into a commit score under the current weights.
    fn finish(&self, raw: OracleScore, payload: &DiffPayload, batched: bool) -> CommitScore {
        let mut metadata =
            ScoreMetadata::new(self.oracle.provider(), self.oracle.model(), raw.tokens_used);
        metadata.rubric_hash = self.settings.rubric_hash.clone();

        let mut score = CommitScore::new(
            payload.hash(),
            raw.dimensions,
            raw.reasoning,
            metadata,
            &self.settings.weights,
        );
        if payload.truncated {
            score.add_flag(FlagKind::Truncated, "Diff was truncated to fit the token budget");
        }
        if batched {
            score.add_flag(FlagKind::Batched, "Scored as part of a batch");
        }
        score
    }

    fn write_through(&self, scores: &[CommitScore]) -> usize {
        let mut failures = 0;
        for score in scores {
            match self
                .cache
                .set(&score.commit_hash, score, &self.settings.rubric_hash)
            {
                Ok(()) => debug!("Cached score for {}", score.commit_hash),
                Err(e) => {
                    warn!("Failed to cache score for {}: {}", score.commit_hash, e);
                    failures += 1;
                }
            }
        }
        failures
    }
}

fn calls_for(unit: &WorkUnit<'_>) -> usize {
    if unit.kind == UnitKind::Batch && unit.members().len() > 1 {
        1
    } else {
        unit.members().len()
    }
}

/// Whether an oracle-reported hash refers to `commit_hash`.
fn hashes_match(reported: &str, commit_hash: &str) -> bool {
    let reported = reported.trim();
    if reported.eq_ignore_ascii_case(commit_hash) {
        return true;
    }
    if reported.len().min(commit_hash.len()) < MIN_HASH_PREFIX {
        return false;
    }
    let reported = reported.to_ascii_lowercase();
    let commit_hash = commit_hash.to_ascii_lowercase();
    reported.starts_with(&commit_hash) || commit_hash.starts_with(&reported)
}
