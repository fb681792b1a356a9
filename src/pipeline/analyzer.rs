//! End-to-end analysis: extract, score, aggregate, report.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use log::{info, warn};

use crate::cache::ScoreCache;
use crate::cancel::CancelToken;
use crate::git::{CommitSource, GitError};
use crate::models::{AnalysisScope, AuthorInfo, CommitDiff};
use crate::oracle::ScoringOracle;
use crate::pipeline::batch::{estimate_llm_calls, group_into_units, DEFAULT_BATCH_SIZE};
use crate::pipeline::classify::ClassifierConfig;
use crate::pipeline::orchestrator::{Orchestrator, Phase, ProgressEvent, ScoringSettings};
use crate::report::{
    summarize, AnalysisReport, AuthorContribution, AuthorReport, CostEstimate, ReportMetadata,
};
use crate::scoring::{aggregate, AggregationOptions, CommitScore, DimensionWeight};

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_MAX_TOKENS_PER_DIFF: usize = 8000;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("{phase} failed after {completed}/{total} commits: {source}")]
    Extraction {
        phase: Phase,
        completed: usize,
        total: usize,
        #[source]
        source: GitError,
    },
    #[error(
        "{phase} incomplete: {completed}/{total} units finished, {} commits failed (first error: {first_error}). \
         Scored commits are cached; re-run to retry or pass --partial",
        .failed_hashes.len()
    )]
    ScoringIncomplete {
        phase: Phase,
        completed: usize,
        total: usize,
        failed_hashes: Vec<String>,
        first_error: String,
    },
    #[error("Cancelled during {phase}: {completed}/{total} finished, {remaining} not started")]
    Cancelled {
        phase: Phase,
        completed: usize,
        total: usize,
        remaining: usize,
    },
}

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub classifier: ClassifierConfig,
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_tokens_per_diff: usize,
    pub weights: DimensionWeight,
    pub time_decay: bool,
    pub time_decay_lambda: f64,
    /// Report without the commits the oracle failed on instead of failing the run.
    pub allow_partial: bool,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_tokens_per_diff: DEFAULT_MAX_TOKENS_PER_DIFF,
            weights: DimensionWeight::default(),
            time_decay: false,
            time_decay_lambda: 0.01,
            allow_partial: false,
        }
    }
}

/// Commits grouped under one author email, in first-seen order.
struct AuthorCommits<'a> {
    author: AuthorInfo,
    diffs: Vec<&'a CommitDiff>,
}

pub struct Analyzer<'a, S: ?Sized, O: ?Sized, C: ?Sized> {
    source: &'a S,
    oracle: &'a O,
    cache: &'a C,
    rubric_hash: String,
    settings: AnalyzerSettings,
    cancel: Option<CancelToken>,
}

impl<'a, S, O, C> Analyzer<'a, S, O, C>
where
    S: CommitSource + ?Sized,
    O: ScoringOracle + ?Sized,
    C: ScoreCache + ?Sized,
{
    pub fn new(
        source: &'a S,
        oracle: &'a O,
        cache: &'a C,
        rubric_hash: impl Into<String>,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            source,
            oracle,
            cache,
            rubric_hash: rubric_hash.into(),
            settings,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Project oracle usage without calling the oracle.
    pub fn estimate(&self, scope: &AnalysisScope) -> Result<CostEstimate, AnalysisError> {
        let diffs = self.extract(scope, &mut |_| {})?;
        let cached = self.cache.get_all(&self.rubric_hash);
        let to_analyze: Vec<&CommitDiff> = diffs
            .iter()
            .filter(|d| !cached.contains_key(d.hash()))
            .collect();

        let units = group_into_units(
            to_analyze.iter().copied(),
            &self.settings.classifier,
            self.settings.batch_size,
        );
        Ok(CostEstimate::new(
            diffs.len(),
            diffs.len() - to_analyze.len(),
            to_analyze.len(),
            estimate_llm_calls(&units),
        ))
    }

    pub fn analyze(
        &self,
        scope: &AnalysisScope,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<AnalysisReport, AnalysisError> {
        let diffs = self.extract(scope, progress)?;

        let mut by_hash = self.cache.get_all(&self.rubric_hash);
        let in_scope: HashSet<&str> = diffs.iter().map(CommitDiff::hash).collect();
        by_hash.retain(|hash, _| in_scope.contains(hash.as_str()));
        for score in by_hash.values_mut() {
            score.reweigh(&self.settings.weights);
        }
        let cached_commits = by_hash.len();
        info!(
            "{} of {} commits already scored under rubric {}",
            cached_commits,
            diffs.len(),
            self.rubric_hash
        );

        let units = group_into_units(
            diffs.iter().filter(|d| !by_hash.contains_key(d.hash())),
            &self.settings.classifier,
            self.settings.batch_size,
        );
        let skipped_commits: usize = units
            .iter()
            .filter(|u| !u.needs_oracle())
            .map(|u| u.members().len())
            .sum();

        let mut orchestrator = Orchestrator::new(
            self.oracle,
            self.cache,
            ScoringSettings {
                concurrency: self.settings.concurrency,
                max_tokens_per_diff: self.settings.max_tokens_per_diff,
                weights: self.settings.weights,
                rubric_hash: self.rubric_hash.clone(),
            },
        );
        if let Some(token) = &self.cancel {
            orchestrator = orchestrator.with_cancel(token.clone());
        }
        let outcome = orchestrator.run(units, progress);
        info!(
            "Scored {} commits with {} oracle calls ({} tokens)",
            outcome.scores.len(),
            outcome.oracle_calls,
            outcome.tokens_used
        );

        if outcome.cancelled_units > 0 {
            return Err(AnalysisError::Cancelled {
                phase: Phase::Scoring,
                completed: outcome.completed_units,
                total: outcome.total_units,
                remaining: outcome.cancelled_units,
            });
        }

        let failed_hashes = outcome.failed_hashes();
        if let Some(first) = outcome.failures.first() {
            if !self.settings.allow_partial {
                return Err(AnalysisError::ScoringIncomplete {
                    phase: Phase::Scoring,
                    completed: outcome.completed_units,
                    total: outcome.total_units,
                    failed_hashes,
                    first_error: first.error.clone(),
                });
            }
            warn!(
                "Reporting without {} commits that could not be scored",
                failed_hashes.len()
            );
        }

        let tokens_used = outcome.tokens_used;
        let cache_write_failures = outcome.cache_write_failures;
        for score in outcome.scores {
            by_hash.insert(score.commit_hash.clone(), score);
        }
        let commit_scores: Vec<CommitScore> = diffs
            .iter()
            .filter_map(|d| by_hash.remove(d.hash()))
            .collect();

        let authors = self.aggregate_authors(&diffs, &commit_scores, progress);
        let summary = summarize(&authors, diffs.iter().map(|d| d.commit.date));

        let metadata = ReportMetadata {
            generated_at: Utc::now(),
            repository_path: self.source.repo_path().to_path_buf(),
            scope: scope.clone(),
            dimension_weights: self.settings.weights,
            total_commits: diffs.len(),
            analyzed_commits: commit_scores.len(),
            cached_commits,
            skipped_commits,
            failed_commits: failed_hashes.len(),
            cache_write_failures,
            tokens_used,
            llm_provider: self.oracle.provider().to_string(),
            llm_model: self.oracle.model().to_string(),
        };

        Ok(AnalysisReport {
            metadata,
            summary,
            authors,
            commit_scores,
        })
    }

    fn extract(
        &self,
        scope: &AnalysisScope,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<Vec<CommitDiff>, AnalysisError> {
        progress(ProgressEvent::new(Phase::Extracting, 0, 0, "Extracting commits"));
        let commits =
            self.source
                .list_commits(scope)
                .map_err(|source| AnalysisError::Extraction {
                    phase: Phase::Extracting,
                    completed: 0,
                    total: 0,
                    source,
                })?;

        let total = commits.len();
        progress(ProgressEvent::new(
            Phase::Extracting,
            0,
            total,
            format!("Found {} commits", total),
        ));

        let mut diffs = Vec::with_capacity(total);
        for (index, commit) in commits.iter().enumerate() {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(AnalysisError::Cancelled {
                    phase: Phase::Extracting,
                    completed: index,
                    total,
                    remaining: total - index,
                });
            }
            let diff = self
                .source
                .read_diff(commit)
                .map_err(|source| AnalysisError::Extraction {
                    phase: Phase::Extracting,
                    completed: index,
                    total,
                    source,
                })?;
            diffs.push(diff);
            progress(ProgressEvent::new(
                Phase::Extracting,
                index + 1,
                total,
                format!("Extracted diff for {}", commit.abbreviated_hash),
            ));
        }
        Ok(diffs)
    }

    /// Aggregate per author, best score first.
    fn aggregate_authors(
        &self,
        diffs: &[CommitDiff],
        commit_scores: &[CommitScore],
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Vec<AuthorReport> {
        let groups = group_by_author(diffs);
        let scores: HashMap<&str, &CommitScore> = commit_scores
            .iter()
            .map(|s| (s.commit_hash.as_str(), s))
            .collect();
        let options = AggregationOptions {
            weights: self.settings.weights,
            time_decay: self.settings.time_decay,
            time_decay_lambda: self.settings.time_decay_lambda,
            now: Utc::now(),
        };

        let total = groups.len();
        progress(ProgressEvent::new(
            Phase::Aggregating,
            0,
            total,
            "Aggregating scores",
        ));

        let mut reports: Vec<AuthorReport> = Vec::with_capacity(total);
        for (index, group) in groups.into_iter().enumerate() {
            let author_scores: Vec<CommitScore> = group
                .diffs
                .iter()
                .filter_map(|d| scores.get(d.hash()).map(|s| (*s).clone()))
                .collect();
            let score = aggregate(
                &group.author.email,
                &group.author.name,
                &author_scores,
                diffs,
                &options,
            );
            progress(ProgressEvent::new(
                Phase::Aggregating,
                index + 1,
                total,
                group.author.name.clone(),
            ));
            if let Some(contribution) = AuthorContribution::from_diffs(group.author, &group.diffs) {
                reports.push(AuthorReport::new(score, contribution));
            }
        }

        reports.sort_by(|a, b| b.score.overall_score.total_cmp(&a.score.overall_score));
        reports
    }
}

fn group_by_author(diffs: &[CommitDiff]) -> Vec<AuthorCommits<'_>> {
    let mut groups: Vec<AuthorCommits> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for diff in diffs {
        let email = diff.commit.author.email.as_str();
        match index.get(email) {
            Some(&i) => groups[i].diffs.push(diff),
            None => {
                index.insert(email, groups.len());
                groups.push(AuthorCommits {
                    author: diff.commit.author.clone(),
                    diffs: vec![diff],
                });
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryScoreCache;
    use crate::models::CommitInfo;
    use crate::oracle::test_support::MockOracle;
    use crate::test_utils::{make_diff, make_diff_by};
    use std::path::{Path, PathBuf};

    struct FakeSource {
        path: PathBuf,
        diffs: Vec<CommitDiff>,
        broken: Option<String>,
    }

    impl FakeSource {
        fn new(diffs: Vec<CommitDiff>) -> Self {
            Self {
                path: PathBuf::from("/work/repo"),
                diffs,
                broken: None,
            }
        }
    }

    impl CommitSource for FakeSource {
        fn repo_path(&self) -> &Path {
            &self.path
        }

        fn list_commits(&self, _scope: &AnalysisScope) -> Result<Vec<CommitInfo>, GitError> {
            Ok(self.diffs.iter().map(|d| d.commit.clone()).collect())
        }

        fn read_diff(&self, commit: &CommitInfo) -> Result<CommitDiff, GitError> {
            if self.broken.as_deref() == Some(commit.hash.as_str()) {
                return Err(GitError::CommandFailed("bad object".to_string()));
            }
            self.diffs
                .iter()
                .find(|d| d.hash() == commit.hash)
                .cloned()
                .ok_or_else(|| GitError::ParseError(commit.hash.clone()))
        }
    }

    fn settings() -> AnalyzerSettings {
        AnalyzerSettings {
            concurrency: 2,
            ..AnalyzerSettings::default()
        }
    }

    #[test]
    fn groups_authors_by_email_with_first_seen_name() {
        let diffs = vec![
            make_diff_by("a000001", "Add parser", 40, "Ada", "ada@example.com"),
            make_diff_by("b000001", "Add lexer", 40, "Bob", "bob@example.com"),
            make_diff_by("a000002", "Fix parser", 40, "Ada L.", "ada@example.com"),
        ];

        let groups = group_by_author(&diffs);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].author.name, "Ada");
        assert_eq!(groups[0].diffs.len(), 2);
        assert_eq!(groups[1].author.email, "bob@example.com");
    }

    #[test]
    fn analyze_scores_and_reports_each_author() {
        let source = FakeSource::new(vec![
            make_diff_by("a000001", "Add parser", 40, "Ada", "ada@example.com"),
            make_diff_by("b000001", "Add lexer", 40, "Bob", "bob@example.com"),
        ]);
        let oracle = MockOracle::new(70.0);
        let cache = MemoryScoreCache::new();
        let analyzer = Analyzer::new(&source, &oracle, &cache, "r1", settings());

        let report = analyzer
            .analyze(&AnalysisScope::default(), &mut |_| {})
            .unwrap();

        assert_eq!(report.metadata.total_commits, 2);
        assert_eq!(report.metadata.analyzed_commits, 2);
        assert_eq!(report.metadata.cached_commits, 0);
        assert_eq!(report.metadata.llm_provider, "mock");
        assert_eq!(report.authors.len(), 2);
        assert!((report.authors[0].score.overall_score - 70.0).abs() < 1e-9);
        assert_eq!(report.summary.total_authors, 2);
        assert_eq!(report.commit_scores[0].commit_hash, "a000001");
    }

    #[test]
    fn progress_phases_are_ordered() {
        let source = FakeSource::new(vec![make_diff("a000001", "Add parser", 40)]);
        let oracle = MockOracle::new(70.0);
        let cache = MemoryScoreCache::new();
        let analyzer = Analyzer::new(&source, &oracle, &cache, "r1", settings());
        let mut phases = Vec::new();

        analyzer
            .analyze(&AnalysisScope::default(), &mut |e| phases.push(e.phase))
            .unwrap();

        let first_scoring = phases.iter().position(|p| *p == Phase::Scoring).unwrap();
        let first_aggregating = phases.iter().position(|p| *p == Phase::Aggregating).unwrap();
        assert_eq!(phases[0], Phase::Extracting);
        assert!(phases[..first_scoring].iter().all(|p| *p == Phase::Extracting));
        assert!(first_scoring < first_aggregating);
    }

    #[test]
    fn cached_scores_are_reweighed() {
        let source = FakeSource::new(vec![make_diff("a000001", "Add parser", 40)]);
        let oracle = MockOracle::new(70.0);
        let cache = MemoryScoreCache::new();
        let mut stored = crate::test_utils::commit_score("a000001", 0.0);
        stored.dimensions = crate::test_utils::dimension_scores(100.0, 0.0, 0.0, 0.0);
        cache.set("a000001", &stored, "r1").unwrap();
        let analyzer = Analyzer::new(
            &source,
            &oracle,
            &cache,
            "r1",
            AnalyzerSettings {
                weights: DimensionWeight::new(1.0, 0.0, 0.0, 1.0),
                ..settings()
            },
        );

        let report = analyzer
            .analyze(&AnalysisScope::default(), &mut |_| {})
            .unwrap();

        assert_eq!(oracle.call_count(), 0);
        assert_eq!(report.metadata.cached_commits, 1);
        assert!((report.commit_scores[0].overall_score() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn cached_scores_outside_scope_are_ignored() {
        let source = FakeSource::new(vec![make_diff("a000001", "Add parser", 40)]);
        let oracle = MockOracle::new(70.0);
        let cache = MemoryScoreCache::new();
        for hash in ["a000001", "z000001", "z000002"] {
            cache
                .set(hash, &crate::test_utils::commit_score(hash, 40.0), "r1")
                .unwrap();
        }
        let analyzer = Analyzer::new(&source, &oracle, &cache, "r1", settings());

        let report = analyzer
            .analyze(&AnalysisScope::default(), &mut |_| {})
            .unwrap();

        assert_eq!(oracle.call_count(), 0);
        assert_eq!(report.metadata.cached_commits, 1);
        assert_eq!(report.commit_scores.len(), 1);
        assert_eq!(report.commit_scores[0].commit_hash, "a000001");
    }

    #[test]
    fn extraction_error_names_phase_and_counts() {
        let mut source = FakeSource::new(vec![
            make_diff("a000001", "Add parser", 40),
            make_diff("a000002", "Add lexer", 40),
        ]);
        source.broken = Some("a000002".to_string());
        let oracle = MockOracle::new(70.0);
        let cache = MemoryScoreCache::new();
        let analyzer = Analyzer::new(&source, &oracle, &cache, "r1", settings());

        let err = analyzer
            .analyze(&AnalysisScope::default(), &mut |_| {})
            .unwrap_err();

        match err {
            AnalysisError::Extraction {
                phase,
                completed,
                total,
                ..
            } => {
                assert_eq!(phase, Phase::Extracting);
                assert_eq!(completed, 1);
                assert_eq!(total, 2);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(oracle.call_count(), 0);
    }

    #[test]
    fn estimate_counts_cached_and_calls() {
        let mut diffs: Vec<CommitDiff> = (0..6)
            .map(|i| make_diff(&format!("s00000{}", i), "Fix typo", 2))
            .collect();
        diffs.push(make_diff("n000001", "Add parser", 120));
        diffs.push(make_diff("c000001", "Add lexer", 120));
        let source = FakeSource::new(diffs);
        let oracle = MockOracle::new(70.0);
        let cache = MemoryScoreCache::new();
        cache
            .set("c000001", &crate::test_utils::commit_score("c000001", 60.0), "r1")
            .unwrap();
        let analyzer = Analyzer::new(&source, &oracle, &cache, "r1", settings());

        let estimate = analyzer.estimate(&AnalysisScope::default()).unwrap();

        assert_eq!(estimate.total_commits, 8);
        assert_eq!(estimate.cached_commits, 1);
        assert_eq!(estimate.to_analyze, 7);
        // batch of 5, leftover small, normal
        assert_eq!(estimate.estimated_llm_calls, 3);
        assert_eq!(estimate.estimated_tokens, 25_500);
        assert_eq!(oracle.call_count(), 0);
    }

    #[test]
    fn cancelled_before_extraction_reports_counts() {
        let source = FakeSource::new(vec![make_diff("a000001", "Add parser", 40)]);
        let oracle = MockOracle::new(70.0);
        let cache = MemoryScoreCache::new();
        let token = CancelToken::new();
        token.cancel();
        let analyzer =
            Analyzer::new(&source, &oracle, &cache, "r1", settings()).with_cancel(token);

        let err = analyzer
            .analyze(&AnalysisScope::default(), &mut |_| {})
            .unwrap_err();

        assert!(matches!(
            err,
            AnalysisError::Cancelled {
                phase: Phase::Extracting,
                completed: 0,
                total: 1,
                remaining: 1
            }
        ));
    }
}
