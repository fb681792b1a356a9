//! End-to-end tests of the analysis pipeline with scripted history and oracle.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use gitpulse::cache::{FileScoreCache, MemoryScoreCache, ScoreCache};
use gitpulse::cancel::CancelToken;
use gitpulse::git::{CommitSource, GitError};
use gitpulse::llm::LlmError;
use gitpulse::models::{AnalysisScope, AuthorInfo, CommitDiff, CommitInfo, FileDiff, FileStatus};
use gitpulse::oracle::{DiffPayload, OracleError, OracleScore, ScoringOracle};
use gitpulse::pipeline::{AnalysisError, Analyzer, AnalyzerSettings, Phase};
use gitpulse::scoring::{DimensionScore, DimensionScores, FlagKind};

const RUBRIC: &str = "rubric-a";

/// In-memory history, newest first like `git log`.
struct ScriptedHistory {
    path: PathBuf,
    diffs: Vec<CommitDiff>,
}

impl CommitSource for ScriptedHistory {
    fn repo_path(&self) -> &Path {
        &self.path
    }

    fn list_commits(&self, _scope: &AnalysisScope) -> Result<Vec<CommitInfo>, GitError> {
        Ok(self.diffs.iter().map(|d| d.commit.clone()).collect())
    }

    fn read_diff(&self, commit: &CommitInfo) -> Result<CommitDiff, GitError> {
        self.diffs
            .iter()
            .find(|d| d.commit.hash == commit.hash)
            .cloned()
            .ok_or_else(|| GitError::CommandFailed(format!("unknown commit {}", commit.hash)))
    }
}

/// Oracle scoring each commit at a fixed per-hash value.
struct ScriptedOracle {
    values: HashMap<String, f64>,
    default_value: f64,
    failing: HashSet<String>,
    calls: AtomicUsize,
    scored: Mutex<Vec<String>>,
    cancel_on_call: Option<CancelToken>,
}

impl ScriptedOracle {
    fn new(default_value: f64) -> Self {
        Self {
            values: HashMap::new(),
            default_value,
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
            scored: Mutex::new(Vec::new()),
            cancel_on_call: None,
        }
    }

    fn with_value(mut self, hash: &str, value: f64) -> Self {
        self.values.insert(hash.to_string(), value);
        self
    }

    fn failing_on(mut self, hash: &str) -> Self {
        self.failing.insert(hash.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn scored(&self) -> Vec<String> {
        self.scored.lock().unwrap().clone()
    }

    fn respond(&self, payload: &DiffPayload, reported_hash: String) -> OracleScore {
        self.scored.lock().unwrap().push(payload.hash().to_string());
        let value = *self.values.get(payload.hash()).unwrap_or(&self.default_value);
        OracleScore {
            commit_hash: reported_hash,
            dimensions: DimensionScores {
                code_quality: DimensionScore::new(value, "scripted"),
                complexity_impact: DimensionScore::new(value, "scripted"),
                commit_discipline: DimensionScore::new(value, "scripted"),
                collaboration: DimensionScore::new(value, "scripted"),
            },
            reasoning: "scripted".to_string(),
            tokens_used: 500,
        }
    }

    fn begin_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
    }
}

impl ScoringOracle for ScriptedOracle {
    fn score_one(&self, payload: &DiffPayload) -> Result<OracleScore, OracleError> {
        self.begin_call();
        if self.failing.contains(payload.hash()) {
            return Err(LlmError::ClientError("rate limited".to_string()).into());
        }
        Ok(self.respond(payload, payload.hash().to_string()))
    }

    fn score_batch(&self, payloads: &[DiffPayload]) -> Result<Vec<OracleScore>, OracleError> {
        self.begin_call();
        if payloads.iter().any(|p| self.failing.contains(p.hash())) {
            return Err(LlmError::ClientError("rate limited".to_string()).into());
        }
        // Answer in reverse order with abbreviated hashes.
        Ok(payloads
            .iter()
            .rev()
            .map(|p| self.respond(p, p.hash()[..8].to_string()))
            .collect())
    }

    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }
}

fn commit(hash: &str, author: &str, message: &str, days_ago: i64, changes: usize) -> CommitDiff {
    let date = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() - Duration::days(days_ago);
    let email = format!("{}@example.com", author.to_lowercase());
    let info = CommitInfo::new(hash, AuthorInfo::new(author, email), date, message)
        .with_parents(vec![format!("{}p", hash)]);
    let file = FileDiff::new("src/engine.rs", FileStatus::Modified, changes, 0)
        .with_content("+fn run() {}\n".repeat(changes));
    CommitDiff::new(info, vec![file])
}

/// Full 40-char hash with a distinct leading prefix per `n`.
fn hash(n: usize) -> String {
    format!("{:07x}{}", 0xa0b0c00 + n, "0".repeat(33))
}

/// Ada: four normal commits and five small ones. Bob: two normal commits.
fn history() -> ScriptedHistory {
    let mut diffs = Vec::new();
    for i in 0..4 {
        diffs.push(commit(&hash(i), "Ada", "Add scoring stage", 40 - i as i64, 60));
    }
    for i in 4..9 {
        diffs.push(commit(&hash(i), "Ada", "Fix typo", 30 - i as i64, 3));
    }
    for i in 9..11 {
        diffs.push(commit(&hash(i), "Bob", "Refactor cache", 20 - i as i64, 80));
    }
    ScriptedHistory {
        path: PathBuf::from("/work/gitpulse"),
        diffs,
    }
}

fn settings() -> AnalyzerSettings {
    AnalyzerSettings {
        concurrency: 3,
        ..AnalyzerSettings::default()
    }
}

#[test]
fn rerun_with_same_rubric_makes_no_oracle_calls() {
    let dir = TempDir::new().unwrap();
    let source = history();
    let cache = FileScoreCache::with_root(dir.path(), source.repo_path());
    let scope = AnalysisScope::default();

    let first_oracle = ScriptedOracle::new(70.0).with_value(&hash(9), 55.0);
    let first = Analyzer::new(&source, &first_oracle, &cache, RUBRIC, settings())
        .analyze(&scope, &mut |_| {})
        .unwrap();
    // four normal singles, one batch of five smalls, two for Bob
    assert_eq!(first_oracle.calls(), 7);
    assert_eq!(first.metadata.cached_commits, 0);

    let second_oracle = ScriptedOracle::new(10.0);
    let second = Analyzer::new(&source, &second_oracle, &cache, RUBRIC, settings())
        .analyze(&scope, &mut |_| {})
        .unwrap();

    assert_eq!(second_oracle.calls(), 0);
    assert_eq!(second.metadata.cached_commits, 11);
    assert_eq!(second.metadata.tokens_used, 0);
    assert_eq!(first.authors.len(), second.authors.len());
    for (a, b) in first.authors.iter().zip(&second.authors) {
        assert_eq!(a.score, b.score);
    }
}

#[test]
fn rubric_change_invalidates_cached_scores() {
    let dir = TempDir::new().unwrap();
    let source = history();
    let cache = FileScoreCache::with_root(dir.path(), source.repo_path());
    let scope = AnalysisScope::default();

    let oracle = ScriptedOracle::new(70.0);
    Analyzer::new(&source, &oracle, &cache, RUBRIC, settings())
        .analyze(&scope, &mut |_| {})
        .unwrap();

    let oracle = ScriptedOracle::new(70.0);
    let report = Analyzer::new(&source, &oracle, &cache, "rubric-b", settings())
        .analyze(&scope, &mut |_| {})
        .unwrap();

    assert_eq!(oracle.calls(), 7);
    assert_eq!(report.metadata.cached_commits, 0);
    assert_eq!(cache.stats("rubric-b").valid_entries, 11);
}

#[test]
fn failing_unit_does_not_block_others() {
    let source = history();
    let cache = MemoryScoreCache::new();
    let failing = hash(2);
    let oracle = ScriptedOracle::new(70.0).failing_on(&failing);

    let err = Analyzer::new(&source, &oracle, &cache, RUBRIC, settings())
        .analyze(&AnalysisScope::default(), &mut |_| {})
        .unwrap_err();

    match err {
        AnalysisError::ScoringIncomplete {
            phase,
            completed,
            total,
            failed_hashes,
            first_error,
        } => {
            assert_eq!(phase, Phase::Scoring);
            assert_eq!(completed, total);
            assert_eq!(failed_hashes, vec![failing.clone()]);
            assert!(first_error.contains("rate limited"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(cache.get_all(RUBRIC).len(), 10);
    assert!(cache.get(&failing, RUBRIC).is_none());

    // Only the failed commit is retried.
    let retry = ScriptedOracle::new(70.0);
    Analyzer::new(&source, &retry, &cache, RUBRIC, settings())
        .analyze(&AnalysisScope::default(), &mut |_| {})
        .unwrap();
    assert_eq!(retry.scored(), vec![failing]);
}

#[test]
fn partial_report_excludes_failed_commits() {
    let source = history();
    let cache = MemoryScoreCache::new();
    let oracle = ScriptedOracle::new(70.0).failing_on(&hash(10));
    let settings = AnalyzerSettings {
        allow_partial: true,
        ..settings()
    };

    let report = Analyzer::new(&source, &oracle, &cache, RUBRIC, settings)
        .analyze(&AnalysisScope::default(), &mut |_| {})
        .unwrap();

    assert_eq!(report.metadata.failed_commits, 1);
    assert_eq!(report.metadata.analyzed_commits, 10);
    assert!(report.commit_scores.iter().all(|s| s.commit_hash != hash(10)));
    let bob = report
        .authors
        .iter()
        .find(|a| a.score.author_name == "Bob")
        .unwrap();
    assert_eq!(bob.score.commit_count, 1);
    assert_eq!(bob.contribution.commit_count, 2);
}

#[test]
fn merge_commit_is_skipped_without_oracle_call() {
    let mut merge = commit(&hash(50), "Ada", "Merge branch 'main' into feature", 1, 200);
    merge.commit.parent_hashes = vec!["p1".to_string(), "p2".to_string()];
    let source = ScriptedHistory {
        path: PathBuf::from("/work/gitpulse"),
        diffs: vec![merge, commit(&hash(51), "Ada", "Add parser", 2, 40)],
    };
    let oracle = ScriptedOracle::new(80.0);
    let cache = MemoryScoreCache::new();

    let report = Analyzer::new(&source, &oracle, &cache, RUBRIC, settings())
        .analyze(&AnalysisScope::default(), &mut |_| {})
        .unwrap();

    assert_eq!(oracle.calls(), 1);
    assert_eq!(oracle.scored(), vec![hash(51)]);
    let skipped = &report.commit_scores[0];
    assert!(skipped.has_flag(FlagKind::Skipped));
    assert_eq!(skipped.overall_score(), 0.0);
    assert_eq!(skipped.metadata.provider, "none");
    assert!(cache.get(&hash(50), RUBRIC).is_none());

    let ada = &report.authors[0].score;
    assert_eq!(ada.commit_count, 2);
    assert_eq!(ada.skipped_commit_count, 1);
    assert!((ada.overall_score - 80.0).abs() < 1e-9);
    assert_eq!(report.metadata.skipped_commits, 1);
}

#[test]
fn batch_results_match_abbreviated_hashes() {
    let diffs: Vec<CommitDiff> = (0..5)
        .map(|i| commit(&hash(20 + i), "Ada", "Fix lint", i as i64, 2))
        .collect();
    let source = ScriptedHistory {
        path: PathBuf::from("/work/gitpulse"),
        diffs,
    };
    let oracle = ScriptedOracle::new(60.0).with_value(&hash(22), 90.0);
    let cache = MemoryScoreCache::new();

    let report = Analyzer::new(&source, &oracle, &cache, RUBRIC, settings())
        .analyze(&AnalysisScope::default(), &mut |_| {})
        .unwrap();

    assert_eq!(oracle.calls(), 1);
    assert_eq!(report.commit_scores.len(), 5);
    assert!(report
        .commit_scores
        .iter()
        .all(|s| s.has_flag(FlagKind::Batched) && s.metadata.rubric_hash == RUBRIC));
    let third = report
        .commit_scores
        .iter()
        .find(|s| s.commit_hash == hash(22))
        .unwrap();
    assert_eq!(third.overall_score(), 90.0);
}

#[test]
fn scoring_progress_counts_up_to_oracle_units() {
    let source = history();
    let oracle = ScriptedOracle::new(70.0);
    let cache = MemoryScoreCache::new();
    let mut scoring = Vec::new();

    Analyzer::new(&source, &oracle, &cache, RUBRIC, settings())
        .analyze(&AnalysisScope::default(), &mut |event| {
            if event.phase == Phase::Scoring {
                scoring.push((event.current, event.total));
            }
        })
        .unwrap();

    let expected: Vec<(usize, usize)> = (1..=7).map(|i| (i, 7)).collect();
    assert_eq!(scoring, expected);
}

#[test]
fn cancellation_stops_new_units() {
    let source = history();
    let cache = MemoryScoreCache::new();
    let token = CancelToken::new();
    let mut oracle = ScriptedOracle::new(70.0);
    oracle.cancel_on_call = Some(token.clone());
    let settings = AnalyzerSettings {
        concurrency: 1,
        ..settings()
    };

    let err = Analyzer::new(&source, &oracle, &cache, RUBRIC, settings)
        .with_cancel(token)
        .analyze(&AnalysisScope::default(), &mut |_| {})
        .unwrap_err();

    match err {
        AnalysisError::Cancelled {
            phase,
            completed,
            total,
            remaining,
        } => {
            assert_eq!(phase, Phase::Scoring);
            assert_eq!(completed, 1);
            assert_eq!(total, 7);
            assert_eq!(remaining, 6);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(oracle.calls(), 1);
    assert_eq!(cache.get_all(RUBRIC).len(), 1);
}
