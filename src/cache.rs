//! Content-addressed persistence of commit scores.
//!
//! Records are keyed by commit hash and stamped with the rubric hash they were
//! produced under. A lookup only succeeds when the stored rubric hash matches the
//! caller's, so a rubric change invalidates every earlier record.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::scoring::CommitScore;
use crate::utils::sha256_hex;

pub const CACHE_DIR_ENV: &str = "GITPULSE_CACHE_DIR";
const SCORES_DIR: &str = "scores";
const KEY_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cannot determine home directory for the score cache")]
    NoHomeDir,
}

/// One persisted score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedScore {
    pub commit_hash: String,
    pub score: CommitScore,
    pub rubric_hash: String,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    /// Entries written under the rubric hash passed to [`ScoreCache::stats`].
    pub valid_entries: usize,
}

/// Trait abstracting how commit scores are persisted between runs.
///
/// Implementations are shared across scoring workers; writes for different
/// commits never touch the same record.
pub trait ScoreCache: Send + Sync {
    fn get(&self, commit_hash: &str, rubric_hash: &str) -> Option<CommitScore>;
    fn set(&self, commit_hash: &str, score: &CommitScore, rubric_hash: &str)
        -> Result<(), CacheError>;
    fn get_all(&self, rubric_hash: &str) -> HashMap<String, CommitScore>;
    fn clear(&self) -> Result<(), CacheError>;
    fn stats(&self, rubric_hash: &str) -> CacheStats;
}

/// Filesystem-backed cache: one JSON file per commit under
/// `<root>/<repo-name>-<path digest>/scores/`.
pub struct FileScoreCache {
    scores_dir: PathBuf,
}

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

impl FileScoreCache {
    /// Cache for `repo_path` under the default root.
    ///
    /// The root is `$GITPULSE_CACHE_DIR` when set, otherwise `~/.gitpulse/cache`.
    pub fn new(repo_path: &Path) -> Result<Self, CacheError> {
        Ok(Self::with_root(&default_cache_root()?, repo_path))
    }

    pub fn with_root(root: &Path, repo_path: &Path) -> Self {
        Self {
            scores_dir: root.join(repo_cache_name(repo_path)).join(SCORES_DIR),
        }
    }

    pub fn scores_dir(&self) -> &Path {
        &self.scores_dir
    }

    fn record_path(&self, commit_hash: &str) -> PathBuf {
        let key: String = commit_hash.chars().take(KEY_LEN).collect();
        self.scores_dir.join(format!("{}.json", key))
    }

    fn read_record(path: &Path) -> Option<CachedScore> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("Unreadable cache record {}: {}", path.display(), e);
                }
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Corrupt cache record {}: {}", path.display(), e);
                None
            }
        }
    }

    fn records(&self) -> Vec<CachedScore> {
        let entries = match fs::read_dir(&self.scores_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| Self::read_record(&path))
            .collect()
    }
}

impl ScoreCache for FileScoreCache {
    fn get(&self, commit_hash: &str, rubric_hash: &str) -> Option<CommitScore> {
        let record = Self::read_record(&self.record_path(commit_hash))?;
        if record.commit_hash != commit_hash || record.rubric_hash != rubric_hash {
            return None;
        }
        Some(record.score)
    }

    fn set(
        &self,
        commit_hash: &str,
        score: &CommitScore,
        rubric_hash: &str,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(&self.scores_dir)?;
        let record = CachedScore {
            commit_hash: commit_hash.to_string(),
            score: score.clone(),
            rubric_hash: rubric_hash.to_string(),
            cached_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)?;

        let path = self.record_path(commit_hash);
        let temp = self.scores_dir.join(format!(
            ".{}.{}.{}.tmp",
            commit_hash.chars().take(KEY_LEN).collect::<String>(),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp, json)?;
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }

    fn get_all(&self, rubric_hash: &str) -> HashMap<String, CommitScore> {
        self.records()
            .into_iter()
            .filter(|r| r.rubric_hash == rubric_hash)
            .map(|r| (r.commit_hash, r.score))
            .collect()
    }

    fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.scores_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn stats(&self, rubric_hash: &str) -> CacheStats {
        let records = self.records();
        CacheStats {
            total_entries: records.len(),
            valid_entries: records
                .iter()
                .filter(|r| r.rubric_hash == rubric_hash)
                .count(),
        }
    }
}

/// In-process cache with the same semantics as [`FileScoreCache`].
#[derive(Default)]
pub struct MemoryScoreCache {
    records: Mutex<HashMap<String, CachedScore>>,
}

impl MemoryScoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedScore>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ScoreCache for MemoryScoreCache {
    fn get(&self, commit_hash: &str, rubric_hash: &str) -> Option<CommitScore> {
        self.lock()
            .get(commit_hash)
            .filter(|r| r.rubric_hash == rubric_hash)
            .map(|r| r.score.clone())
    }

    fn set(
        &self,
        commit_hash: &str,
        score: &CommitScore,
        rubric_hash: &str,
    ) -> Result<(), CacheError> {
        self.lock().insert(
            commit_hash.to_string(),
            CachedScore {
                commit_hash: commit_hash.to_string(),
                score: score.clone(),
                rubric_hash: rubric_hash.to_string(),
                cached_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn get_all(&self, rubric_hash: &str) -> HashMap<String, CommitScore> {
        self.lock()
            .values()
            .filter(|r| r.rubric_hash == rubric_hash)
            .map(|r| (r.commit_hash.clone(), r.score.clone()))
            .collect()
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.lock().clear();
        Ok(())
    }

    fn stats(&self, rubric_hash: &str) -> CacheStats {
        let records = self.lock();
        CacheStats {
            total_entries: records.len(),
            valid_entries: records
                .values()
                .filter(|r| r.rubric_hash == rubric_hash)
                .count(),
        }
    }
}

fn default_cache_root() -> Result<PathBuf, CacheError> {
    if let Ok(dir) = env::var(CACHE_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".gitpulse").join("cache"))
        .ok_or(CacheError::NoHomeDir)
}

/// `<repo-name>-<first 12 hex chars of sha256(path)>`.
fn repo_cache_name(repo_path: &Path) -> String {
    let name = repo_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("repo");
    let digest = sha256_hex(repo_path.to_string_lossy().as_bytes());
    format!("{}-{}", name, &digest[..KEY_LEN])
}
