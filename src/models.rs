//! Commit and diff records produced by extraction.
//!
//! A [`CommitDiff`] is built once per commit and is read-only afterwards; every
//! later stage (classification, batching, scoring, aggregation) only borrows it.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File names whose churn says nothing about the author's work.
const GENERATED_FILE_NAMES: &[&str] = &[
    "Cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "go.sum",
    "composer.lock",
    "Gemfile.lock",
];

const GENERATED_SUFFIXES: &[&str] = &[".min.js", ".min.css"];

/// Author identity as recorded in the commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorInfo {
    pub name: String,
    pub email: String,
}

impl AuthorInfo {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Commit identity and message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub abbreviated_hash: String,
    pub author: AuthorInfo,
    pub date: DateTime<Utc>,
    /// Full commit message.
    pub message: String,
    /// First line of the message.
    pub subject: String,
    /// Everything after the first line, trimmed.
    pub body: String,
    #[serde(default)]
    pub parent_hashes: Vec<String>,
}

impl CommitInfo {
    pub fn new(
        hash: impl Into<String>,
        author: AuthorInfo,
        date: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        let hash = hash.into();
        let message = message.into();
        let (subject, body) = match message.split_once('\n') {
            Some((subject, body)) => (subject.trim().to_string(), body.trim().to_string()),
            None => (message.trim().to_string(), String::new()),
        };

        Self {
            abbreviated_hash: hash.chars().take(7).collect(),
            hash,
            author,
            date,
            message,
            subject,
            body,
            parent_hashes: Vec::new(),
        }
    }

    pub fn with_parents(mut self, parents: Vec<String>) -> Self {
        self.parent_hashes = parents;
        self
    }

    /// A merge commit has more than one parent.
    pub fn is_merge(&self) -> bool {
        self.parent_hashes.len() > 1
    }
}

/// How a file was touched by a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
}

impl FileStatus {
    /// Parse a `git --name-status` code such as `A`, `M`, `R100` or `C075`.
    pub fn from_git_code(code: &str) -> Self {
        match code.chars().next() {
            Some('A') => Self::Added,
            Some('D') => Self::Deleted,
            Some('R') => Self::Renamed,
            Some('C') => Self::Copied,
            _ => Self::Modified,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Deleted => write!(f, "deleted"),
            Self::Renamed => write!(f, "renamed"),
            Self::Copied => write!(f, "copied"),
        }
    }
}

/// A single file's change within a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub status: FileStatus,
    pub additions: usize,
    pub deletions: usize,
    /// Unified diff text for this file (empty for binary files).
    pub content: String,
    #[serde(default)]
    pub is_binary: bool,
}

impl FileDiff {
    pub fn new(path: impl Into<String>, status: FileStatus, additions: usize, deletions: usize) -> Self {
        Self {
            path: path.into(),
            old_path: None,
            status,
            additions,
            deletions,
            content: String::new(),
            is_binary: false,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn binary(mut self) -> Self {
        self.is_binary = true;
        self
    }

    /// Lock files and minified bundles are excluded from the size metric.
    pub fn is_generated(&self) -> bool {
        let name = Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.path);
        GENERATED_FILE_NAMES.contains(&name)
            || GENERATED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
    }
}

/// Size statistics derived from a commit's file list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub total_files: usize,
    pub total_additions: usize,
    pub total_deletions: usize,
    /// Added plus removed lines over text files that are not lock files or
    /// generated artifacts. Drives classification and commit weighting.
    pub effective_changes: usize,
}

impl DiffStats {
    pub fn from_files(files: &[FileDiff]) -> Self {
        let mut stats = Self {
            total_files: files.len(),
            ..Self::default()
        };
        for file in files {
            stats.total_additions += file.additions;
            stats.total_deletions += file.deletions;
            if !file.is_binary && !file.is_generated() {
                stats.effective_changes += file.additions + file.deletions;
            }
        }
        stats
    }
}

/// Everything the pipeline knows about one commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitDiff {
    pub commit: CommitInfo,
    pub files: Vec<FileDiff>,
    pub stats: DiffStats,
}

impl CommitDiff {
    pub fn new(commit: CommitInfo, files: Vec<FileDiff>) -> Self {
        let stats = DiffStats::from_files(&files);
        Self {
            commit,
            files,
            stats,
        }
    }

    pub fn hash(&self) -> &str {
        &self.commit.hash
    }

    pub fn effective_changes(&self) -> usize {
        self.stats.effective_changes
    }
}

/// Which commits an analysis run covers. Interpreted by the extraction layer only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_commits: Option<usize>,
}
