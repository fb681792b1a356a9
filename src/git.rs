use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use log::debug;

use crate::models::{AnalysisScope, AuthorInfo, CommitDiff, CommitInfo, FileDiff, FileStatus};

/// Hash of git's empty tree, used as the base for root commits.
const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';
const LOG_FORMAT: &str = "--format=%H%x1f%P%x1f%an%x1f%ae%x1f%aI%x1f%B%x1e";

/// Errors from git operations
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Git command failed: {0}")]
    CommandFailed(String),
    #[error("Failed to execute git: {0}")]
    ExecutionFailed(#[from] std::io::Error),
    #[error("Failed to parse git output: {0}")]
    ParseError(String),
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),
}

/// Source of commit diffs - allows faking history in tests
pub trait CommitSource {
    /// Repository location, used to key the score cache
    fn repo_path(&self) -> &Path;

    /// Commits in scope, newest first
    fn list_commits(&self, scope: &AnalysisScope) -> Result<Vec<CommitInfo>, GitError>;

    /// Per-file changes of one commit
    fn read_diff(&self, commit: &CommitInfo) -> Result<CommitDiff, GitError>;

    fn read_diffs(&self, scope: &AnalysisScope) -> Result<Vec<CommitDiff>, GitError> {
        self.list_commits(scope)?
            .iter()
            .map(|commit| self.read_diff(commit))
            .collect()
    }
}

/// Real implementation of CommitSource that calls git commands
#[derive(Debug, Clone)]
pub struct Git {
    work_dir: PathBuf,
}

impl Git {
    /// Open the repository containing `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GitError> {
        let path = path.as_ref();
        let candidate = Self {
            work_dir: path.to_path_buf(),
        };
        let top = candidate
            .run_git(&["rev-parse", "--show-toplevel"])
            .map_err(|_| GitError::NotARepository(path.to_path_buf()))?;
        Ok(Self {
            work_dir: PathBuf::from(top.trim()),
        })
    }

    fn run_git(&self, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .current_dir(&self.work_dir)
            .args(args)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::CommandFailed(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl CommitSource for Git {
    fn repo_path(&self) -> &Path {
        &self.work_dir
    }

    fn list_commits(&self, scope: &AnalysisScope) -> Result<Vec<CommitInfo>, GitError> {
        let mut args = vec!["log".to_string(), LOG_FORMAT.to_string()];
        if let Some(since) = &scope.since {
            args.push(format!("--since={}", since));
        }
        if let Some(until) = &scope.until {
            args.push(format!("--until={}", until));
        }
        for author in &scope.authors {
            args.push(format!("--author={}", author));
        }
        if let Some(max) = scope.max_commits {
            args.push(format!("--max-count={}", max));
        }
        args.push(scope.branch.clone().unwrap_or_else(|| "HEAD".to_string()));
        args.push("--".to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_git(&arg_refs)?;
        let commits = parse_log(&output)?;
        debug!("git log returned {} commits", commits.len());
        Ok(commits)
    }

    fn read_diff(&self, commit: &CommitInfo) -> Result<CommitDiff, GitError> {
        let base = commit
            .parent_hashes
            .first()
            .map(String::as_str)
            .unwrap_or(EMPTY_TREE);
        let hash = commit.hash.as_str();

        let numstat = self.run_git(&["diff", "--numstat", "-z", "-M", base, hash])?;
        let name_status = self.run_git(&["diff", "--name-status", "-z", "-M", base, hash])?;
        let patch = self.run_git(&[
            "-c",
            "core.quotePath=false",
            "diff",
            "-M",
            "--no-color",
            base,
            hash,
        ])?;

        let files = build_file_diffs(
            &parse_name_status(&name_status),
            &parse_numstat(&numstat),
            &split_patch(&patch),
        );
        Ok(CommitDiff::new(commit.clone(), files))
    }
}

/// Parse `git log` output in [`LOG_FORMAT`].
fn parse_log(output: &str) -> Result<Vec<CommitInfo>, GitError> {
    output
        .split(RECORD_SEP)
        .map(|record| record.trim_start_matches('\n'))
        .filter(|record| !record.trim().is_empty())
        .map(parse_log_record)
        .collect()
}

fn parse_log_record(record: &str) -> Result<CommitInfo, GitError> {
    let fields: Vec<&str> = record.splitn(6, FIELD_SEP).collect();
    let [hash, parents, name, email, date, message] = fields[..] else {
        return Err(GitError::ParseError(format!(
            "expected 6 fields in log record, got {}",
            fields.len()
        )));
    };

    let date = DateTime::parse_from_rfc3339(date.trim())
        .map_err(|e| GitError::ParseError(format!("bad date '{}': {}", date, e)))?
        .with_timezone(&Utc);
    let parents = parents.split_whitespace().map(String::from).collect();

    Ok(CommitInfo::new(
        hash.trim(),
        AuthorInfo::new(name, email),
        date,
        message.trim_end(),
    )
    .with_parents(parents))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NameStatus {
    status: FileStatus,
    path: String,
    old_path: Option<String>,
}

/// Parse `git diff --name-status -z`: `M\0path\0` or `R100\0old\0new\0`.
fn parse_name_status(output: &str) -> Vec<NameStatus> {
    let mut tokens = output.split('\0').filter(|t| !t.is_empty());
    let mut entries = Vec::new();
    while let Some(code) = tokens.next() {
        let status = FileStatus::from_git_code(code);
        let entry = match status {
            FileStatus::Renamed | FileStatus::Copied => {
                let (Some(old), Some(new)) = (tokens.next(), tokens.next()) else {
                    break;
                };
                NameStatus {
                    status,
                    path: new.to_string(),
                    old_path: Some(old.to_string()),
                }
            }
            _ => {
                let Some(path) = tokens.next() else {
                    break;
                };
                NameStatus {
                    status,
                    path: path.to_string(),
                    old_path: None,
                }
            }
        };
        entries.push(entry);
    }
    entries
}

/// Line counts per path; `None` for binary files.
///
/// `git diff --numstat -z` emits `add\tdel\tpath\0`, or `add\tdel\t\0old\0new\0`
/// for renames.
fn parse_numstat(output: &str) -> HashMap<String, Option<(usize, usize)>> {
    let mut tokens = output.split('\0');
    let mut counts = HashMap::new();
    while let Some(token) = tokens.next() {
        let token = token.trim_start_matches('\n');
        if token.is_empty() {
            continue;
        }
        let mut parts = token.splitn(3, '\t');
        let (Some(added), Some(deleted), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let path = if path.is_empty() {
            // Rename: old and new paths follow as separate tokens.
            let _old = tokens.next();
            match tokens.next() {
                Some(new) => new.to_string(),
                None => break,
            }
        } else {
            path.to_string()
        };
        let lines = match (added.parse(), deleted.parse()) {
            (Ok(a), Ok(d)) => Some((a, d)),
            _ => None,
        };
        counts.insert(path, lines);
    }
    counts
}

/// Split a unified diff into per-file sections keyed by new path.
fn split_patch(patch: &str) -> HashMap<String, String> {
    let mut sections = HashMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in patch.lines() {
        if let Some(header) = line.strip_prefix("diff --git ") {
            if let Some((path, lines)) = current.take() {
                sections.insert(path, lines.join("\n"));
            }
            current = Some((header_new_path(header), vec![line]));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some((path, lines)) = current {
        sections.insert(path, lines.join("\n"));
    }
    sections
}

/// New-side path of a `diff --git a/<old> b/<new>` header.
///
/// Paths with tabs, quotes or backslashes stay C-quoted even with
/// `core.quotePath=false`.
fn header_new_path(header: &str) -> String {
    if header.ends_with('"') {
        if let Some(start) = header.rfind(" \"b/") {
            let unquoted = unquote_c_style(&header[start + 1..]);
            return unquoted.strip_prefix("b/").unwrap_or(&unquoted).to_string();
        }
    }
    header
        .rsplit_once(" b/")
        .map(|(_, new)| new.to_string())
        .unwrap_or_else(|| header.to_string())
}

/// Undo git's C-style path quoting, including octal-escaped UTF-8 bytes.
fn unquote_c_style(quoted: &str) -> String {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|q| q.strip_suffix('"'))
        .unwrap_or(quoted);

    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('r') => bytes.push(b'\r'),
            Some('a') => bytes.push(0x07),
            Some('b') => bytes.push(0x08),
            Some('f') => bytes.push(0x0c),
            Some('v') => bytes.push(0x0b),
            Some(d @ '0'..='7') => {
                let mut value = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.clone().next().and_then(|n| n.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                bytes.push(value as u8);
            }
            Some(other) => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn build_file_diffs(
    entries: &[NameStatus],
    numstat: &HashMap<String, Option<(usize, usize)>>,
    patches: &HashMap<String, String>,
) -> Vec<FileDiff> {
    entries
        .iter()
        .map(|entry| {
            let lines = numstat.get(&entry.path).copied().flatten();
            let (additions, deletions) = lines.unwrap_or((0, 0));
            let mut file = FileDiff::new(&entry.path, entry.status, additions, deletions);
            file.old_path = entry.old_path.clone();
            if lines.is_none() {
                file = file.binary();
            } else if let Some(content) = patches.get(&entry.path) {
                file = file.with_content(content.as_str());
            }
            file
        })
        .collect()
}
