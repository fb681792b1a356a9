//! Rubric documents that define how each dimension is scored.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::utils::sha256_hex;

const RUBRIC_DIR: &str = ".gitpulse/rubrics";
const HASH_LEN: usize = 16;

const BUILTIN_RUBRICS: &[(&str, &str)] = &[
    ("code-quality.md", include_str!("../rubrics/code-quality.md")),
    ("complexity-impact.md", include_str!("../rubrics/complexity-impact.md")),
    ("commit-discipline.md", include_str!("../rubrics/commit-discipline.md")),
    ("collaboration.md", include_str!("../rubrics/collaboration.md")),
];

#[derive(Debug, thiserror::Error)]
pub enum RubricError {
    #[error("Failed to read rubric {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Named rubric documents, ordered by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RubricSet {
    documents: BTreeMap<String, String>,
}

impl RubricSet {
    /// The rubrics compiled into the binary.
    pub fn builtin() -> Self {
        Self {
            documents: BUILTIN_RUBRICS
                .iter()
                .map(|(name, content)| (name.to_string(), content.to_string()))
                .collect(),
        }
    }

    /// Built-in rubrics with per-file overrides.
    ///
    /// Each rubric is looked up in `<repo>/.gitpulse/rubrics/` first, then in
    /// `~/.gitpulse/rubrics/`, falling back to the built-in text.
    pub fn load(repo_path: Option<&Path>) -> Result<Self, RubricError> {
        let mut search_dirs = Vec::new();
        if let Some(repo) = repo_path {
            search_dirs.push(repo.join(RUBRIC_DIR));
        }
        if let Some(home) = dirs::home_dir() {
            search_dirs.push(home.join(RUBRIC_DIR));
        }
        Self::load_from(&search_dirs)
    }

    /// Like [`RubricSet::load`] with explicit override directories, highest priority first.
    pub fn load_from(search_dirs: &[PathBuf]) -> Result<Self, RubricError> {
        let mut set = Self::builtin();
        for (name, _) in BUILTIN_RUBRICS {
            let found = search_dirs.iter().map(|d| d.join(name)).find(|p| p.is_file());
            if let Some(path) = found {
                debug!("Using rubric override {}", path.display());
                let content =
                    fs::read_to_string(&path).map_err(|source| RubricError::Io { path, source })?;
                set.documents.insert(name.to_string(), content);
            }
        }
        Ok(set)
    }

    pub fn with_document(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.documents.insert(name.into(), content.into());
        self
    }

    /// Documents in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.documents.iter().map(|(n, c)| (n.as_str(), c.as_str()))
    }

    /// Stable digest of every rubric's name and content.
    ///
    /// Any content change yields a different hash, which invalidates cached scores.
    pub fn hash(&self) -> String {
        let mut input = String::new();
        for (name, content) in self.iter() {
            input.push_str(name);
            input.push(':');
            input.push_str(content);
        }
        let mut digest = sha256_hex(input.as_bytes());
        digest.truncate(HASH_LEN);
        digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builtin_has_four_rubrics() {
        let set = RubricSet::builtin();
        let names: Vec<&str> = set.iter().map(|(n, _)| n).collect();

        assert_eq!(
            names,
            vec![
                "code-quality.md",
                "collaboration.md",
                "commit-discipline.md",
                "complexity-impact.md"
            ]
        );
        assert!(set.iter().all(|(_, content)| !content.is_empty()));
    }

    #[test]
    fn hash_is_stable_and_short() {
        let a = RubricSet::builtin().hash();
        let b = RubricSet::builtin().hash();

        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn content_change_changes_hash() {
        let base = RubricSet::builtin();
        let edited = base.clone().with_document("collaboration.md", "Be nice.");

        assert_ne!(base.hash(), edited.hash());
    }

    #[test]
    fn project_override_wins() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        fs::write(project.path().join("code-quality.md"), "project rubric").unwrap();
        fs::write(home.path().join("code-quality.md"), "home rubric").unwrap();
        fs::write(home.path().join("collaboration.md"), "home collaboration").unwrap();

        let set = RubricSet::load_from(&[project.path().to_path_buf(), home.path().to_path_buf()])
            .unwrap();
        let docs: BTreeMap<&str, &str> = set.iter().collect();

        assert_eq!(docs["code-quality.md"], "project rubric");
        assert_eq!(docs["collaboration.md"], "home collaboration");
        assert_ne!(set.hash(), RubricSet::builtin().hash());
    }
}
