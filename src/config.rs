//! Layered configuration.
//!
//! Sources, lowest priority first: built-in defaults, `~/.gitpulse/config.toml`,
//! the project's `.gitpulse.toml`, `GITPULSE_*` environment variables. Command-line
//! flags are applied on top by the application layer.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::llm::LlmConfig;
use crate::pipeline::analyzer::{AnalyzerSettings, DEFAULT_CONCURRENCY, DEFAULT_MAX_TOKENS_PER_DIFF};
use crate::pipeline::batch::DEFAULT_BATCH_SIZE;
use crate::pipeline::classify::ClassifierConfig;
use crate::report::OutputFormat;
use crate::scoring::{Dimension, DimensionWeight};

pub const USER_CONFIG_FILE: &str = ".gitpulse/config.toml";
pub const PROJECT_CONFIG_FILE: &str = ".gitpulse.toml";
pub const MAX_CONCURRENCY_ENV: &str = "GITPULSE_MAX_CONCURRENCY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid value for {name}: '{value}'")]
    InvalidEnv { name: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: DimensionWeight,
    pub time_decay: bool,
    pub time_decay_lambda: f64,
    pub max_tokens_per_diff: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: DimensionWeight::default(),
            time_decay: false,
            time_decay_lambda: 0.01,
            max_tokens_per_diff: DEFAULT_MAX_TOKENS_PER_DIFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub small_commit_threshold: usize,
    pub large_commit_threshold: usize,
    pub skip_merge_commits: bool,
    pub max_concurrency: usize,
    pub batch_size: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let classifier = ClassifierConfig::default();
        Self {
            small_commit_threshold: classifier.small_commit_threshold,
            large_commit_threshold: classifier.large_commit_threshold,
            skip_merge_commits: classifier.skip_merge_commits,
            max_concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitPulseConfig {
    pub llm: LlmConfig,
    pub scoring: ScoringConfig,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
}

impl GitPulseConfig {
    /// Load every layer for the repository at `repo_path` and validate the result.
    pub fn load(repo_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut files = Vec::new();
        if let Some(home) = dirs::home_dir() {
            files.push(home.join(USER_CONFIG_FILE));
        }
        if let Some(repo) = repo_path {
            files.push(repo.join(PROJECT_CONFIG_FILE));
        }

        let config = Self::load_files(&files)?.with_env_from(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Merge the given files, later files overriding earlier ones key by key.
    /// Missing files are skipped.
    pub fn load_files(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();
        for path in paths.iter().filter(|p| p.is_file()) {
            debug!("Loading config from {}", path.display());
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let table: toml::Table =
                toml::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
            merge_tables(&mut merged, table);
        }

        toml::Value::Table(merged)
            .try_into()
            .map_err(|source| ConfigError::Parse {
                path: paths.last().cloned().unwrap_or_default(),
                source,
            })
    }

    /// Apply `GITPULSE_*` variables read through `lookup`.
    pub fn with_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(MAX_CONCURRENCY_ENV).filter(|v| !v.is_empty()) {
            self.analysis.max_concurrency =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: MAX_CONCURRENCY_ENV.to_string(),
                    value: value.clone(),
                })?;
        }
        self.llm = self.llm.with_env_from(lookup);
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = &self.scoring.weights;
        for dimension in Dimension::ALL {
            let weight = weights.get(dimension);
            if !(0.0..=1.0).contains(&weight) {
                return Err(ConfigError::Invalid(format!(
                    "{} weight {} is outside 0-1",
                    dimension.name(),
                    weight
                )));
            }
        }
        if weights.total() <= 0.0 {
            return Err(ConfigError::Invalid(
                "at least one dimension weight must be positive".to_string(),
            ));
        }

        let analysis = &self.analysis;
        if analysis.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".to_string()));
        }
        if analysis.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".to_string()));
        }
        if analysis.small_commit_threshold >= analysis.large_commit_threshold {
            return Err(ConfigError::Invalid(format!(
                "small_commit_threshold ({}) must be below large_commit_threshold ({})",
                analysis.small_commit_threshold, analysis.large_commit_threshold
            )));
        }

        let lambda = self.scoring.time_decay_lambda;
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "time_decay_lambda must be non-negative, got {}",
                lambda
            )));
        }
        if self.scoring.max_tokens_per_diff == 0 {
            return Err(ConfigError::Invalid(
                "max_tokens_per_diff must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            small_commit_threshold: self.analysis.small_commit_threshold,
            large_commit_threshold: self.analysis.large_commit_threshold,
            skip_merge_commits: self.analysis.skip_merge_commits,
        }
    }

    pub fn analyzer_settings(&self) -> AnalyzerSettings {
        AnalyzerSettings {
            classifier: self.classifier(),
            batch_size: self.analysis.batch_size,
            concurrency: self.analysis.max_concurrency,
            max_tokens_per_diff: self.scoring.max_tokens_per_diff,
            weights: self.scoring.weights,
            time_decay: self.scoring.time_decay,
            time_decay_lambda: self.scoring.time_decay_lambda,
            allow_partial: false,
        }
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, toml::Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}
