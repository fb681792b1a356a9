//! Generic LLM client infrastructure.
//!
//! This module provides the core trait and CLI-backed implementations for
//! invoking LLMs. Scoring prompts and response parsing live in `oracle`.
//!
//! # Configuration
//!
//! LLM settings can be configured via:
//! - CLI arguments: `--provider`, `--model`
//! - Environment variables: `GITPULSE_LLM_PROVIDER`, `GITPULSE_LLM_MODEL`,
//!   `GITPULSE_OPENCODE_BACKEND`
//! - The `[llm]` section of a config file
//!
//! CLI arguments take precedence over environment variables, which take
//! precedence over config files.

use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

pub const PROVIDER_ENV: &str = "GITPULSE_LLM_PROVIDER";
pub const MODEL_ENV: &str = "GITPULSE_LLM_MODEL";
pub const OPENCODE_BACKEND_ENV: &str = "GITPULSE_OPENCODE_BACKEND";

/// Characters per token when a provider reports no usage.
const CHARS_PER_TOKEN: usize = 4;

/// Available LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Claude CLI (default)
    #[default]
    Claude,
    /// OpenCode CLI
    OpenCode,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
            Self::OpenCode => write!(f, "opencode"),
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "opencode" => Ok(Self::OpenCode),
            _ => Err(format!(
                "Unknown LLM provider: '{}'. Valid options: claude, opencode",
                s
            )),
        }
    }
}

/// Configuration for LLM clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// The LLM provider to use.
    pub provider: LlmProvider,
    /// Optional model override.
    pub model: Option<String>,
    /// Backend provider for opencode (e.g., "lmstudio", "ollama").
    pub opencode_backend: Option<String>,
}

impl LlmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables.
    ///
    /// Reads:
    /// - `GITPULSE_LLM_PROVIDER` - provider name (claude, opencode)
    /// - `GITPULSE_LLM_MODEL` - model name
    /// - `GITPULSE_OPENCODE_BACKEND` - backend for opencode (e.g., lmstudio, ollama)
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply any environment variables that are set on top of this config.
    pub fn with_env(self) -> Self {
        self.with_env_from(|name| env::var(name).ok())
    }

    /// Like [`LlmConfig::with_env`], reading variables through `lookup`.
    pub fn with_env_from(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let provider = lookup(PROVIDER_ENV).and_then(|s| s.parse().ok());
        let model = lookup(MODEL_ENV).filter(|m| !m.is_empty());
        let backend = lookup(OPENCODE_BACKEND_ENV).filter(|b| !b.is_empty());
        self.with_overrides(provider, model, backend)
    }

    pub fn with_provider(mut self, provider: LlmProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Merge with CLI overrides. CLI values take precedence.
    pub fn with_overrides(
        mut self,
        provider: Option<LlmProvider>,
        model: Option<String>,
        opencode_backend: Option<String>,
    ) -> Self {
        if let Some(p) = provider {
            self.provider = p;
        }
        if let Some(m) = model {
            self.model = Some(m);
        }
        if let Some(b) = opencode_backend {
            self.opencode_backend = Some(b);
        }
        self
    }

    /// Model name as reported in score metadata.
    pub fn model_name(&self) -> String {
        self.model.clone().unwrap_or_else(|| "default".to_string())
    }

    /// Create an LLM client from this configuration.
    pub fn create_client(&self) -> Arc<dyn LlmClient> {
        match self.provider {
            LlmProvider::Claude => Arc::new(ClaudeCliClient {
                model: self.model.clone(),
            }),
            LlmProvider::OpenCode => Arc::new(OpenCodeClient {
                model: self.model.clone(),
                backend: self.opencode_backend.clone(),
            }),
        }
    }
}

/// A completion and what it cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl LlmResponse {
    /// Response with token counts estimated from text length.
    pub fn estimated(prompt: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            input_tokens: estimate_tokens(prompt),
            output_tokens: estimate_tokens(&text),
            text,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / CHARS_PER_TOKEN) as u64
}

/// Trait for LLM completion clients.
pub trait LlmClient: Send + Sync {
    /// Send a prompt to the LLM and return the completion response.
    fn complete(&self, prompt: &str) -> Result<LlmResponse, LlmError>;
}

/// Claude CLI client implementation.
#[derive(Default)]
pub struct ClaudeCliClient {
    pub model: Option<String>,
}

impl ClaudeCliClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
        }
    }
}

impl LlmClient for ClaudeCliClient {
    fn complete(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        // Use stdin for prompt to avoid command line length limits
        let mut args = vec!["--print", "--output-format", "json"];
        if let Some(ref model) = self.model {
            args.push("--model");
            args.push(model);
        }

        let mut child = Command::new("claude")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LlmError::ClientError(format!("Failed to run claude CLI: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .map_err(|e| LlmError::ClientError(format!("Failed to write to stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| LlmError::ClientError(format!("Failed to wait for claude CLI: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(LlmError::ClientError(format!(
                "claude CLI failed: \n\nstderr: {}\n\n stdout: {}",
                stderr, stdout
            )));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("Claude CLI stderr: {}", stderr.trim());
        }

        parse_claude_output(prompt, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `claude --output-format json` output: `{"result": ..., "usage": {...}}`.
///
/// Falls back to treating stdout as plain text when it is not that envelope.
fn parse_claude_output(prompt: &str, stdout: &str) -> Result<LlmResponse, LlmError> {
    let envelope: serde_json::Value = match serde_json::from_str(stdout.trim()) {
        Ok(value) => value,
        Err(_) => return Ok(LlmResponse::estimated(prompt, stdout)),
    };

    if envelope.get("is_error").and_then(|v| v.as_bool()) == Some(true) {
        let message = envelope
            .get("result")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        return Err(LlmError::ClientError(format!("claude CLI error: {}", message)));
    }

    let text = match envelope.get("result").and_then(|v| v.as_str()) {
        Some(text) => text.to_string(),
        None => return Ok(LlmResponse::estimated(prompt, stdout)),
    };

    let usage = envelope.get("usage");
    let count = |key: &str| usage.and_then(|u| u.get(key)).and_then(|v| v.as_u64());
    match (count("input_tokens"), count("output_tokens")) {
        (Some(input), Some(output)) => {
            let cached = count("cache_read_input_tokens").unwrap_or(0)
                + count("cache_creation_input_tokens").unwrap_or(0);
            Ok(LlmResponse {
                text,
                input_tokens: input + cached,
                output_tokens: output,
            })
        }
        _ => Ok(LlmResponse::estimated(prompt, text)),
    }
}

/// OpenCode CLI client implementation.
#[derive(Default)]
pub struct OpenCodeClient {
    pub model: Option<String>,
    /// Backend provider (e.g., "lmstudio", "ollama").
    pub backend: Option<String>,
}

impl OpenCodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// `-m` argument in `backend/model` form, if one can be built.
    fn model_arg(&self) -> Option<String> {
        match (&self.backend, &self.model) {
            (Some(_), Some(model)) if model.contains('/') => Some(model.clone()),
            (Some(backend), Some(model)) => Some(format!("{}/{}", backend, model)),
            (None, Some(model)) => Some(model.clone()),
            // A backend alone is not a model path; let opencode use its default.
            (_, None) => None,
        }
    }
}

impl LlmClient for OpenCodeClient {
    fn complete(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        // opencode run "prompt" [-m provider/model] --format json
        let mut args = vec!["run", prompt, "--format", "json"];
        let model_arg = self.model_arg();
        if let Some(ref model) = model_arg {
            args.push("-m");
            args.push(model);
        }

        let output = Command::new("opencode")
            .args(&args)
            .output()
            .map_err(|e| LlmError::ClientError(format!("Failed to run opencode CLI: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(LlmError::ClientError(format!(
                "opencode CLI failed (exit {}): stderr={} stdout={}",
                output.status.code().unwrap_or(-1),
                stderr.trim(),
                stdout.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = parse_opencode_events(&stdout).ok_or_else(|| {
            LlmError::ClientError(format!(
                "No text output from opencode. Raw output: {}",
                stdout.chars().take(500).collect::<String>()
            ))
        })?;

        Ok(LlmResponse::estimated(prompt, text))
    }
}

/// Concatenate the text parts of opencode's line-delimited JSON events.
fn parse_opencode_events(stdout: &str) -> Option<String> {
    let mut text_parts = Vec::new();
    for line in stdout.lines() {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(line) {
            if json.get("type").and_then(|v| v.as_str()) == Some("text") {
                if let Some(text) = json
                    .get("part")
                    .and_then(|p| p.get("text"))
                    .and_then(|t| t.as_str())
                {
                    text_parts.push(text.to_string());
                }
            }
        }
    }

    if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join(""))
    }
}

/// Errors from LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM client error: {0}")]
    ClientError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
