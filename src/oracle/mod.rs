//! Commit scoring through an LLM.
//!
//! [`ScoringOracle`] is the seam between the scoring pipeline and whatever
//! produces dimension scores. [`LlmOracle`] implements it on top of any
//! [`LlmClient`] using the rubric set for its prompts.

pub mod parser;
pub mod prompt;

use std::sync::Arc;

use log::debug;

use crate::llm::{LlmClient, LlmError};
use crate::models::CommitDiff;
use crate::rubric::RubricSet;
use crate::scoring::DimensionScores;
use crate::utils::truncate_chars;

pub use parser::ParseError;

/// Characters per token used to size diff content.
pub const CHARS_PER_TOKEN: usize = 4;
pub const TRUNCATION_MARKER: &str = "\n\n[... diff truncated due to size ...]";

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] ParseError),
}

/// Diff content prepared for the oracle, cut to a token budget.
#[derive(Debug, Clone)]
pub struct DiffPayload<'a> {
    pub diff: &'a CommitDiff,
    pub content: String,
    pub truncated: bool,
}

impl<'a> DiffPayload<'a> {
    /// Render `diff` and cut it to `max_tokens * 4` characters.
    pub fn new(diff: &'a CommitDiff, max_tokens: usize) -> Self {
        let full = render_diff(diff);
        let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
        let (kept, truncated) = truncate_chars(&full, max_chars);
        let content = if truncated {
            format!("{}{}", kept, TRUNCATION_MARKER)
        } else {
            full
        };
        Self {
            diff,
            content,
            truncated,
        }
    }

    pub fn hash(&self) -> &str {
        self.diff.hash()
    }
}

fn render_diff(diff: &CommitDiff) -> String {
    diff.files
        .iter()
        .map(|file| {
            let body = if file.is_binary {
                "Binary file changed"
            } else {
                file.content.as_str()
            };
            format!("--- {} ({})\n{}", file.path, file.status, body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Raw scores for one commit as returned by an oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleScore {
    pub commit_hash: String,
    pub dimensions: DimensionScores,
    pub reasoning: String,
    pub tokens_used: u64,
}

/// Anything that can score commit diffs.
pub trait ScoringOracle: Send + Sync {
    fn score_one(&self, payload: &DiffPayload) -> Result<OracleScore, OracleError>;

    /// Score several commits in one call.
    ///
    /// Results carry the hashes the oracle reported; they may be abbreviated,
    /// reordered or missing entries.
    fn score_batch(&self, payloads: &[DiffPayload]) -> Result<Vec<OracleScore>, OracleError>;

    fn provider(&self) -> &str;
    fn model(&self) -> &str;
}

/// Oracle backed by an [`LlmClient`].
pub struct LlmOracle {
    client: Arc<dyn LlmClient>,
    rubrics: RubricSet,
    provider: String,
    model: String,
}

impl LlmOracle {
    pub fn new(
        client: Arc<dyn LlmClient>,
        rubrics: RubricSet,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            rubrics,
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl ScoringOracle for LlmOracle {
    fn score_one(&self, payload: &DiffPayload) -> Result<OracleScore, OracleError> {
        let prompt = prompt::build_commit_prompt(payload, &self.rubrics);
        let response = self.client.complete(&prompt)?;
        debug!(
            "Scored {} using {} tokens",
            payload.diff.commit.abbreviated_hash,
            response.total_tokens()
        );

        let parsed = parser::parse_commit_response(&response.text)?;
        Ok(OracleScore {
            commit_hash: payload.hash().to_string(),
            dimensions: parsed.dimensions,
            reasoning: parsed.reasoning,
            tokens_used: response.total_tokens(),
        })
    }

    fn score_batch(&self, payloads: &[DiffPayload]) -> Result<Vec<OracleScore>, OracleError> {
        let prompt = prompt::build_batch_prompt(payloads, &self.rubrics);
        let response = self.client.complete(&prompt)?;
        let parsed = parser::parse_batch_response(&response.text)?;
        debug!(
            "Scored batch of {} ({} returned) using {} tokens",
            payloads.len(),
            parsed.len(),
            response.total_tokens()
        );

        let per_commit = response.total_tokens() / payloads.len().max(1) as u64;
        Ok(parsed
            .into_iter()
            .map(|(commit_hash, score)| OracleScore {
                commit_hash,
                dimensions: score.dimensions,
                reasoning: score.reasoning,
                tokens_used: per_commit,
            })
            .collect())
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Scripted oracles for tests.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::test_utils::dimension_scores;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scores every commit at a fixed value; fails for listed hashes.
    pub struct MockOracle {
        pub value: f64,
        pub failing: HashSet<String>,
        /// Hashes silently left out of batch responses.
        pub omitted: HashSet<String>,
        pub calls: AtomicUsize,
        pub batch_calls: AtomicUsize,
        pub seen: Mutex<Vec<String>>,
    }

    impl MockOracle {
        pub fn new(value: f64) -> Self {
            Self {
                value,
                failing: HashSet::new(),
                omitted: HashSet::new(),
                calls: AtomicUsize::new(0),
                batch_calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn failing_on(mut self, hash: &str) -> Self {
            self.failing.insert(hash.to_string());
            self
        }

        pub fn omitting(mut self, hash: &str) -> Self {
            self.omitted.insert(hash.to_string());
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn score(&self, payload: &DiffPayload) -> OracleScore {
            self.seen.lock().unwrap().push(payload.content.clone());
            OracleScore {
                commit_hash: payload.hash().to_string(),
                dimensions: dimension_scores(self.value, self.value, self.value, self.value),
                reasoning: "mock".to_string(),
                tokens_used: 100,
            }
        }
    }

    impl ScoringOracle for MockOracle {
        fn score_one(&self, payload: &DiffPayload) -> Result<OracleScore, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(payload.hash()) {
                return Err(LlmError::ClientError("oracle unavailable".to_string()).into());
            }
            Ok(self.score(payload))
        }

        fn score_batch(&self, payloads: &[DiffPayload]) -> Result<Vec<OracleScore>, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if payloads.iter().any(|p| self.failing.contains(p.hash())) {
                return Err(LlmError::ClientError("oracle unavailable".to_string()).into());
            }
            Ok(payloads
                .iter()
                .filter(|p| !self.omitted.contains(p.hash()))
                .map(|p| self.score(p))
                .collect())
        }

        fn provider(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-1"
        }
    }
}
