//! Prompt construction for LLM commit scoring.

use crate::oracle::DiffPayload;
use crate::rubric::RubricSet;

const RESPONSE_SCHEMA: &str = r#"{
  "codeQuality": {"score": 0-100, "subScores": [{"name": "...", "score": 0-100, "weight": 0-1}], "reasoning": "..."},
  "complexityImpact": {"score": 0-100, "subScores": [...], "reasoning": "..."},
  "commitDiscipline": {"score": 0-100, "subScores": [...], "reasoning": "..."},
  "collaboration": {"score": 0-100, "subScores": [...], "reasoning": "..."},
  "overallReasoning": "..."
}"#;

/// Instructions and every rubric, shared by single and batch prompts.
pub fn build_system_prompt(rubrics: &RubricSet) -> String {
    let mut prompt = String::from(
        "You are a senior software engineering evaluator. Analyze git commit diffs and \
         score them against the rubrics below.\n\n\
         Evaluate each commit objectively from the code changes shown. Focus on what the \
         code does, not assumptions about the developer.\n\n\
         Score each dimension from 0 to 100:\n\
         - 90-100: Exceptional\n\
         - 70-89: Good\n\
         - 50-69: Acceptable\n\
         - 30-49: Below average\n\
         - 0-29: Poor\n\n",
    );

    for (name, content) in rubrics.iter() {
        prompt.push_str(&format!("---\n## Rubric: {}\n\n{}\n\n", name, content.trim()));
    }

    prompt.push_str(
        "---\n\nGuidelines:\n\
         - Only evaluate what you can see in the diff\n\
         - Be fair and consistent across commits\n\
         - Small but well-crafted changes can score highly\n\
         - Large but sloppy changes should score lower\n",
    );
    prompt
}

fn commit_header(payload: &DiffPayload) -> String {
    let commit = &payload.diff.commit;
    let stats = &payload.diff.stats;
    format!(
        "**Hash:** {}\n**Author:** {}\n**Date:** {}\n**Message:** {}\n**Stats:** {} files changed, +{} -{}",
        commit.hash,
        commit.author.name,
        commit.date.to_rfc3339(),
        commit.message.trim(),
        stats.total_files,
        stats.total_additions,
        stats.total_deletions
    )
}

/// Prompt asking for one commit's scores.
pub fn build_commit_prompt(payload: &DiffPayload, rubrics: &RubricSet) -> String {
    format!(
        r#"{}

## Commit to Evaluate

{}

### Diff Content

```diff
{}
```

Evaluate this commit on all four rubric dimensions. Respond with only a JSON object of this shape:

{}
"#,
        build_system_prompt(rubrics),
        commit_header(payload),
        payload.content,
        RESPONSE_SCHEMA
    )
}

/// Prompt asking for several commits' scores in one response.
pub fn build_batch_prompt(payloads: &[DiffPayload], rubrics: &RubricSet) -> String {
    let commits: Vec<String> = payloads
        .iter()
        .enumerate()
        .map(|(i, payload)| {
            format!(
                "### Commit {}\n{}\n\n```diff\n{}\n```",
                i + 1,
                commit_header(payload),
                payload.content
            )
        })
        .collect();

    format!(
        r#"{}

## Batch of {} Commits to Evaluate

{}

Evaluate each commit individually on all four rubric dimensions. Respond with only a JSON object
`{{"scores": [...]}}` holding one entry per commit. Each entry has a "commitHash" field with the
commit's hash plus the fields of this shape:

{}
"#,
        build_system_prompt(rubrics),
        payloads.len(),
        commits.join("\n\n---\n\n"),
        RESPONSE_SCHEMA
    )
}
