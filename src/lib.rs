pub mod app;
pub mod cache;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod git;
pub mod llm;
pub mod models;
pub mod oracle;
pub mod pipeline;
pub mod report;
pub mod rubric;
pub mod scoring;
pub mod utils;

#[cfg(test)]
pub mod test_utils;
