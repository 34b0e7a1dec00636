//! Review engine for prwarden.
//!
//! Fetches a pull request from GitHub, asks a chat-completion model to
//! review each changed file in bounded batches, and publishes one
//! aggregated review comment.

pub mod filter;
pub mod github;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod session;
