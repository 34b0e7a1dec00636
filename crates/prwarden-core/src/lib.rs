//! Core types, configuration, and error handling for prwarden.
//!
//! This crate provides the shared foundation used by the review engine
//! and the binary:
//! - [`ReviewError`]: the failure taxonomy, built on `thiserror`
//! - [`WardenConfig`]: configuration loaded from `.prwarden.toml`
//! - [`Credentials`]: the two secrets a review session needs
//! - Shared types: [`RepoId`], [`ChangeRequestSummary`], [`ChangedFile`],
//!   [`FileFinding`]

mod config;
mod error;
mod types;

pub use config::{Credentials, GitHubConfig, LlmConfig, ReviewConfig, WardenConfig};
pub use error::ReviewError;
pub use types::{ChangeRequestSummary, ChangedFile, FileFinding, FindingStatus, RepoId};

/// A convenience `Result` type for prwarden operations.
pub type Result<T> = std::result::Result<T, ReviewError>;
