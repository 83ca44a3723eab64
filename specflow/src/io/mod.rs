//! Collaborator traits and their process-backed adapters.

pub mod config;
pub mod diagnostics;
pub mod executor;
pub mod gh;
pub mod git;
pub mod host;
pub mod process;
pub mod worktree;
