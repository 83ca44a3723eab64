//! SPEC-driven worktree pipeline.
//!
//! This crate drives a unit of work (a SPEC bound to its own git worktree)
//! through Plan, Run and Sync, gates it behind a five-pillar quality
//! assessment, reviews and merges its pull request, and closes the
//! originating issue. The architecture keeps the same split throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (SPEC ids, commit grammar,
//!   scoring, review and merge policy). No I/O, fully testable in isolation.
//! - **[`io`]**: Collaborator traits and their process-backed adapters
//!   (`git`, `gh`, phase and diagnostics commands, config files).
//!
//! Orchestration modules ([`quality`], [`orchestrator`], [`review`],
//! [`merge`], [`issue`], [`land`]) combine core policy with collaborators.

pub mod core;
pub mod error;
pub mod io;
pub mod issue;
pub mod land;
pub mod logging;
pub mod merge;
pub mod orchestrator;
pub mod quality;
pub mod reporter;
pub mod retry;
pub mod review;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{FlowError, Result};
