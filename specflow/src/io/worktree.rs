//! Worktree listing.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::io::git::Git;

/// One entry of the repository's worktree list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    /// Short branch name; empty for detached or bare worktrees.
    pub branch: String,
    pub head: String,
}

impl WorktreeEntry {
    /// Trailing path segment (`SPEC-ISSUE-42` for `.../worktrees/SPEC-ISSUE-42`).
    pub fn basename(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// Read-only view of the repository's worktrees.
#[async_trait]
pub trait WorktreeLister: Send + Sync {
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<WorktreeEntry>>;

    /// Repository root the worktrees belong to.
    fn root(&self) -> &Path;
}

/// [`WorktreeLister`] backed by `git worktree list --porcelain`.
#[derive(Debug, Clone)]
pub struct GitWorktrees {
    git: Git,
}

impl GitWorktrees {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { git: Git::new(root) }
    }
}

#[async_trait]
impl WorktreeLister for GitWorktrees {
    #[instrument(skip_all, fields(root = %self.git.workdir().display()))]
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<WorktreeEntry>> {
        let out = self.git.worktree_list_porcelain(cancel).await?;
        let entries = parse_worktree_porcelain(&out)?;
        debug!(count = entries.len(), "listed worktrees");
        Ok(entries)
    }

    fn root(&self) -> &Path {
        self.git.workdir()
    }
}

/// Parse `git worktree list --porcelain`: blank-line separated records of
/// `worktree <path>`, `HEAD <sha>`, `branch refs/heads/<name>` | `detached` | `bare`.
pub fn parse_worktree_porcelain(out: &str) -> Result<Vec<WorktreeEntry>> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in out.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: String::new(),
                head: String::new(),
            });
            continue;
        }
        let entry = current
            .as_mut()
            .ok_or_else(|| anyhow!("unexpected porcelain line before worktree: '{line}'"))?;
        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = head.to_string();
        } else if let Some(branch) = line.strip_prefix("branch ") {
            entry.branch = branch
                .strip_prefix("refs/heads/")
                .unwrap_or(branch)
                .to_string();
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    Ok(entries)
}
