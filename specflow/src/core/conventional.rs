//! Conventional Commits header matching.

use std::sync::LazyLock;

use regex::Regex;

/// Commit types accepted in the header.
pub const COMMIT_TYPES: &[&str] = &[
    "feat", "fix", "docs", "style", "refactor", "perf", "test", "build", "ci", "chore", "revert",
];

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?:{})(?:\([^()\s]+\))?!?: \S.*$",
        COMMIT_TYPES.join("|")
    ))
    .unwrap()
});

/// True if the first line of `message` is `type(scope)?!?: description`.
pub fn is_conventional_commit(message: &str) -> bool {
    let header = message.lines().next().unwrap_or("").trim_end();
    HEADER_RE.is_match(header)
}
