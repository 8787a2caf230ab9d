//! Unified diff generation and patch application.
//!
//! Diffs are generated in-process; application shells out to the `git`
//! binary (`git apply`), which consumes standard unified diffs and supports
//! reverse application for undo.

use std::path::Path;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{OrchestratorError, Result};

static GIT_BINARY: LazyLock<Option<std::path::PathBuf>> =
    LazyLock::new(|| which::which("git").ok());

/// Line counts for UI display, derived from a patch body without applying it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchStat {
    pub additions: usize,
    pub deletions: usize,
}

/// Count added/removed lines in a unified diff, ignoring file headers.
pub fn patch_stat(patch: &str) -> PatchStat {
    let mut additions = 0;
    let mut deletions = 0;
    for line in patch.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            additions += 1;
        } else if line.starts_with('-') {
            deletions += 1;
        }
    }
    PatchStat {
        additions,
        deletions,
    }
}

/// Produce a newline-terminated unified diff between two file states.
///
/// Returns `None` when the contents are identical. `rel_path` is the file
/// path relative to the directory patches are applied from.
pub fn unified_diff(before: &str, after: &str, rel_path: &str) -> Option<String> {
    if before == after {
        return None;
    }

    let diff = similar::TextDiff::from_lines(before, after);
    let mut body = String::new();
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        body.push_str(&hunk.to_string());
    }
    if body.is_empty() {
        return None;
    }

    let mut patch = format!("--- a/{}\n+++ b/{}\n{}", rel_path, rel_path, body);
    if !patch.ends_with('\n') {
        patch.push('\n');
    }
    Some(patch)
}

fn git_binary() -> Result<&'static Path> {
    GIT_BINARY
        .as_deref()
        .ok_or_else(|| OrchestratorError::patch("git binary not found on PATH"))
}

async fn run_git_apply(workdir: &Path, patch_file: &Path, extra: &[&str]) -> Result<()> {
    let git = git_binary()?;
    let output = Command::new(git)
        .arg("apply")
        .arg("--whitespace=nowarn")
        .args(extra)
        .arg(patch_file)
        .current_dir(workdir)
        .output()
        .await
        .map_err(|e| OrchestratorError::patch(format!("failed to run git apply: {}", e)))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(OrchestratorError::patch(format!(
            "git apply failed for {}: {}",
            patch_file.display(),
            stderr.trim()
        )))
    }
}

/// Apply a patch file forward (reproduces the post-call file state).
pub async fn apply_patch(workdir: &Path, patch_file: &Path) -> Result<()> {
    run_git_apply(workdir, patch_file, &[]).await
}

/// Reverse-apply a patch file (reproduces the pre-call file state).
pub async fn reverse_apply_patch(workdir: &Path, patch_file: &Path) -> Result<()> {
    run_git_apply(workdir, patch_file, &["--reverse"]).await
}

/// Dry-run a reverse application without touching the working tree.
pub async fn check_reverse_apply(workdir: &Path, patch_file: &Path) -> bool {
    run_git_apply(workdir, patch_file, &["--reverse", "--check"])
        .await
        .is_ok()
}

/// Dry-run a forward application. Used to tell "already reverted" apart from
/// a genuinely corrupt patch during bulk undo.
pub async fn check_forward_apply(workdir: &Path, patch_file: &Path) -> bool {
    run_git_apply(workdir, patch_file, &["--check"]).await.is_ok()
}
