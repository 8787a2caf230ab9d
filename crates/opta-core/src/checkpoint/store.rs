//! Per-session checkpoint store.
//!
//! Every file-mutating tool call gets a numbered unified-diff patch plus a
//! record in an append-only log (`index.jsonl`, one JSON record per line),
//! written only after the call completes. Appending a record never rewrites
//! earlier ones, so concurrent sub-agents sharing a session cannot clobber
//! each other's entries. Patch paths are stored relative to the store's
//! working directory so `git apply` can consume them from there.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::checkpoint::patch;
use crate::error::{OrchestratorError, Result};

/// One undoable mutation. `n` is monotonically increasing per session,
/// assigned at creation time and never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub n: u64,
    pub tool: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
}

/// Session-keyed checkpoint store rooted at `<workdir>/.opta/checkpoints`.
///
/// Sequence-number assignment is read-then-append, so each session's log is
/// guarded by its own async lock.
pub struct CheckpointStore {
    workdir: PathBuf,
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CheckpointStore {
    pub fn new(workdir: PathBuf) -> Self {
        let root = workdir.join(".opta").join("checkpoints");
        Self {
            workdir,
            root,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn session_dir(&self, session: &str) -> PathBuf {
        self.root.join(session)
    }

    fn log_path(&self, session: &str) -> PathBuf {
        self.session_dir(session).join("index.jsonl")
    }

    fn patch_path(&self, session: &str, n: u64) -> PathBuf {
        self.session_dir(session).join(format!("{}.patch", n))
    }

    async fn session_lock(&self, session: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read the session's log. Corrupt records are skipped with a warning
    /// rather than failing: the undo log degrades, the session keeps working.
    async fn read_log(&self, session: &str) -> Vec<Checkpoint> {
        let raw = match fs::read_to_string(self.log_path(session)).await {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        let mut checkpoints = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Checkpoint>(line) {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => warn!(session, error = %e, "Skipping corrupt checkpoint record"),
            }
        }
        checkpoints.sort_by_key(|c| c.n);
        checkpoints
    }

    async fn append_record(&self, session: &str, checkpoint: &Checkpoint) -> Result<()> {
        let mut line = serde_json::to_string(checkpoint)
            .map_err(|e| OrchestratorError::execution(format!("serialize checkpoint: {}", e)))?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(session))
            .await
            .map_err(|e| OrchestratorError::execution(format!("open checkpoint log: {}", e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| OrchestratorError::execution(format!("append checkpoint: {}", e)))
    }

    /// Express `path` relative to the store workdir for use in patch headers.
    /// Files outside the workdir are not checkpointed.
    fn relativize(&self, path: &Path) -> Option<String> {
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        };
        abs.strip_prefix(&self.workdir)
            .ok()
            .map(|rel| rel.to_string_lossy().into_owned())
    }

    /// Snapshot one mutating call's effect on `path`.
    ///
    /// No-op (no patch file, no log record) when the diff is empty. Returns
    /// the created checkpoint, or `None` when nothing was recorded.
    pub async fn create_checkpoint(
        &self,
        session: &str,
        tool: &str,
        path: &Path,
        before: &str,
        after: &str,
    ) -> Result<Option<Checkpoint>> {
        let Some(rel) = self.relativize(path) else {
            debug!(path = %path.display(), "Path outside workdir, not checkpointed");
            return Ok(None);
        };

        let Some(diff) = patch::unified_diff(before, after, &rel) else {
            return Ok(None);
        };

        let lock = self.session_lock(session).await;
        let _guard = lock.lock().await;

        fs::create_dir_all(self.session_dir(session))
            .await
            .map_err(|e| OrchestratorError::execution(format!("create checkpoint dir: {}", e)))?;

        let existing = self.read_log(session).await;
        let n = existing.iter().map(|c| c.n).max().unwrap_or(0) + 1;

        fs::write(self.patch_path(session, n), &diff)
            .await
            .map_err(|e| OrchestratorError::execution(format!("write patch: {}", e)))?;

        let checkpoint = Checkpoint {
            n,
            tool: tool.to_string(),
            path: rel,
            timestamp: Utc::now(),
        };
        self.append_record(session, &checkpoint).await?;

        debug!(session, n, tool, "Checkpoint created");
        Ok(Some(checkpoint))
    }

    /// All checkpoints recorded for a session, oldest first.
    pub async fn list_checkpoints(&self, session: &str) -> Vec<Checkpoint> {
        self.read_log(session).await
    }

    /// Reverse-apply one checkpoint's patch. Without `n`, targets the most
    /// recently created checkpoint. Errors when the session has none.
    pub async fn undo_checkpoint(&self, session: &str, n: Option<u64>) -> Result<Checkpoint> {
        let lock = self.session_lock(session).await;
        let _guard = lock.lock().await;

        let checkpoints = self.read_log(session).await;
        if checkpoints.is_empty() {
            return Err(OrchestratorError::validation(format!(
                "session {} has no checkpoints",
                session
            )));
        }

        let target = match n {
            Some(n) => checkpoints
                .iter()
                .find(|c| c.n == n)
                .cloned()
                .ok_or_else(|| {
                    OrchestratorError::validation(format!("no checkpoint {} in session", n))
                })?,
            None => checkpoints
                .iter()
                .max_by_key(|c| c.n)
                .cloned()
                .ok_or_else(|| OrchestratorError::validation("empty checkpoint log"))?,
        };

        patch::reverse_apply_patch(&self.workdir, &self.patch_path(session, target.n)).await?;
        Ok(target)
    }

    /// Reverse-apply every checkpoint, last-created first. Individual patches
    /// that fail to apply are skipped; returns the count of successful
    /// reversals.
    pub async fn undo_all_checkpoints(&self, session: &str) -> Result<usize> {
        let lock = self.session_lock(session).await;
        let _guard = lock.lock().await;

        let mut checkpoints = self.read_log(session).await;
        checkpoints.sort_by_key(|c| std::cmp::Reverse(c.n));

        let mut reverted = 0;
        for checkpoint in &checkpoints {
            let patch_file = self.patch_path(session, checkpoint.n);
            if !patch::check_reverse_apply(&self.workdir, &patch_file).await {
                // Distinguish a benign already-reverted patch from real
                // corruption for the log, but tolerate both.
                if patch::check_forward_apply(&self.workdir, &patch_file).await {
                    debug!(session, n = checkpoint.n, "Patch already reverted, skipping");
                } else {
                    warn!(session, n = checkpoint.n, "Patch does not apply in either direction, skipping");
                }
                continue;
            }
            match patch::reverse_apply_patch(&self.workdir, &patch_file).await {
                Ok(()) => reverted += 1,
                Err(e) => warn!(session, n = checkpoint.n, error = %e, "Reverse apply failed, skipping"),
            }
        }
        Ok(reverted)
    }

    /// Raw patch body for UI display.
    pub async fn read_patch_content(&self, session: &str, n: u64) -> Result<String> {
        fs::read_to_string(self.patch_path(session, n))
            .await
            .map_err(|e| OrchestratorError::validation(format!("no patch {}: {}", n, e)))
    }

    /// Added/removed line counts for one checkpoint.
    pub async fn patch_stat(&self, session: &str, n: u64) -> Result<patch::PatchStat> {
        let content = self.read_patch_content(session, n).await?;
        Ok(patch::patch_stat(&content))
    }

    /// Remove the session's entire checkpoint directory. No-op when absent.
    pub async fn cleanup_checkpoints(&self, session: &str) -> Result<()> {
        let dir = self.session_dir(session);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OrchestratorError::execution(format!(
                "remove checkpoint dir: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> CheckpointStore {
        CheckpointStore::new(dir.to_path_buf())
    }

    #[tokio::test]
    async fn test_empty_diff_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let created = store
            .create_checkpoint("s1", "edit", &dir.path().join("f.txt"), "same\n", "same\n")
            .await
            .unwrap();

        assert!(created.is_none());
        assert!(store.list_checkpoints("s1").await.is_empty());
        assert!(!dir.path().join(".opta/checkpoints/s1").exists());
    }

    #[tokio::test]
    async fn test_sequential_checkpoints_increase_n() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let file = dir.path().join("f.txt");

        let states = ["v1\n", "v2\n", "v3\n", "v4\n"];
        for pair in states.windows(2) {
            store
                .create_checkpoint("s1", "write", &file, pair[0], pair[1])
                .await
                .unwrap();
        }

        let listed = store.list_checkpoints("s1").await;
        assert_eq!(listed.len(), 3);
        let ns: Vec<u64> = listed.iter().map(|c| c.n).collect();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_log_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let file = dir.path().join("f.txt");

        store
            .create_checkpoint("s1", "write", &file, "a\n", "b\n")
            .await
            .unwrap();
        let after_one = std::fs::read_to_string(store.log_path("s1")).unwrap();

        store
            .create_checkpoint("s1", "write", &file, "b\n", "c\n")
            .await
            .unwrap();
        let after_two = std::fs::read_to_string(store.log_path("s1")).unwrap();

        // The first record is still there, byte for byte.
        assert!(after_two.starts_with(&after_one));
        assert_eq!(after_two.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_undo_all_restores_pre_session_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let file = dir.path().join("f.txt");

        let states = ["original\n", "first edit\n", "second edit\n", "third edit\n"];
        std::fs::write(&file, states[0]).unwrap();
        for pair in states.windows(2) {
            std::fs::write(&file, pair[1]).unwrap();
            store
                .create_checkpoint("s1", "edit", &file, pair[0], pair[1])
                .await
                .unwrap();
        }
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "third edit\n");

        let reverted = store.undo_all_checkpoints("s1").await.unwrap();
        assert_eq!(reverted, 3);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "original\n");
    }

    #[tokio::test]
    async fn test_targeted_undo_reverts_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let file = dir.path().join("f.txt");

        std::fs::write(&file, "a\n").unwrap();
        std::fs::write(&file, "b\n").unwrap();
        store
            .create_checkpoint("s1", "write", &file, "a\n", "b\n")
            .await
            .unwrap();

        let undone = store.undo_checkpoint("s1", None).await.unwrap();
        assert_eq!(undone.n, 1);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "a\n");
    }

    #[tokio::test]
    async fn test_undo_without_checkpoints_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let err = store.undo_checkpoint("nope", None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_undo_all_skips_already_reverted_patch() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let file = dir.path().join("f.txt");

        std::fs::write(&file, "a\n").unwrap();
        std::fs::write(&file, "b\n").unwrap();
        store
            .create_checkpoint("s1", "write", &file, "a\n", "b\n")
            .await
            .unwrap();

        // Revert manually first; bulk undo should then skip it.
        store.undo_checkpoint("s1", Some(1)).await.unwrap();
        let reverted = store.undo_all_checkpoints("s1").await.unwrap();
        assert_eq!(reverted, 0);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "a\n");
    }

    #[tokio::test]
    async fn test_corrupt_record_is_skipped_and_numbering_continues() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let file = dir.path().join("f.txt");

        store
            .create_checkpoint("s1", "write", &file, "a\n", "b\n")
            .await
            .unwrap();
        {
            use std::io::Write as _;
            let mut log = std::fs::OpenOptions::new()
                .append(true)
                .open(store.log_path("s1"))
                .unwrap();
            writeln!(log, "{{not json").unwrap();
        }

        let created = store
            .create_checkpoint("s1", "write", &file, "b\n", "c\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.n, 2);
        assert_eq!(store.list_checkpoints("s1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_patch_stat_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let file = dir.path().join("f.txt");

        store
            .create_checkpoint("s1", "write", &file, "a\nb\n", "a\nc\nd\n")
            .await
            .unwrap();

        let content = store.read_patch_content("s1", 1).await.unwrap();
        assert!(content.ends_with('\n'));
        let stat = store.patch_stat("s1", 1).await.unwrap();
        assert_eq!(stat.additions, 2);
        assert_eq!(stat.deletions, 1);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let file = dir.path().join("f.txt");

        store
            .create_checkpoint("s1", "write", &file, "a\n", "b\n")
            .await
            .unwrap();
        store.cleanup_checkpoints("s1").await.unwrap();
        assert!(!dir.path().join(".opta/checkpoints/s1").exists());
        // Second cleanup is a no-op.
        store.cleanup_checkpoints("s1").await.unwrap();
    }
}
