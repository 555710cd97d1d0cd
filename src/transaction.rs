// src/transaction.rs

//! Transaction Manager (§4.4): per-batch snapshot/commit/rollback with a
//! strict state machine and a background sweep for stale transactions.
//!
//! Lock-file acquisition via `fs2` enforces the single-tenant-per-root
//! assumption (§1); rollback is snapshot-then-restore, with an age-based
//! sweep for transactions left behind by a crashed prior run.

use crate::error::{Error, Result};
use crate::fs_service::FileSystemService;
use crate::hash::{hash_bytes, HashAlgorithm};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Transaction lifecycle state (§3 `TransactionMetadata.state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionState {
    Pending,
    Active,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
}

/// One path's pre-mutation state (§3 `FileSnapshot`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub path: String,
    pub existed_before: bool,
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
    pub mode: Option<u32>,
    pub sha256: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TransactionMeta {
    id: String,
    state: TransactionState,
    start_time_secs: u64,
    snapshot_paths: Vec<String>,
}

/// Outcome of a `rollback` call (§4.4).
#[derive(Debug, Clone, Default)]
pub struct RollbackResult {
    pub success: bool,
    pub restored: Vec<String>,
    pub failed_to_restore: Vec<String>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

/// A single in-flight batch transaction.
pub struct Transaction {
    pub id: String,
    pub state: TransactionState,
    pub start_time: SystemTime,
    snapshots: Vec<Snapshot>,
    dir: PathBuf,
    lock_file: Option<fs::File>,
}

impl Transaction {
    fn transition(&mut self, expected: &[TransactionState], next: TransactionState) -> Result<()> {
        if !expected.contains(&self.state) {
            return Err(Error::TransactionInvalidState {
                expected: format!("{expected:?}"),
                actual: format!("{:?}", self.state),
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Snapshot/commit/rollback manager, one per request when `transaction = true` (§4.4).
pub struct TransactionManager<'a> {
    fs: &'a FileSystemService,
    txn_dir: PathBuf,
    max_snapshots: usize,
}

impl<'a> TransactionManager<'a> {
    pub fn new(fs: &'a FileSystemService, txn_dir: PathBuf, max_snapshots: usize) -> Self {
        Self { fs, txn_dir, max_snapshots }
    }

    /// Create a scoped snapshot directory, acquire the root's advisory lock
    /// (single-tenant-per-root, §1), and mark the transaction `active`.
    pub fn begin(&self) -> Result<Transaction> {
        fs::create_dir_all(&self.txn_dir).map_err(Error::Io)?;
        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.txn_dir.join(&id);
        fs::create_dir_all(&dir).map_err(Error::Io)?;

        let lock_path = self.txn_dir.join(".lock");
        let lock_file = fs::OpenOptions::new().create(true).write(true).open(&lock_path).map_err(Error::Io)?;
        lock_file.lock_exclusive().map_err(Error::Io)?;

        let tx = Transaction {
            id: id.clone(),
            state: TransactionState::Active,
            start_time: SystemTime::now(),
            snapshots: Vec::new(),
            dir,
            lock_file: Some(lock_file),
        };
        self.write_meta(&tx)?;
        info!(txn_id = %id, "transaction begin");
        Ok(tx)
    }

    /// Snapshot every affected path before any mutation touches it (§4.4).
    /// Read-only operations (`analyze`, `validate`) never contribute paths
    /// here — callers are expected to have already filtered to mutating
    /// operations' affected paths.
    pub fn create_snapshots(&self, tx: &mut Transaction, affected_paths: &[String]) -> Result<()> {
        if tx.snapshots.len() + affected_paths.len() > self.max_snapshots {
            return Err(Error::SnapshotBudgetExceeded {
                count: tx.snapshots.len() + affected_paths.len(),
                max: self.max_snapshots,
            });
        }

        for path in affected_paths {
            if tx.snapshots.iter().any(|s| s.path == *path) {
                continue;
            }
            let existed_before = self.fs.exists(path);
            let (bytes, mode, sha256) = if existed_before {
                let resolved = self.fs.guard().resolve(path)?;
                let bytes = fs::read(&resolved).map_err(Error::Io)?;
                let sha256 = hash_bytes(HashAlgorithm::Sha256, &bytes).value;
                #[cfg(unix)]
                let mode = {
                    use std::os::unix::fs::PermissionsExt;
                    Some(fs::metadata(&resolved).map_err(Error::Io)?.permissions().mode())
                };
                #[cfg(not(unix))]
                let mode = None;
                (Some(bytes), mode, Some(sha256))
            } else {
                (None, None, None)
            };

            if let Some(bytes) = &bytes {
                let snapshot_file = tx.dir.join(snapshot_file_name(path));
                fs::write(&snapshot_file, bytes).map_err(Error::Io)?;
            }

            tx.snapshots.push(Snapshot { path: path.clone(), existed_before, bytes, mode, sha256 });
        }

        self.write_meta(tx)?;
        Ok(())
    }

    /// Delete snapshot artifacts and mark the transaction `committed` (§4.4).
    /// A failure here transitions to `failed` without attempting rollback —
    /// the target files are already in their final state.
    pub fn commit(&self, tx: &mut Transaction) -> Result<()> {
        tx.transition(&[TransactionState::Active], TransactionState::Committing)?;
        match fs::remove_dir_all(&tx.dir) {
            Ok(()) => {
                tx.state = TransactionState::Committed;
                info!(txn_id = %tx.id, "transaction committed");
                Ok(())
            }
            Err(e) => {
                tx.state = TransactionState::Failed;
                tracing::error!(txn_id = %tx.id, error = %e, "failed to clean up snapshot directory on commit");
                Err(Error::Io(e))
            }
        }
    }

    /// Restore every snapshot in reverse order; never throws on a missing
    /// file. Mode restoration failures are recorded as warnings, not
    /// content-restore failures (§9 open question: snapshot mode/mtime
    /// restoration is best-effort).
    pub fn rollback(&self, tx: &mut Transaction) -> Result<RollbackResult> {
        tx.transition(&[TransactionState::Active, TransactionState::Failed], TransactionState::RollingBack)?;

        let mut result = RollbackResult { success: true, ..Default::default() };

        for snapshot in tx.snapshots.iter().rev() {
            match self.restore_one(snapshot) {
                Ok(()) => result.restored.push(snapshot.path.clone()),
                Err(e) => {
                    result.failed_to_restore.push(snapshot.path.clone());
                    result.success = false;
                    result.error = Some(e.to_string());
                    tracing::error!(path = %snapshot.path, error = %e, "rollback failed to restore content");
                }
            }
        }

        let _ = fs::remove_dir_all(&tx.dir);
        tx.state = if result.success { TransactionState::RolledBack } else { TransactionState::Failed };
        info!(txn_id = %tx.id, success = result.success, "transaction rollback complete");
        Ok(result)
    }

    fn restore_one(&self, snapshot: &Snapshot) -> Result<()> {
        let resolved = self.fs.guard().resolve(&snapshot.path)?;
        if !snapshot.existed_before {
            match fs::remove_file(&resolved) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
            return Ok(());
        }

        let bytes = snapshot
            .bytes
            .clone()
            .ok_or_else(|| Error::Internal(format!("missing snapshot bytes for {}", snapshot.path)))?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        fs::write(&resolved, &bytes).map_err(Error::Io)?;

        #[cfg(unix)]
        if let Some(mode) = snapshot.mode {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&resolved, fs::Permissions::from_mode(mode)) {
                warn!(path = %snapshot.path, error = %e, "failed to restore file mode during rollback");
            }
        }

        Ok(())
    }

    /// Scan the transaction directory for transactions left `active` by a
    /// crashed prior run and older than `max_age`, rolling each back.
    /// Intended to be invoked periodically (every 5 minutes per §4.4) by an
    /// embedder; this library does not spawn its own background thread.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<Vec<String>> {
        let mut swept = Vec::new();
        let Ok(entries) = fs::read_dir(&self.txn_dir) else {
            return Ok(swept);
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let meta_path = path.join("meta.json");
            let Ok(raw) = fs::read_to_string(&meta_path) else { continue };
            let Ok(meta): std::result::Result<TransactionMeta, _> = serde_json::from_str(&raw) else { continue };
            if !matches!(meta.state, TransactionState::Active | TransactionState::RollingBack) {
                continue;
            }
            let age = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH + Duration::from_secs(meta.start_time_secs))
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            let mut tx = self.reload(meta, path)?;
            let _ = self.rollback(&mut tx);
            swept.push(tx.id.clone());
        }
        Ok(swept)
    }

    fn reload(&self, meta: TransactionMeta, dir: PathBuf) -> Result<Transaction> {
        let mut snapshots = Vec::new();
        for path in &meta.snapshot_paths {
            let snapshot_file = dir.join(snapshot_file_name(path));
            let bytes = fs::read(&snapshot_file).ok();
            snapshots.push(Snapshot { path: path.clone(), existed_before: bytes.is_some(), bytes, mode: None, sha256: None });
        }
        Ok(Transaction {
            id: meta.id,
            state: TransactionState::Active,
            start_time: SystemTime::UNIX_EPOCH + Duration::from_secs(meta.start_time_secs),
            snapshots,
            dir,
            lock_file: None,
        })
    }

    fn write_meta(&self, tx: &Transaction) -> Result<()> {
        let meta = TransactionMeta {
            id: tx.id.clone(),
            state: tx.state,
            start_time_secs: tx.start_time.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs(),
            snapshot_paths: tx.snapshots.iter().map(|s| s.path.clone()).collect(),
        };
        let raw = serde_json::to_string(&meta).map_err(|e| Error::Internal(e.to_string()))?;
        fs::write(tx.dir.join("meta.json"), raw).map_err(Error::Io)
    }
}

fn snapshot_file_name(path: &str) -> String {
    hash_bytes(HashAlgorithm::Xxh128, path.as_bytes()).value
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(lock) = self.lock_file.take() {
            let _ = fs2::FileExt::unlock(&lock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_guard::PathGuard;

    fn fixture() -> (tempfile::TempDir, FileSystemService) {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystemService::new(PathGuard::new(dir.path()).unwrap());
        (dir, fs)
    }

    #[test]
    fn rollback_restores_overwritten_file() {
        let (dir, fs) = fixture();
        fs.write_many(&[("a.txt".to_string(), b"original".to_vec())]).unwrap();
        let txn_dir = dir.path().join(".txn");
        let manager = TransactionManager::new(&fs, txn_dir, 100);

        let mut tx = manager.begin().unwrap();
        manager.create_snapshots(&mut tx, &["a.txt".to_string()]).unwrap();
        fs.write_many(&[("a.txt".to_string(), b"mutated".to_vec())]).unwrap();

        let result = manager.rollback(&mut tx).unwrap();
        assert!(result.success);
        let content = fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(content, "original");
    }

    #[test]
    fn rollback_deletes_file_that_did_not_exist_before() {
        let (dir, fs) = fixture();
        let txn_dir = dir.path().join(".txn");
        let manager = TransactionManager::new(&fs, txn_dir, 100);

        let mut tx = manager.begin().unwrap();
        manager.create_snapshots(&mut tx, &["new.txt".to_string()]).unwrap();
        fs.write_many(&[("new.txt".to_string(), b"created".to_vec())]).unwrap();

        manager.rollback(&mut tx).unwrap();
        assert!(!dir.path().join("new.txt").exists());
    }

    #[test]
    fn commit_removes_snapshot_directory() {
        let (dir, fs) = fixture();
        fs.write_many(&[("a.txt".to_string(), b"x".to_vec())]).unwrap();
        let txn_dir = dir.path().join(".txn");
        let manager = TransactionManager::new(&fs, txn_dir.clone(), 100);

        let mut tx = manager.begin().unwrap();
        manager.create_snapshots(&mut tx, &["a.txt".to_string()]).unwrap();
        let tx_dir_path = txn_dir.join(&tx.id);
        manager.commit(&mut tx).unwrap();
        assert!(!tx_dir_path.exists());
        assert_eq!(tx.state, TransactionState::Committed);
    }

    #[test]
    fn snapshot_budget_exceeded_fails() {
        let (dir, fs) = fixture();
        let txn_dir = dir.path().join(".txn");
        let manager = TransactionManager::new(&fs, txn_dir, 1);
        let mut tx = manager.begin().unwrap();
        let err = manager
            .create_snapshots(&mut tx, &["a.txt".to_string(), "b.txt".to_string()])
            .unwrap_err();
        assert_eq!(err.kind(), "SnapshotBudgetExceeded");
    }

    #[test]
    fn double_commit_is_invalid_state() {
        let (dir, fs) = fixture();
        let txn_dir = dir.path().join(".txn");
        let manager = TransactionManager::new(&fs, txn_dir, 100);
        let mut tx = manager.begin().unwrap();
        manager.commit(&mut tx).unwrap();
        let err = manager.commit(&mut tx).unwrap_err();
        assert_eq!(err.kind(), "TransactionInvalidState");
    }
}
