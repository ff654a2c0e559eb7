//! Cross-process single-writer lock for a ledger file.
//!
//! Path: `<ledger file>.lock`, e.g. `status_reef.csv.lock`. The lock is an OS
//! advisory lock held for the lifetime of [`LedgerLock`]; the file body is JSON
//! [`LockMetadata`] describing the holder. The OS drops advisory locks when a
//! process dies, so a stale lock file never blocks a later writer.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use meshledger_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Diagnostic metadata written into the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMetadata {
    pub pid: u32,
    #[serde(default)]
    pub host: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub command: String,
}

impl LockMetadata {
    /// Metadata describing the current process.
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            started_at: Utc::now(),
            command: std::env::args().collect::<Vec<_>>().join(" "),
        }
    }

    pub fn display_summary(&self) -> String {
        let age = Utc::now().signed_duration_since(self.started_at);
        format!(
            "PID {} on {} started {}s ago ({})",
            self.pid,
            self.host,
            age.num_seconds().max(0),
            self.command
        )
    }
}

/// Lock file path for a ledger.
pub fn lock_path_for(ledger_path: &Path) -> PathBuf {
    let mut name = ledger_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    ledger_path.with_file_name(name)
}

/// A held single-writer lock. Released on drop.
#[derive(Debug)]
pub struct LedgerLock {
    file: File,
    path: PathBuf,
    metadata: LockMetadata,
}

impl LedgerLock {
    /// Take the writer lock for `ledger_path` without blocking.
    ///
    /// # Errors
    ///
    /// [`Error::LedgerLocked`] if another writer holds it, [`Error::Io`] otherwise.
    pub fn acquire(ledger_path: &Path) -> Result<Self> {
        let path = lock_path_for(ledger_path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() != fs2::lock_contended_error().raw_os_error() {
                return Err(Error::Io(e));
            }
            let holder = read_metadata(&mut file)
                .map(|m| m.display_summary())
                .unwrap_or_else(|| "unknown holder".to_string());
            return Err(Error::LedgerLocked(format!("{} ({})", holder, path.display())));
        }

        let metadata = LockMetadata::current();
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| Error::internal(format!("serialize lock metadata: {}", e)))?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        tracing::debug!(lock = %path.display(), pid = metadata.pid, "Acquired ledger lock");

        Ok(Self {
            file,
            path,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &LockMetadata {
        &self.metadata
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        // The file stays behind; only the advisory lock matters.
        let _ = self.file.unlock();
        tracing::debug!(lock = %self.path.display(), "Released ledger lock");
    }
}

fn read_metadata(file: &mut File) -> Option<LockMetadata> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_appends_suffix() {
        let p = lock_path_for(Path::new("/proj/status_reef.csv"));
        assert_eq!(p, PathBuf::from("/proj/status_reef.csv.lock"));
    }

    #[test]
    fn test_second_writer_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = dir.path().join("status.csv");

        let first = LedgerLock::acquire(&ledger).unwrap();
        assert_eq!(first.metadata().pid, std::process::id());

        let err = LedgerLock::acquire(&ledger).unwrap_err();
        assert!(matches!(err, Error::LedgerLocked(_)));
        assert!(err.to_string().contains(&format!("PID {}", std::process::id())));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = dir.path().join("status.csv");

        drop(LedgerLock::acquire(&ledger).unwrap());
        let again = LedgerLock::acquire(&ledger);
        assert!(again.is_ok());
    }

    #[test]
    fn test_metadata_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = dir.path().join("status.csv");
        let lock = LedgerLock::acquire(&ledger).unwrap();

        let text = std::fs::read_to_string(lock.path()).unwrap();
        let meta: LockMetadata = serde_json::from_str(&text).unwrap();
        assert_eq!(meta.pid, std::process::id());
    }
}
