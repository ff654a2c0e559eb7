//! Rolling back recorded progress.
//!
//! Two modes, both split into a plan that can be shown (dry run) and an
//! execution step:
//!
//! - [`selective`]: flip completion flags of chosen stages for chosen items.
//!   Never deletes files or rows.
//! - [`staged`]: empty the directories of every stage after a cutoff and
//!   clear their ledger columns, or wipe the project back to its inputs.
//!
//! Paths on the preserve list are never touched by either mode.

pub mod selective;
pub mod staged;

pub use selective::{plan_selective, FlagChange, SelectivePlan};
pub use staged::{plan_staged, Cutoff, StagedPlan};

use meshledger_ledger::{LedgerStore, StageGate};
use std::fmt;
use std::path::{Path, PathBuf};

/// What a reset did on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    /// Files and directories deleted.
    pub removed: Vec<PathBuf>,
    /// Entries left alone because they are, or contain, a preserved path.
    pub skipped: Vec<PathBuf>,
    /// Targets that could not be deleted, with the error.
    pub failures: Vec<(PathBuf, String)>,
    /// Ledger records changed.
    pub records_changed: usize,
}

impl fmt::Display for ResetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} removed, {} preserved, {} failed, {} ledger record(s) changed",
            self.removed.len(),
            self.skipped.len(),
            self.failures.len(),
            self.records_changed
        )
    }
}

/// A reset ready to be confirmed and executed.
#[derive(Debug, Clone)]
pub enum ResetPlan {
    Selective(SelectivePlan),
    Staged(StagedPlan),
}

impl ResetPlan {
    /// The confirmation the operator must give before execution.
    pub fn confirmation(&self) -> Confirmation {
        match self {
            ResetPlan::Selective(_) => Confirmation::YesNo,
            ResetPlan::Staged(_) => Confirmation::TypeYes,
        }
    }

    /// Execute against the writable ledger.
    pub fn execute(&self, ledger: LedgerStore) -> anyhow::Result<ResetReport> {
        match self {
            ResetPlan::Selective(plan) => {
                let mut gate = StageGate::new(ledger);
                Ok(plan.execute(&mut gate)?)
            }
            ResetPlan::Staged(plan) => plan.execute(ledger),
        }
    }
}

impl fmt::Display for ResetPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetPlan::Selective(plan) => plan.fmt(f),
            ResetPlan::Staged(plan) => plan.fmt(f),
        }
    }
}

/// Interactive confirmation styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// `Continue? (y/N)`
    YesNo,
    /// Destructive: the operator must type `YES`.
    TypeYes,
}

impl Confirmation {
    pub fn prompt(self) -> &'static str {
        match self {
            Confirmation::YesNo => "Continue? (y/N) ",
            Confirmation::TypeYes => "This deletes files. Type YES to continue: ",
        }
    }

    /// Whether an answer read from the operator confirms.
    pub fn accepts(self, answer: &str) -> bool {
        let answer = answer.trim();
        match self {
            Confirmation::YesNo => {
                answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
            }
            Confirmation::TypeYes => answer == "YES",
        }
    }
}

/// Paths no reset may delete.
#[derive(Debug, Clone, Default)]
pub struct PreserveList {
    paths: Vec<PathBuf>,
    container_extension: String,
}

impl PreserveList {
    pub fn new(root: &Path, entries: &[String], container_extension: &str) -> Self {
        Self {
            paths: entries.iter().map(|e| root.join(e)).collect(),
            container_extension: container_extension.to_string(),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// `path` is preserved itself, or is the companion `.files` directory of
    /// a preserved container.
    pub fn is_preserved(&self, path: &Path) -> bool {
        if self.paths.iter().any(|p| p == path) {
            return true;
        }
        companion_owner(path, &self.container_extension)
            .map(|owner| self.paths.contains(&owner))
            .unwrap_or(false)
    }

    /// `path` is a directory holding a preserved path somewhere below it.
    pub fn contains_preserved(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p != path && p.starts_with(path))
    }
}

/// `<name>.files` directory that belongs to a `<name>.<ext>` container.
pub fn companion_dir(container: &Path) -> PathBuf {
    container.with_extension("files")
}

fn companion_owner(path: &Path, extension: &str) -> Option<PathBuf> {
    (path.extension()? == "files").then(|| path.with_extension(extension))
}

/// Delete everything inside `dir` except preserved paths.
///
/// Failures are logged and collected; the sweep continues.
pub(crate) fn empty_dir(dir: &Path, preserve: &PreserveList, report: &mut ResetReport) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::error!("Failed to list {:?}: {}", dir, e);
            report.failures.push((dir.to_path_buf(), e.to_string()));
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        if preserve.is_preserved(&path) {
            tracing::info!("Preserving {:?}", path);
            report.skipped.push(path);
            continue;
        }
        if path.is_dir() && preserve.contains_preserved(&path) {
            tracing::info!("Keeping {:?}, it contains preserved paths", path);
            empty_dir(&path, preserve, report);
            report.skipped.push(path);
            continue;
        }
        remove_path(&path, report);
    }
}

/// Delete one file or directory tree. A container takes its companion with it.
pub(crate) fn remove_path(path: &Path, report: &mut ResetReport) {
    // Symlinks are removed, never followed.
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            tracing::debug!("Removed {:?}", path);
            report.removed.push(path.to_path_buf());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::error!("Failed to remove {:?}: {}", path, e);
            report.failures.push((path.to_path_buf(), e.to_string()));
            return;
        }
    }

    match path.extension() {
        Some(ext) if ext != "files" => {
            let companion = companion_dir(path);
            if companion.is_dir() {
                remove_path(&companion, report);
            }
        }
        _ => {}
    }
}

/// Number of files below `dir`, for plan display.
pub(crate) fn count_files(dir: &Path) -> usize {
    walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_answers() {
        assert!(Confirmation::YesNo.accepts("y\n"));
        assert!(Confirmation::YesNo.accepts("Yes"));
        assert!(!Confirmation::YesNo.accepts(""));
        assert!(Confirmation::TypeYes.accepts("YES\n"));
        assert!(!Confirmation::TypeYes.accepts("yes"));
        assert!(!Confirmation::TypeYes.accepts("y"));
    }

    #[test]
    fn test_empty_dir_skips_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let psx = root.join("output/psx");
        std::fs::create_dir_all(psx.join("keep.files")).unwrap();
        std::fs::create_dir_all(psx.join("drop.files/0")).unwrap();
        std::fs::write(psx.join("keep.psx"), b"k").unwrap();
        std::fs::write(psx.join("drop.psx"), b"d").unwrap();
        std::fs::write(psx.join("drop.files/0/doc.xml"), b"x").unwrap();

        let preserve = PreserveList::new(root, &["output/psx/keep.psx".to_string()], "psx");
        let mut report = ResetReport::default();
        empty_dir(&psx, &preserve, &mut report);

        assert!(psx.join("keep.psx").exists());
        assert!(psx.join("keep.files").is_dir());
        assert!(!psx.join("drop.psx").exists());
        assert!(!psx.join("drop.files").exists());
        assert_eq!(report.skipped.len(), 2);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_empty_dir_descends_into_dirs_holding_preserved_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let nested = root.join("processing/frames/T1");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("keep.jpg"), b"k").unwrap();
        std::fs::write(nested.join("drop.jpg"), b"d").unwrap();
        std::fs::create_dir_all(root.join("processing/frames/T2")).unwrap();

        let preserve =
            PreserveList::new(root, &["processing/frames/T1/keep.jpg".to_string()], "psx");
        let mut report = ResetReport::default();
        empty_dir(&root.join("processing"), &preserve, &mut report);

        assert!(nested.join("keep.jpg").exists());
        assert!(!nested.join("drop.jpg").exists());
        assert!(!root.join("processing/frames/T2").exists());
    }

    #[test]
    fn test_remove_container_takes_companion() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("psx_1_20250702.psx");
        std::fs::write(&container, b"c").unwrap();
        std::fs::create_dir(companion_dir(&container)).unwrap();

        let mut report = ResetReport::default();
        remove_path(&container, &mut report);
        assert!(!container.exists());
        assert!(!companion_dir(&container).exists());
        assert_eq!(report.removed.len(), 2);
    }

    #[test]
    fn test_missing_dir_is_not_a_failure() {
        let mut report = ResetReport::default();
        empty_dir(
            Path::new("/nonexistent/meshledger/output"),
            &PreserveList::default(),
            &mut report,
        );
        assert_eq!(report, ResetReport::default());
    }

    #[test]
    fn test_count_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/f1"), b"").unwrap();
        std::fs::write(dir.path().join("f2"), b"").unwrap();
        assert_eq!(count_files(dir.path()), 2);
    }
}
