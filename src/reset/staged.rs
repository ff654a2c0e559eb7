//! Staged reset: roll the whole project back to a stage boundary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use meshledger_common::{Error, Stage};
use meshledger_ledger::gate::status_complete;
use meshledger_ledger::{LedgerStore, Schema};

use super::{count_files, empty_dir, remove_path, PreserveList, ResetReport};
use crate::config::Config;
use crate::project::ProjectLayout;

/// How far back a staged reset goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cutoff {
    /// Nothing survives but inputs and the preserve list; the ledger is removed.
    BeforeAll,
    /// Stages up to and including this one survive.
    After(Stage),
}

impl FromStr for Cutoff {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "before-all" || s == "full" {
            return Ok(Cutoff::BeforeAll);
        }
        let number = s
            .strip_prefix("after-")
            .and_then(|n| n.parse::<u8>().ok())
            .ok_or_else(|| {
                Error::invalid_input(format!(
                    "unknown reset target '{}' (expected after-N or before-all)",
                    s
                ))
            })?;
        let stage = Stage::from_number(number)?;
        if stage.next().is_none() {
            return Err(Error::invalid_input(format!(
                "nothing follows {}; use after-0 to after-{}",
                stage.label(),
                number - 1
            )));
        }
        Ok(Cutoff::After(stage))
    }
}

impl fmt::Display for Cutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cutoff::BeforeAll => write!(f, "before-all"),
            Cutoff::After(stage) => write!(f, "after-{}", stage.number()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StagedPlan {
    pub cutoff: Cutoff,
    /// Directories whose contents are deleted.
    pub clear_dirs: Vec<PathBuf>,
    /// Individual files deleted.
    pub remove_files: Vec<PathBuf>,
    /// Ledger columns cleared on every record.
    pub columns: Vec<String>,
    /// Whether the ledger file itself is removed.
    pub delete_ledger: bool,
    /// Directories recreated empty after the sweep.
    pub recreate_dirs: Vec<PathBuf>,
    pub preserve: PreserveList,
    root: PathBuf,
    ledger_path: PathBuf,
}

/// Plan a staged reset of the project.
pub fn plan_staged(
    cutoff: Cutoff,
    layout: &ProjectLayout,
    config: &Config,
    schema: &Schema,
) -> Result<StagedPlan> {
    let preserve = PreserveList::new(
        layout.root(),
        &config.reset.preserve,
        &config.batch.container_extension,
    );

    let mut plan = StagedPlan {
        cutoff,
        clear_dirs: Vec::new(),
        remove_files: Vec::new(),
        columns: Vec::new(),
        delete_ledger: false,
        recreate_dirs: Vec::new(),
        preserve,
        root: layout.root().to_path_buf(),
        ledger_path: layout.ledger_path().to_path_buf(),
    };

    match cutoff {
        Cutoff::BeforeAll => {
            plan.clear_dirs = vec![layout.processing(), layout.output()];
            plan.recreate_dirs = plan.clear_dirs.clone();
            plan.delete_ledger = true;
            plan.remove_files = root_csv_files(layout)?
                .into_iter()
                .filter(|p| p != layout.ledger_path() && !plan.preserve.is_preserved(p))
                .collect();
        }
        Cutoff::After(stage) => {
            for later in stage.later() {
                plan.clear_dirs.extend(layout.stage_dirs(later));
                let manifest = layout.manifest_path(later);
                if manifest.is_file() {
                    plan.remove_files.push(manifest);
                }
                plan.columns
                    .extend(schema.columns_for(later).into_iter().map(str::to_string));
            }
        }
    }

    Ok(plan)
}

fn root_csv_files(layout: &ProjectLayout) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(layout.root())
        .with_context(|| format!("Failed to list project directory {:?}", layout.root()))?;
    for entry in entries {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// New status for a record after resetting to after `stage`, if it mentions
/// a later stage.
pub fn rewritten_status(status: &str, stage: Stage) -> Option<String> {
    stage
        .later()
        .any(|later| status.contains(&later.label()))
        .then(|| status_complete(stage))
}

impl StagedPlan {
    /// Run the reset. The ledger goes first; a failed ledger write aborts
    /// before any file is touched.
    pub fn execute(&self, ledger: LedgerStore) -> Result<ResetReport> {
        let mut report = ResetReport::default();

        match self.cutoff {
            Cutoff::BeforeAll => {
                ledger
                    .delete()
                    .context("Failed to remove the ledger file")?;
                report.removed.push(self.ledger_path.clone());
            }
            Cutoff::After(stage) => {
                let mut ledger = ledger;
                report.records_changed = ledger
                    .clear_columns(&self.columns, |status| rewritten_status(status, stage))
                    .context("Failed to write the reset ledger")?;
                tracing::info!(
                    records = report.records_changed,
                    columns = self.columns.len(),
                    "Cleared ledger fields after {}",
                    stage.label()
                );
            }
        }

        for dir in &self.clear_dirs {
            if self.preserve.is_preserved(dir) {
                tracing::info!("Preserving {:?}", dir);
                report.skipped.push(dir.clone());
                continue;
            }
            tracing::info!("Emptying {:?}", dir);
            empty_dir(dir, &self.preserve, &mut report);
        }

        for file in &self.remove_files {
            remove_path(file, &mut report);
        }

        for dir in &self.recreate_dirs {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::error!("Failed to recreate {:?}: {}", dir, e);
                report.failures.push((dir.clone(), e.to_string()));
            }
        }

        Ok(report)
    }

    fn rel<'a>(&self, path: &'a Path) -> std::borrow::Cow<'a, str> {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
    }
}

impl fmt::Display for StagedPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cutoff {
            Cutoff::BeforeAll => writeln!(f, "Staged reset to before all stages:")?,
            Cutoff::After(stage) => writeln!(f, "Staged reset to after {}:", stage)?,
        }
        if self.delete_ledger {
            writeln!(f, "  remove {} (ledger)", self.rel(&self.ledger_path))?;
        }
        for dir in &self.clear_dirs {
            writeln!(f, "  empty  {} ({} files)", self.rel(dir), count_files(dir))?;
        }
        for file in &self.remove_files {
            writeln!(f, "  remove {}", self.rel(file))?;
        }
        if !self.columns.is_empty() {
            writeln!(f, "  clear  {} ledger column(s)", self.columns.len())?;
        }
        let kept: Vec<_> = self.preserve.paths().iter().map(|p| self.rel(p)).collect();
        if !kept.is_empty() {
            writeln!(f, "  keep   {}", kept.join(", "))?;
        }
        Ok(())
    }
}
