//! On-disk layout of a reconstruction project.
//!
//! ```text
//! <project>/
//!   project.toml
//!   status_<name>.csv          ledger
//!   video_source/              inputs, never reset
//!   processing/frames/         stage 0 output
//!   processing/psxraw/         stage 1 batch containers
//!   processing/reportsraw/     stage 1 reports
//!   output/psx/                stage 2 site containers
//!   output/{orthomosaics,models,reports}/   stage 3 exports
//!   output/final/              stage 4 deliverables
//!   output/logs/
//! ```

use crate::config::{Config, CONFIG_FILE};
use anyhow::{Context, Result};
use meshledger_common::Stage;
use std::path::{Path, PathBuf};

/// Directories and files derived from the project root and its config.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
    name: String,
    ledger_path: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>, config: &Config) -> Self {
        let root = root.into();
        let name = config.project.name.clone().unwrap_or_else(|| {
            root.canonicalize()
                .ok()
                .as_deref()
                .unwrap_or(&root)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string())
        });
        let ledger_file = config
            .ledger
            .file
            .clone()
            .unwrap_or_else(|| format!("status_{}.csv", name));
        let ledger_path = root.join(ledger_file);
        Self {
            root,
            name,
            ledger_path,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn video_source(&self) -> PathBuf {
        self.root.join("video_source")
    }

    pub fn processing(&self) -> PathBuf {
        self.root.join("processing")
    }

    pub fn output(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn frames(&self) -> PathBuf {
        self.processing().join("frames")
    }

    /// Frames directory of one work item.
    pub fn frames_for(&self, item: &str) -> PathBuf {
        self.frames().join(item)
    }

    pub fn logs(&self) -> PathBuf {
        self.output().join("logs")
    }

    /// Directories written by a stage, emptied when the stage is reset.
    pub fn stage_dirs(&self, stage: Stage) -> Vec<PathBuf> {
        let processing = self.processing();
        let output = self.output();
        match stage {
            Stage::Extraction => vec![processing.join("frames")],
            Stage::Reconstruction => vec![processing.join("psxraw"), processing.join("reportsraw")],
            Stage::Consolidation => vec![output.join("psx")],
            Stage::Finishing => vec![
                output.join("orthomosaics"),
                output.join("models"),
                output.join("reports"),
            ],
            Stage::Export => vec![output.join("final")],
        }
    }

    /// Primary output directory handed to the engine for a stage.
    pub fn output_dir(&self, stage: Stage) -> PathBuf {
        self.stage_dirs(stage)
            .into_iter()
            .next()
            .unwrap_or_else(|| self.output())
    }

    /// Directory new containers are created in when a stage allocates them.
    pub fn container_dir(&self, stage: Stage) -> PathBuf {
        match stage {
            Stage::Consolidation | Stage::Finishing | Stage::Export => self.output().join("psx"),
            _ => self.processing().join("psxraw"),
        }
    }

    /// Derived batch manifest for a stage.
    pub fn manifest_path(&self, stage: Stage) -> PathBuf {
        self.processing()
            .join(format!("batch_manifest_step{}.csv", stage.number()))
    }

    /// Project-relative form of a path, with `/` separators, for the ledger.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve a project-relative ledger path.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        let path = Path::new(relative);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Every directory of the layout.
    pub fn all_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.video_source(), self.processing(), self.output(), self.logs()];
        for &stage in Stage::all() {
            dirs.extend(self.stage_dirs(stage));
        }
        dirs
    }

    /// Create all directories of the layout.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in self.all_dirs() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        }
        Ok(())
    }
}
