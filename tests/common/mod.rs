//! Shared test harness for integration tests.
//!
//! Provides [`TestProject`], a project directory in a tempdir with helpers to
//! lay down inputs, and [`ScriptedEngine`], an in-process engine that records
//! its calls and fails chosen items.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use meshledger::config::Config;
use meshledger::engine::{Engine, EngineError, StageOutcome, StageRequest};
use meshledger::project::ProjectLayout;
use meshledger::runner::{RunOptions, RunSummary, StageRunner};
use meshledger_common::Stage;
use meshledger_ledger::{LedgerStore, Schema, StageGate};
use tempfile::TempDir;

/// A project directory with its config and layout.
pub struct TestProject {
    pub dir: TempDir,
    pub config: Config,
    pub layout: ProjectLayout,
}

impl TestProject {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(mut config: Config) -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        config.project.name = Some("reef".to_string());
        let layout = ProjectLayout::new(dir.path(), &config);
        layout.ensure_dirs().expect("failed to create project dirs");
        Self {
            dir,
            config,
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Create `processing/frames/<id>/` with `count` frame images.
    pub fn add_frames(&self, id: &str, count: usize) -> PathBuf {
        let frames = self.layout.frames_for(id);
        std::fs::create_dir_all(&frames).unwrap();
        for i in 0..count {
            std::fs::write(frames.join(format!("frame_{:04}.jpg", i)), b"jpg").unwrap();
        }
        frames
    }

    /// Create `video_source/<id>.mp4`.
    pub fn add_video(&self, id: &str) -> PathBuf {
        let video = self.layout.video_source().join(format!("{}.mp4", id));
        std::fs::write(&video, b"video").unwrap();
        video
    }

    pub fn open_gate(&self) -> StageGate {
        let store = LedgerStore::open(self.layout.ledger_path(), Arc::new(Schema::standard()))
            .expect("failed to open ledger");
        StageGate::new(store)
    }

    pub fn read_ledger(&self) -> LedgerStore {
        LedgerStore::open_read_only(self.layout.ledger_path(), Arc::new(Schema::standard()))
            .expect("failed to read ledger")
    }

    /// One sweep of `stage` with `engine`, holding the ledger only for the sweep.
    pub fn run(&self, stage: Stage, engine: &mut ScriptedEngine) -> RunSummary {
        self.run_with(stage, engine, &RunOptions::default())
    }

    pub fn run_with(
        &self,
        stage: Stage,
        engine: &mut ScriptedEngine,
        options: &RunOptions,
    ) -> RunSummary {
        let mut gate = self.open_gate();
        StageRunner::new(&self.config, &self.layout, &mut gate, engine)
            .run(stage, options)
            .expect("sweep failed")
    }
}

/// A recorded engine call.
#[derive(Debug, Clone)]
pub struct Call {
    pub stage: Stage,
    pub item: String,
    pub container: Option<PathBuf>,
    pub input: PathBuf,
}

/// In-process engine double.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    pub calls: Vec<Call>,
    failing: HashSet<String>,
    extra_fields: HashMap<String, Vec<(String, String)>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call for `item` fail.
    pub fn failing(mut self, item: &str) -> Self {
        self.failing.insert(item.to_string());
        self
    }

    /// Report `column=value` for `item` on success.
    pub fn reporting(mut self, item: &str, column: &str, value: &str) -> Self {
        self.extra_fields
            .entry(item.to_string())
            .or_default()
            .push((column.to_string(), value.to_string()));
        self
    }

    pub fn items_called(&self) -> Vec<&str> {
        self.calls.iter().map(|c| c.item.as_str()).collect()
    }
}

impl Engine for ScriptedEngine {
    fn run_stage(&mut self, request: &StageRequest) -> Result<StageOutcome, EngineError> {
        self.calls.push(Call {
            stage: request.stage,
            item: request.item.to_string(),
            container: request.container.clone(),
            input: request.input.clone(),
        });
        // Keeps start and completion timestamps apart.
        std::thread::sleep(Duration::from_millis(2));

        if self.failing.contains(request.item.as_str()) {
            return Err(EngineError::Failed {
                code: Some(1),
                stdout: String::new(),
                stderr: format!("alignment failed for {}", request.item),
            });
        }

        let mut outcome = StageOutcome::default();
        if let Some(fields) = self.extra_fields.get(request.item.as_str()) {
            for (column, value) in fields {
                outcome = outcome.with_field(column.clone(), value.clone());
            }
        }
        Ok(outcome)
    }
}
