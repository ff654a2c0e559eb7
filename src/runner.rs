//! Stage runner: one sequential sweep of a stage over all candidate items.
//!
//! For each candidate the runner asks the gate whether the stage must run,
//! validates the item's input, picks its container, calls the engine and
//! records the outcome. Per-item failures become ledger state; only ledger
//! I/O failures stop the sweep.

use crate::batch::{BatchAssigner, ContainerNaming, Manifest, SiteGrouper};
use crate::config::{Config, ContainerPolicy};
use crate::engine::{Engine, StageRequest};
use crate::project::ProjectLayout;
use anyhow::{Context, Result};
use meshledger_common::paths::{count_images, is_video_file};
use meshledger_common::time::{date_stamp, now};
use meshledger_common::{Error, Stage, WorkItemId};
use meshledger_ledger::schema::container_column;
use meshledger_ledger::{LedgerStore, StageGate};
use std::fmt;
use std::path::{Path, PathBuf};

/// Options for one sweep.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Process at most this many items.
    pub limit: Option<usize>,
}

/// Tally of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub stage: Stage,
    pub considered: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Containers used by processed items, in first-use order.
    pub containers: Vec<String>,
    pub failures: Vec<(WorkItemId, String)>,
}

impl RunSummary {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            considered: 0,
            skipped: 0,
            succeeded: 0,
            failed: 0,
            containers: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Items the engine was asked to process.
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }

    fn note_container(&mut self, container: Option<String>) {
        if let Some(c) = container {
            if !self.containers.contains(&c) {
                self.containers.push(c);
            }
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} considered, {} skipped, {} succeeded, {} failed, {} container(s)",
            self.stage,
            self.considered,
            self.skipped,
            self.succeeded,
            self.failed,
            self.containers.len()
        )
    }
}

/// Why a single item did not complete.
enum ItemError {
    /// Recorded against the item; the sweep continues.
    Item(String),
    /// The ledger itself failed; the sweep stops.
    Ledger(Error),
}

impl From<Error> for ItemError {
    fn from(e: Error) -> Self {
        if e.is_ledger_fatal() {
            ItemError::Ledger(e)
        } else {
            ItemError::Item(e.to_string())
        }
    }
}

/// Per-stage container allocation state for one sweep.
enum Allocator {
    None,
    Batch(BatchAssigner),
    Site(SiteGrouper),
    InPlace,
}

impl Allocator {
    fn for_stage(
        stage: Stage,
        config: &Config,
        layout: &ProjectLayout,
        ledger: &LedgerStore,
    ) -> Result<Self> {
        let naming = ContainerNaming::from_config(&config.batch, &date_stamp(&now()));
        Ok(match config.policy_for(stage) {
            ContainerPolicy::None => Allocator::None,
            ContainerPolicy::Batch => {
                let mut assigner =
                    BatchAssigner::new(config.batch.capacity, &layout.container_dir(stage), naming)?;
                let column = container_column(stage);
                let recorded: Vec<(String, String)> = ledger
                    .records()
                    .map(|r| (r.id().to_string(), r.value(&column).trim().to_string()))
                    .filter(|(_, container)| !container.is_empty())
                    .collect();
                assigner.resume_recorded(recorded.iter().map(|(i, c)| (i.as_str(), c.as_str())));
                Allocator::Batch(assigner)
            }
            ContainerPolicy::Site => Allocator::Site(SiteGrouper::new(naming)),
            ContainerPolicy::InPlace => Allocator::InPlace,
        })
    }
}

/// Drives one stage across all items.
pub struct StageRunner<'a, E: Engine> {
    config: &'a Config,
    layout: &'a ProjectLayout,
    gate: &'a mut StageGate,
    engine: &'a mut E,
}

impl<'a, E: Engine> StageRunner<'a, E> {
    pub fn new(
        config: &'a Config,
        layout: &'a ProjectLayout,
        gate: &'a mut StageGate,
        engine: &'a mut E,
    ) -> Self {
        Self {
            config,
            layout,
            gate,
            engine,
        }
    }

    /// Run `stage` over every discovered candidate.
    pub fn run(&mut self, stage: Stage, options: &RunOptions) -> Result<RunSummary> {
        let candidates = discover_candidates(stage, self.layout, self.gate.ledger())?;
        self.run_items(stage, candidates, options)
    }

    /// Run `stage` over the given items, in order.
    pub fn run_items(
        &mut self,
        stage: Stage,
        candidates: Vec<WorkItemId>,
        options: &RunOptions,
    ) -> Result<RunSummary> {
        tracing::info!("Starting {} sweep over {} candidate(s)", stage, candidates.len());
        let mut summary = RunSummary::new(stage);
        let mut allocator = Allocator::for_stage(stage, self.config, self.layout, self.gate.ledger())?;

        for id in candidates {
            if options.limit.is_some_and(|limit| summary.processed() >= limit) {
                tracing::info!("Reached limit of {} item(s); stopping", summary.processed());
                break;
            }
            summary.considered += 1;

            if !self.gate.should_run(id.as_str(), stage) {
                tracing::debug!(item = %id, "Already complete, skipping");
                summary.skipped += 1;
                continue;
            }
            if requires_recorded_prerequisite(stage) && !self.gate.prerequisite_met(id.as_str(), stage) {
                tracing::info!(item = %id, "Previous stage not complete, skipping");
                summary.skipped += 1;
                continue;
            }

            self.gate.ledger_mut().initialize(&id)?;

            match self.process_item(stage, &id, &mut allocator) {
                Ok(container) => {
                    summary.succeeded += 1;
                    summary.note_container(container);
                }
                Err(ItemError::Item(reason)) => {
                    self.gate.fail(&id, stage, &reason)?;
                    summary.failed += 1;
                    summary.failures.push((id, reason));
                }
                Err(ItemError::Ledger(e)) => {
                    return Err(e).context("Ledger write failed; stopping the run");
                }
            }
        }

        if self.config.policy_for(stage) != ContainerPolicy::None {
            let manifest = Manifest::from_ledger(self.gate.ledger(), stage);
            let path = self.layout.manifest_path(stage);
            match manifest.write_csv(&path) {
                Ok(()) => tracing::info!("Wrote manifest {:?} ({} entries)", path, manifest.len()),
                Err(e) => tracing::warn!("Failed to write manifest {:?}: {:#}", path, e),
            }
        }

        tracing::info!("{}", summary);
        Ok(summary)
    }

    fn process_item(
        &mut self,
        stage: Stage,
        id: &WorkItemId,
        allocator: &mut Allocator,
    ) -> std::result::Result<Option<String>, ItemError> {
        let input = self.locate_input(stage, id)?;
        let container = self.resolve_container(stage, id, allocator)?;

        let mut fields = self.default_fields(stage, id, &input);
        let started = self.gate.start(id, stage)?;

        let request = StageRequest {
            stage,
            item: id.clone(),
            container: container.as_deref().map(|c| self.layout.resolve(c)),
            input,
            output_dir: self.layout.output_dir(stage),
            project_dir: self.layout.root().to_path_buf(),
            params: self.config.params_for(stage),
        };

        let outcome = self.engine.run_stage(&request).map_err(Error::from)?;

        if stage == Stage::Extraction {
            let frames = self.layout.frames_for(id.as_str());
            fields.push(("Frames Extracted".to_string(), count_images(&frames).to_string()));
        }
        // Engine-reported values win over the runner's defaults.
        fields.extend(outcome.fields);

        match self.gate.complete(id, stage, &started, &fields) {
            Ok(()) => Ok(container),
            Err(e @ Error::UnknownField { .. }) => {
                tracing::error!(item = %id, "Engine reported a field outside the ledger schema: {}", e);
                Err(ItemError::Item(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Input for the stage, validated before the engine is involved.
    fn locate_input(&self, stage: Stage, id: &WorkItemId) -> std::result::Result<PathBuf, ItemError> {
        match stage {
            Stage::Extraction => find_source_video(self.layout, id).ok_or_else(|| {
                ItemError::Item(format!(
                    "no source video for {} in {:?}",
                    id,
                    self.layout.video_source()
                ))
            }),
            Stage::Reconstruction => {
                let frames = self.layout.frames_for(id.as_str());
                if !frames.is_dir() {
                    return Err(ItemError::Item(format!("frames directory missing: {:?}", frames)));
                }
                if count_images(&frames) == 0 {
                    return Err(ItemError::Item(format!("no frame images in {:?}", frames)));
                }
                Ok(frames)
            }
            _ => {
                let previous = stage.previous().unwrap_or(stage);
                self.gate
                    .container_of(id.as_str(), previous)
                    .map(|c| self.layout.resolve(&c))
                    .ok_or_else(|| {
                        ItemError::Item(format!("no {} container recorded", previous.label()))
                    })
            }
        }
    }

    /// Container for this stage, recorded in the ledger before the engine runs.
    fn resolve_container(
        &mut self,
        stage: Stage,
        id: &WorkItemId,
        allocator: &mut Allocator,
    ) -> std::result::Result<Option<String>, ItemError> {
        if let Allocator::None = allocator {
            return Ok(None);
        }
        // An interrupted or failed item resumes in the container it had.
        if let Some(existing) = self.gate.container_of(id.as_str(), stage) {
            tracing::debug!(item = %id, container = %existing, "Reusing recorded container");
            return Ok(Some(existing));
        }

        let container = match allocator {
            Allocator::None => return Ok(None),
            Allocator::Batch(assigner) => {
                let name = assigner.next_container_for(id);
                self.layout.relative(&self.layout.container_dir(stage).join(name))
            }
            Allocator::Site(grouper) => {
                let name = grouper.container_for(id);
                self.layout.relative(&self.layout.container_dir(stage).join(name))
            }
            Allocator::InPlace => {
                let previous = stage.previous().unwrap_or(stage);
                self.gate.container_of(id.as_str(), previous).ok_or_else(|| {
                    ItemError::Item(format!("no {} container to work in", previous.label()))
                })?
            }
        };

        self.gate.assign_container(id, stage, &container)?;
        Ok(Some(container))
    }

    /// Metadata the runner knows without the engine.
    fn default_fields(&self, stage: Stage, id: &WorkItemId, input: &Path) -> Vec<(String, String)> {
        match stage {
            Stage::Extraction => vec![
                ("Video Source".to_string(), self.layout.relative(input)),
                (
                    "Frames directory".to_string(),
                    self.layout.relative(&self.layout.frames_for(id.as_str())),
                ),
            ],
            Stage::Reconstruction => vec![("Total cameras".to_string(), count_images(input).to_string())],
            Stage::Consolidation => vec![("Step 2 site".to_string(), id.site().to_string())],
            _ => Vec::new(),
        }
    }
}

/// Stages whose prerequisite is checked in the ledger. Extraction and
/// reconstruction are gated by their inputs on disk instead, so frames
/// produced outside the pipeline can still be reconstructed.
fn requires_recorded_prerequisite(stage: Stage) -> bool {
    stage >= Stage::Consolidation
}

/// Candidate items for a stage, sorted by identifier.
///
/// - extraction: video files in `video_source/`, identified by file stem
/// - reconstruction: subdirectories of `processing/frames/`
/// - later stages: every ledger record
pub fn discover_candidates(
    stage: Stage,
    layout: &ProjectLayout,
    ledger: &LedgerStore,
) -> Result<Vec<WorkItemId>> {
    let mut ids: Vec<WorkItemId> = match stage {
        Stage::Extraction => list_dir(&layout.video_source())?
            .into_iter()
            .filter(|p| p.is_file() && is_video_file(p))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .filter_map(|s| WorkItemId::new(s).ok())
            .collect(),
        Stage::Reconstruction => list_dir(&layout.frames())?
            .into_iter()
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name().map(|s| s.to_string_lossy().to_string()))
            .filter_map(|s| WorkItemId::new(s).ok())
            .collect(),
        _ => ledger.ids().filter_map(|s| WorkItemId::new(s).ok()).collect(),
    };
    ids.sort();
    ids.dedup();
    Ok(ids)
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        tracing::warn!("Directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))?;
    Ok(entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
}

fn find_source_video(layout: &ProjectLayout, id: &WorkItemId) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = std::fs::read_dir(layout.video_source())
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_video_file(p))
        .filter(|p| p.file_stem().is_some_and(|s| s.to_string_lossy() == id.as_str()))
        .collect();
    matches.sort();
    matches.into_iter().next()
}
