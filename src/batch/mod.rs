//! Mapping work items onto engine containers.
//!
//! [`BatchAssigner`] packs items into capacity-bounded batches, one container
//! per batch. A batch stays open until it holds `capacity` items, across
//! sweeps: the latest batch recorded in the ledger is topped up before a new
//! one is opened, and new numbers continue past every batch already in use.
//! [`SiteGrouper`] groups items by site token for consolidation.

pub mod manifest;

pub use manifest::{Manifest, ManifestEntry};

use crate::config::BatchConfig;
use anyhow::{Context, Result};
use meshledger_common::WorkItemId;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// Naming rules for generated containers.
#[derive(Debug, Clone)]
pub struct ContainerNaming {
    prefix: String,
    extension: String,
    date_stamp: String,
}

impl ContainerNaming {
    pub fn new(prefix: &str, extension: &str, date_stamp: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            extension: extension.trim_start_matches('.').to_string(),
            date_stamp: date_stamp.to_string(),
        }
    }

    pub fn from_config(config: &BatchConfig, date_stamp: &str) -> Self {
        Self::new(&config.container_prefix, &config.container_extension, date_stamp)
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// `psx_3_20250702.psx`
    pub fn batch_name(&self, number: u32) -> String {
        format!("{}_{}_{}.{}", self.prefix, number, self.date_stamp, self.extension)
    }

    /// `TCRMP20241014_3D_BWR_T2_20250702.psx`, used when each batch holds one item.
    pub fn single_item_name(&self, item: &WorkItemId) -> String {
        format!("{}_{}.{}", item, self.date_stamp, self.extension)
    }

    /// `BWR_step2.psx`
    pub fn site_name(&self, site: &str) -> String {
        format!("{}_step2.{}", site, self.extension)
    }

    /// Matches numbered batch containers of any date.
    fn batch_pattern(&self) -> Result<Regex> {
        let pattern = format!(
            r"^{}_(\d+)_\d{{8}}\.{}$",
            regex::escape(&self.prefix),
            regex::escape(&self.extension)
        );
        Regex::new(&pattern).with_context(|| format!("Invalid container pattern: {}", pattern))
    }
}

/// One capacity-bounded group of items sharing a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub number: u32,
    pub container: String,
    pub items: Vec<WorkItemId>,
}

/// Capacity-bounded batch allocation for one stage sweep.
#[derive(Debug)]
pub struct BatchAssigner {
    capacity: usize,
    naming: ContainerNaming,
    pattern: Regex,
    last_number: u32,
    open: Option<Batch>,
    closed: Vec<Batch>,
    assigned: HashMap<WorkItemId, String>,
}

impl BatchAssigner {
    /// Create an assigner that continues numbering after the containers in
    /// `container_dir`. A missing directory means no prior batches.
    pub fn new(capacity: usize, container_dir: &Path, naming: ContainerNaming) -> Result<Self> {
        if capacity == 0 {
            anyhow::bail!("batch capacity must be at least 1");
        }
        let pattern = naming.batch_pattern()?;
        let mut assigner = Self {
            capacity,
            naming,
            pattern,
            last_number: 0,
            open: None,
            closed: Vec::new(),
            assigned: HashMap::new(),
        };

        if container_dir.is_dir() {
            let entries = std::fs::read_dir(container_dir)
                .with_context(|| format!("Failed to list containers in {:?}", container_dir))?;
            let names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect();
            assigner.observe_existing(names.iter().map(String::as_str));
        }

        Ok(assigner)
    }

    /// Account for container names already in use, such as files on disk.
    ///
    /// Accepts bare names or paths; only the file name is considered.
    pub fn observe_existing<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            if let Some(n) = self.batch_number(file_name_of(name)) {
                self.last_number = self.last_number.max(n);
            }
        }
    }

    /// Resume from `(item, container)` pairs recorded by earlier sweeps.
    ///
    /// Numbering continues past every recorded batch. The highest-numbered
    /// recorded batch becomes the open batch while it has fewer than
    /// `capacity` items, so the next item lands in it.
    pub fn resume_recorded<'a>(&mut self, recorded: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let mut batches: Vec<Batch> = Vec::new();
        for (item, container) in recorded {
            let name = file_name_of(container);
            let Some(number) = self.batch_number(name) else {
                continue;
            };
            let Ok(item) = WorkItemId::new(item) else {
                continue;
            };
            self.last_number = self.last_number.max(number);
            match batches.iter_mut().find(|b| b.container == name) {
                Some(batch) => {
                    if !batch.items.contains(&item) {
                        batch.items.push(item);
                    }
                }
                None => batches.push(Batch {
                    number,
                    container: name.to_string(),
                    items: vec![item],
                }),
            }
        }

        let Some(latest) = batches.into_iter().max_by_key(|b| b.number) else {
            return;
        };
        if self.open.is_some() || latest.items.len() >= self.capacity {
            return;
        }
        tracing::info!(
            batch = latest.number,
            container = %latest.container,
            items = latest.items.len(),
            "Resuming open batch"
        );
        for item in &latest.items {
            self.assigned.insert(item.clone(), latest.container.clone());
        }
        self.open = Some(latest);
    }

    fn batch_number(&self, file_name: &str) -> Option<u32> {
        self.pattern
            .captures(file_name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
    }

    /// Number the next new batch will get.
    pub fn next_number(&self) -> u32 {
        self.last_number + 1
    }

    /// Container for `item`: the open batch if it has room, otherwise a new one.
    ///
    /// An item already placed during this sweep gets the container it already has.
    pub fn next_container_for(&mut self, item: &WorkItemId) -> String {
        if let Some(container) = self.assigned.get(item) {
            return container.clone();
        }

        let mut batch = match self.open.take() {
            Some(open) if open.items.len() < self.capacity => open,
            Some(full) => {
                tracing::debug!(batch = full.number, items = full.items.len(), "Batch closed");
                self.closed.push(full);
                self.new_batch(item)
            }
            None => self.new_batch(item),
        };
        batch.items.push(item.clone());
        let container = batch.container.clone();
        self.assigned.insert(item.clone(), container.clone());
        self.open = Some(batch);
        container
    }

    fn new_batch(&mut self, first: &WorkItemId) -> Batch {
        self.last_number += 1;
        let number = self.last_number;
        let container = if self.capacity == 1 {
            self.naming.single_item_name(first)
        } else {
            self.naming.batch_name(number)
        };
        tracing::info!(batch = number, container = %container, "Opened new batch");
        Batch {
            number,
            container,
            items: Vec::new(),
        }
    }

    /// Close the open batch and return every batch of this sweep.
    pub fn finish(mut self) -> Vec<Batch> {
        if let Some(open) = self.open.take() {
            self.closed.push(open);
        }
        self.closed
    }
}

/// File name part of a bare name or a project-relative path.
fn file_name_of(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}

/// Groups items into one container per site token.
#[derive(Debug)]
pub struct SiteGrouper {
    naming: ContainerNaming,
    groups: Vec<(String, Vec<WorkItemId>)>,
}

impl SiteGrouper {
    pub fn new(naming: ContainerNaming) -> Self {
        Self {
            naming,
            groups: Vec::new(),
        }
    }

    pub fn container_for(&mut self, item: &WorkItemId) -> String {
        let container = self.naming.site_name(item.site());
        match self.groups.iter_mut().find(|(c, _)| *c == container) {
            Some((_, items)) => {
                if !items.contains(item) {
                    items.push(item.clone());
                }
            }
            None => self.groups.push((container.clone(), vec![item.clone()])),
        }
        container
    }

    /// Containers with their items, in first-seen order.
    pub fn groups(&self) -> &[(String, Vec<WorkItemId>)] {
        &self.groups
    }
}
