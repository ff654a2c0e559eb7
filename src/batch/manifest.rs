//! The derived container to work item manifest.
//!
//! The ledger is authoritative; a manifest is rebuilt from completed records
//! that carry a container and can be deleted at any time.

use anyhow::{Context, Result};
use meshledger_common::Stage;
use meshledger_ledger::schema::{complete_column, complete_time_column, container_column};
use meshledger_ledger::LedgerStore;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One manifest row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "Container")]
    pub container: String,
    #[serde(rename = "Model ID")]
    pub item: String,
    #[serde(rename = "Date Processed")]
    pub processed: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Rebuild from ledger records completed for `stage` with a container.
    pub fn from_ledger(ledger: &LedgerStore, stage: Stage) -> Self {
        let flag = complete_column(stage);
        let container = container_column(stage);
        let processed = complete_time_column(stage);

        let entries = ledger
            .records()
            .filter(|r| r.flag_set(&flag))
            .filter_map(|r| {
                let c = r.value(&container).trim();
                (!c.is_empty()).then(|| ManifestEntry {
                    container: c.to_string(),
                    item: r.id().to_string(),
                    processed: r.value(&processed).to_string(),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Items grouped by container, containers in first-seen order.
    pub fn containers(&self) -> Vec<(&str, Vec<&str>)> {
        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for entry in &self.entries {
            match groups.iter_mut().find(|(c, _)| *c == entry.container) {
                Some((_, items)) => items.push(entry.item.as_str()),
                None => groups.push((entry.container.as_str(), vec![entry.item.as_str()])),
            }
        }
        groups
    }

    /// Write the manifest as CSV with a `Container,Model ID,Date Processed` header.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_path(path)
            .with_context(|| format!("Failed to create manifest: {:?}", path))?;
        if self.entries.is_empty() {
            writer.write_record(["Container", "Model ID", "Date Processed"])?;
        }
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open manifest: {:?}", path))?;
        let entries = reader
            .deserialize()
            .collect::<std::result::Result<Vec<ManifestEntry>, _>>()
            .with_context(|| format!("Failed to parse manifest: {:?}", path))?;
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshledger_common::WorkItemId;
    use meshledger_ledger::{Schema, StageGate};
    use std::sync::Arc;

    #[test]
    fn test_rebuild_from_ledger_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path().join("s.csv"), Arc::new(Schema::standard()))
            .unwrap();
        let mut gate = StageGate::new(store);
        let stage = Stage::Reconstruction;

        for (item, container) in [("T1", "c1.psx"), ("T2", "c2.psx"), ("T3", "c1.psx")] {
            let id = WorkItemId::new(item).unwrap();
            gate.assign_container(&id, stage, container).unwrap();
            let started = gate.start(&id, stage).unwrap();
            gate.complete::<&str, &str>(&id, stage, &started, &[]).unwrap();
        }
        let pending = WorkItemId::new("T4").unwrap();
        gate.assign_container(&pending, stage, "c2.psx").unwrap();

        let manifest = Manifest::from_ledger(gate.ledger(), stage);
        assert_eq!(manifest.len(), 3);
        assert!(manifest.entries().iter().all(|e| !e.processed.is_empty()));
        assert_eq!(
            manifest.containers(),
            vec![("c1.psx", vec!["T1", "T3"]), ("c2.psx", vec!["T2"])]
        );

        let path = dir.path().join("processing/batch_manifest_step1.csv");
        manifest.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Container,Model ID,Date Processed\n"));
        assert_eq!(Manifest::read_csv(&path).unwrap(), manifest);
    }

    #[test]
    fn test_empty_manifest_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.csv");
        Manifest::default().write_csv(&path).unwrap();
        assert!(Manifest::read_csv(&path).unwrap().is_empty());
    }
}
