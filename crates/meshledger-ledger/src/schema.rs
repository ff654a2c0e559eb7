//! The fixed ledger column schema.
//!
//! The header row of the ledger file is a contract: column names and order are
//! fixed per schema version. Updates naming any other column are rejected.

use std::collections::HashMap;

use meshledger_common::Stage;

/// Version of the column layout produced by [`Schema::standard`].
pub const SCHEMA_VERSION: u32 = 1;

pub const ID_COLUMN: &str = "Model ID";
pub const STATUS_COLUMN: &str = "Status";
pub const NOTES_COLUMN: &str = "Notes";

/// Completion flag value marking a stage done.
pub const COMPLETE: &str = "TRUE";
/// Completion flag value explicitly marking a stage not done.
pub const INCOMPLETE: &str = "FALSE";

/// Status given to records the first time an item is seen.
pub const STATUS_INITIALIZED: &str = "Initialized";

pub fn complete_column(stage: Stage) -> String {
    format!("{} complete", stage.label())
}

pub fn start_time_column(stage: Stage) -> String {
    format!("{} start time", stage.label())
}

pub fn complete_time_column(stage: Stage) -> String {
    format!("{} complete time", stage.label())
}

pub fn processing_time_column(stage: Stage) -> String {
    format!("{} processing time", stage.label())
}

pub fn error_time_column(stage: Stage) -> String {
    format!("{} error time", stage.label())
}

pub fn container_column(stage: Stage) -> String {
    format!("{} container", stage.label())
}

/// Whether the stage runs against an external project container.
pub fn uses_container(stage: Stage) -> bool {
    stage != Stage::Extraction
}

/// Stage-specific metadata columns reported by the engine.
pub fn metadata_columns(stage: Stage) -> &'static [&'static str] {
    match stage {
        Stage::Extraction => &[
            "Video Source",
            "Video Length (s)",
            "Total Video Frames",
            "Frames Extracted",
            "Frames directory",
        ],
        Stage::Reconstruction => &[
            "Aligned cameras",
            "Total cameras",
            "Tie points",
            "Dense points",
            "Triangles",
            "Reprojection error (px)",
            "Report file",
        ],
        Stage::Consolidation => &["Step 2 site"],
        Stage::Finishing => &[
            "Step 3 scale method",
            "Step 3 scale applied",
            "Coverage area (m2)",
            "Point cloud density (pts/cm2)",
            "Model resolution (mm/px)",
            "Step 3 ortho exported",
            "Step 3 model exported",
        ],
        Stage::Export => &["Step 4 high-res exported", "Step 4 web published"],
    }
}

/// Ordered, immutable set of ledger columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
    owners: Vec<Option<Stage>>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// The standard pipeline schema.
    pub fn standard() -> Self {
        let mut builder = SchemaBuilder::default();
        builder.push(ID_COLUMN, None);
        builder.push(STATUS_COLUMN, None);
        builder.push(NOTES_COLUMN, None);

        for &stage in Stage::all() {
            builder.push(complete_column(stage), Some(stage));
            builder.push(start_time_column(stage), Some(stage));
            builder.push(complete_time_column(stage), Some(stage));
            builder.push(processing_time_column(stage), Some(stage));
            builder.push(error_time_column(stage), Some(stage));
            if uses_container(stage) {
                builder.push(container_column(stage), Some(stage));
            }
            for column in metadata_columns(stage) {
                builder.push(*column, Some(stage));
            }
        }

        builder.build()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    /// Index of the identifier column.
    pub fn id_index(&self) -> usize {
        // The builder always places the identifier first.
        0
    }

    /// The stage a column belongs to; `None` for the general columns.
    pub fn stage_of(&self, column: &str) -> Option<Stage> {
        self.index_of(column).and_then(|i| self.owners[i])
    }

    /// All columns owned by `stage`, in schema order.
    pub fn columns_for(&self, stage: Stage) -> Vec<&str> {
        self.columns
            .iter()
            .zip(&self.owners)
            .filter(|(_, owner)| **owner == Some(stage))
            .map(|(c, _)| c.as_str())
            .collect()
    }

    /// Whether a header row read from disk is exactly this schema.
    pub fn matches_header<S: AsRef<str>>(&self, header: &[S]) -> bool {
        header.len() == self.columns.len()
            && header
                .iter()
                .zip(&self.columns)
                .all(|(a, b)| a.as_ref() == b)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Default)]
struct SchemaBuilder {
    columns: Vec<String>,
    owners: Vec<Option<Stage>>,
}

impl SchemaBuilder {
    fn push(&mut self, column: impl Into<String>, owner: Option<Stage>) {
        self.columns.push(column.into());
        self.owners.push(owner);
    }

    fn build(self) -> Schema {
        let index = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Schema {
            columns: self.columns,
            owners: self.owners,
            index,
        }
    }
}
