use meshledger_common::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Project configuration, read from `project.toml` in the project directory.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-stage settings keyed by stage name (`[stages.reconstruction]`).
    #[serde(default)]
    pub stages: BTreeMap<String, StageConfig>,

    #[serde(default)]
    pub reset: ResetConfig,
}

impl Config {
    /// Settings for one stage, if the file has a table for it.
    pub fn stage(&self, stage: Stage) -> Option<&StageConfig> {
        self.stages.get(stage.name())
    }

    /// Container policy in effect for a stage.
    pub fn policy_for(&self, stage: Stage) -> ContainerPolicy {
        self.stage(stage)
            .and_then(|s| s.policy)
            .unwrap_or_else(|| ContainerPolicy::default_for(stage))
    }

    /// Engine parameters for a stage as a JSON object.
    pub fn params_for(&self, stage: Stage) -> serde_json::Value {
        self.stage(stage)
            .and_then(|s| serde_json::to_value(&s.params).ok())
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Project name; defaults to the project directory name.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Ledger file name relative to the project directory
    /// (default: `status_<project>.csv`).
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Maximum work items per batch container.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    #[serde(default = "default_container_extension")]
    pub container_extension: String,
}

fn default_capacity() -> usize {
    5
}

fn default_container_prefix() -> String {
    "psx".to_string()
}

fn default_container_extension() -> String {
    "psx".to_string()
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            container_prefix: default_container_prefix(),
            container_extension: default_container_extension(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Executable that runs one stage for one item. `~` and `$VARS` are expanded.
    #[serde(default)]
    pub command: Option<String>,

    /// Argument templates; see `engine::template` for the variables.
    #[serde(default = "default_engine_args")]
    pub args: Vec<String>,
}

fn default_engine_args() -> Vec<String> {
    [
        "{stage_name}",
        "--item",
        "{item}",
        "--input",
        "{input}",
        "--output",
        "{output}",
        "--container",
        "{container}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: default_engine_args(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StageConfig {
    /// Opaque engine parameters (thresholds, quality levels, switches).
    #[serde(default)]
    pub params: toml::Table,

    /// Override of the stage's container policy.
    #[serde(default)]
    pub policy: Option<ContainerPolicy>,
}

/// How a stage maps work items onto engine containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerPolicy {
    /// No container; the stage works on plain files.
    None,
    /// Capacity-bounded batches of `batch.capacity` items.
    Batch,
    /// One container per site token.
    Site,
    /// Reuse the container recorded by the previous stage.
    InPlace,
}

impl ContainerPolicy {
    pub fn default_for(stage: Stage) -> Self {
        match stage {
            Stage::Extraction => ContainerPolicy::None,
            Stage::Reconstruction => ContainerPolicy::Batch,
            Stage::Consolidation => ContainerPolicy::Site,
            Stage::Finishing | Stage::Export => ContainerPolicy::InPlace,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResetConfig {
    /// Paths relative to the project directory that no reset ever touches.
    #[serde(default = "default_preserve")]
    pub preserve: Vec<String>,
}

fn default_preserve() -> Vec<String> {
    vec![
        "video_source".to_string(),
        "project.toml".to_string(),
        ".venv".to_string(),
    ]
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            preserve: default_preserve(),
        }
    }
}
