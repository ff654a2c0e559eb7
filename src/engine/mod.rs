//! Adapter for the external reconstruction engine.
//!
//! The engine is opaque: the runner hands it one [`StageRequest`] per item and
//! gets back either ledger fields to record or an [`EngineError`].

pub mod command;
pub mod template;
pub mod tools;

pub use command::CommandEngine;
pub use template::TemplateContext;
pub use tools::{check_engine, EngineInfo};

use meshledger_common::{Stage, WorkItemId};
use std::path::PathBuf;

/// One stage invocation for one work item.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: Stage,
    pub item: WorkItemId,
    /// Container the item is processed in, for stages that use one.
    pub container: Option<PathBuf>,
    /// Source video (stage 0), frames directory (stage 1) or container.
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub project_dir: PathBuf,
    /// Stage parameters from `[stages.<name>.params]`, as a JSON object.
    pub params: serde_json::Value,
}

/// Result of a successful stage call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Ledger column/value pairs reported by the engine.
    pub fields: Vec<(String, String)>,
}

impl StageOutcome {
    pub fn with_field(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((column.into(), value.into()));
        self
    }
}

/// Errors raised by an engine call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine could not be started.
    #[error("failed to launch engine '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine ran and reported failure.
    #[error("engine exited with code {code:?}: {stderr}")]
    Failed {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The engine is not configured.
    #[error("no engine configured: {0}")]
    NotConfigured(String),

    /// Any other engine-side failure.
    #[error("{0}")]
    Other(String),
}

impl From<EngineError> for meshledger_common::Error {
    fn from(e: EngineError) -> Self {
        meshledger_common::Error::engine(e.to_string())
    }
}

/// Runs stage operations.
///
/// Calls are synchronous and blocking; one item is processed at a time.
pub trait Engine {
    fn run_stage(&mut self, request: &StageRequest) -> Result<StageOutcome, EngineError>;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn run_stage(&mut self, request: &StageRequest) -> Result<StageOutcome, EngineError> {
        (**self).run_stage(request)
    }
}
