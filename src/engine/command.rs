//! Engine backed by an external executable.
//!
//! The executable is run once per item and stage with templated arguments.
//! Stage parameters arrive as JSON in `MESHLEDGER_PARAMS`. Lines on stdout
//! of the form `@ledger <column>=<value>` become ledger fields.

use super::{Engine, EngineError, StageOutcome, StageRequest, TemplateContext};
use crate::config::EngineConfig;
use std::path::PathBuf;
use std::process::Command;

/// Environment variable carrying the stage parameters.
pub const PARAMS_ENV: &str = "MESHLEDGER_PARAMS";

/// Stdout prefix of a reported ledger field.
pub const LEDGER_LINE_PREFIX: &str = "@ledger ";

#[derive(Debug, Clone)]
pub struct CommandEngine {
    command: String,
    args: Vec<String>,
    log_dir: Option<PathBuf>,
}

impl CommandEngine {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            log_dir: None,
        }
    }

    /// Build from `[engine]`, expanding `~` and environment variables in the command.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let raw = config.command.as_deref().ok_or_else(|| {
            EngineError::NotConfigured("set engine.command in project.toml".to_string())
        })?;
        let command = shellexpand::full(raw)
            .map_err(|e| EngineError::Other(format!("cannot expand engine command '{}': {}", raw, e)))?
            .to_string();
        Ok(Self::new(command, config.args.clone()))
    }

    /// Keep a per-call log of the engine's stdout and stderr in `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn write_log(&self, request: &StageRequest, stdout: &str, stderr: &str) {
        let Some(dir) = &self.log_dir else {
            return;
        };
        let path = dir.join(format!(
            "{}_step{}.log",
            request.item,
            request.stage.number()
        ));
        let body = format!("== stdout ==\n{}\n== stderr ==\n{}\n", stdout, stderr);
        if let Err(e) = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, body)) {
            tracing::warn!("Failed to write engine log {:?}: {}", path, e);
        }
    }
}

impl Engine for CommandEngine {
    fn run_stage(&mut self, request: &StageRequest) -> Result<StageOutcome, EngineError> {
        let ctx = TemplateContext::for_request(request);
        let args = ctx.substitute_all(&self.args);
        let params = request.params.to_string();

        tracing::info!(
            item = %request.item,
            stage = request.stage.number(),
            "Executing engine: {} {:?}",
            self.command,
            args
        );

        let result = Command::new(&self.command)
            .args(&args)
            .current_dir(&request.project_dir)
            .env(PARAMS_ENV, &params)
            .output()
            .map_err(|source| EngineError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&result.stdout).to_string();
        let stderr = String::from_utf8_lossy(&result.stderr).to_string();
        self.write_log(request, &stdout, &stderr);

        if !result.status.success() {
            return Err(EngineError::Failed {
                code: result.status.code(),
                stdout,
                stderr: stderr.trim().to_string(),
            });
        }

        tracing::debug!("Engine output: {}", stdout);
        Ok(StageOutcome {
            fields: parse_ledger_fields(&stdout),
        })
    }
}

/// Extract `@ledger <column>=<value>` lines from engine output.
pub fn parse_ledger_fields(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix(LEDGER_LINE_PREFIX))
        .filter_map(|rest| rest.split_once('='))
        .map(|(column, value)| (column.trim().to_string(), value.trim().to_string()))
        .filter(|(column, _)| !column.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshledger_common::{Stage, WorkItemId};

    fn request(project: &std::path::Path) -> StageRequest {
        StageRequest {
            stage: Stage::Reconstruction,
            item: WorkItemId::new("T1").unwrap(),
            container: None,
            input: project.join("processing/frames/T1"),
            output_dir: project.join("processing/psxraw"),
            project_dir: project.to_path_buf(),
            params: serde_json::json!({"quality": "high"}),
        }
    }

    #[test]
    fn test_parse_ledger_fields() {
        let out = "aligning...\n@ledger Tie points=1200\n  @ledger Report file = reports/T1.pdf\n@ledger broken\n@ledger =x\n";
        assert_eq!(
            parse_ledger_fields(out),
            vec![
                ("Tie points".to_string(), "1200".to_string()),
                ("Report file".to_string(), "reports/T1.pdf".to_string()),
            ]
        );
    }

    #[test]
    fn test_unconfigured_engine() {
        let err = CommandEngine::from_config(&EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::NotConfigured(_)));
    }

    #[test]
    fn test_missing_executable_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = CommandEngine::new("nonexistent_engine_12345", vec![]);
        let err = engine.run_stage(&request(dir.path())).unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_engine_reports_fields_and_params() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = CommandEngine::new(
            "sh",
            vec![
                "-c".to_string(),
                "echo \"@ledger Report file=$MESHLEDGER_PARAMS\"; echo \"@ledger Triangles=$1\""
                    .to_string(),
                "engine".to_string(),
                "{item}".to_string(),
            ],
        )
        .with_log_dir(dir.path().join("logs"));

        let outcome = engine.run_stage(&request(dir.path())).unwrap();
        assert_eq!(
            outcome.fields,
            vec![
                ("Report file".to_string(), r#"{"quality":"high"}"#.to_string()),
                ("Triangles".to_string(), "T1".to_string()),
            ]
        );
        assert!(dir.path().join("logs/T1_step1.log").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = CommandEngine::new(
            "sh",
            vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()],
        );
        match engine.run_stage(&request(dir.path())) {
            Err(EngineError::Failed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
