pub mod persist;
mod types;

pub use persist::{save_config, write_default_if_missing};
pub use types::*;

use anyhow::{Context, Result};
use meshledger_common::Stage;
use std::path::{Component, Path};

/// File name of the project configuration inside a project directory.
pub const CONFIG_FILE: &str = "project.toml";

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from an explicit path, the project directory, or defaults.
pub fn load_config_or_default(custom_path: Option<&Path>, project_dir: &Path) -> Result<Config> {
    if let Some(path) = custom_path {
        let path = shellexpand::tilde(&path.to_string_lossy()).to_string();
        return load_config(Path::new(&path));
    }

    let path = project_dir.join(CONFIG_FILE);
    if path.exists() {
        return load_config(&path);
    }

    tracing::debug!("No {} in {:?}, using defaults", CONFIG_FILE, project_dir);
    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.batch.capacity == 0 {
        anyhow::bail!("batch.capacity must be at least 1");
    }

    if config.batch.container_prefix.trim().is_empty() {
        anyhow::bail!("batch.container_prefix cannot be empty");
    }

    if config.batch.container_extension.trim().is_empty()
        || config.batch.container_extension.contains(['.', '/', '\\'])
    {
        anyhow::bail!(
            "batch.container_extension must be a bare extension, got '{}'",
            config.batch.container_extension
        );
    }

    if let Some(file) = &config.ledger.file {
        if !is_plain_relative(Path::new(file)) {
            anyhow::bail!("ledger.file must be a relative path inside the project: {}", file);
        }
    }

    if let Some(command) = &config.engine.command {
        if command.trim().is_empty() {
            anyhow::bail!("engine.command cannot be empty");
        }
    }

    for name in config.stages.keys() {
        let stage: Stage = name
            .parse()
            .with_context(|| format!("Unknown stage table [stages.{}]", name))?;
        validate_policy(stage, config.policy_for(stage))?;
    }

    for entry in &config.reset.preserve {
        if !is_plain_relative(Path::new(entry)) {
            anyhow::bail!(
                "reset.preserve entries must be relative paths without '..': {}",
                entry
            );
        }
    }

    Ok(())
}

fn validate_policy(stage: Stage, policy: ContainerPolicy) -> Result<()> {
    match (stage, policy) {
        (Stage::Extraction, ContainerPolicy::None) => Ok(()),
        (Stage::Extraction, other) => {
            anyhow::bail!("{} cannot use container policy {:?}", stage, other)
        }
        (_, ContainerPolicy::None) => {
            anyhow::bail!("{} requires a container policy", stage)
        }
        (Stage::Reconstruction, ContainerPolicy::InPlace) => {
            anyhow::bail!("{} has no earlier container to work in place", stage)
        }
        _ => Ok(()),
    }
}

fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.batch.capacity, 5);
        assert_eq!(config.batch.container_prefix, "psx");
        assert_eq!(config.reset.preserve, vec!["video_source", "project.toml", ".venv"]);
        assert_eq!(config.policy_for(Stage::Reconstruction), ContainerPolicy::Batch);
        assert_eq!(config.policy_for(Stage::Consolidation), ContainerPolicy::Site);
        assert_eq!(config.policy_for(Stage::Export), ContainerPolicy::InPlace);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_parse_full_file() {
        let config: Config = toml::from_str(
            r#"
            [project]
            name = "reef"

            [batch]
            capacity = 3

            [engine]
            command = "~/bin/engine"
            args = ["{stage}", "{item}"]

            [stages.reconstruction.params]
            quality = "high"
            keypoint_limit = 40000

            [stages.consolidation]
            policy = "batch"
            "#,
        )
        .unwrap();

        assert_eq!(config.project.name.as_deref(), Some("reef"));
        assert_eq!(config.batch.capacity, 3);
        assert_eq!(config.batch.container_extension, "psx");
        assert_eq!(config.engine.args, vec!["{stage}", "{item}"]);
        assert_eq!(config.policy_for(Stage::Consolidation), ContainerPolicy::Batch);

        let params = config.params_for(Stage::Reconstruction);
        assert_eq!(params["quality"], "high");
        assert_eq!(params["keypoint_limit"], 40000);
        assert!(config.params_for(Stage::Export).as_object().unwrap().is_empty());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = Config::default();
        config.batch.capacity = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unknown_stage_table_rejected() {
        let config: Config = toml::from_str("[stages.meshing]\n").unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_bad_policy_rejected() {
        let config: Config =
            toml::from_str("[stages.extraction]\npolicy = \"batch\"\n").unwrap();
        assert!(validate_config(&config).is_err());

        let config: Config =
            toml::from_str("[stages.reconstruction]\npolicy = \"in-place\"\n").unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_preserve_must_stay_inside_project() {
        let mut config = Config::default();
        config.reset.preserve.push("../elsewhere".to_string());
        assert!(validate_config(&config).is_err());

        config.reset.preserve = vec!["/abs".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_or_default(None, dir.path()).unwrap();
        assert_eq!(config.batch.capacity, 5);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[batch]\ncapacity = \"many\"\n").unwrap();
        let err = load_config_or_default(None, dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }
}
