//! Writing project configuration back to disk.

use super::Config;
use anyhow::{Context, Result};
use std::path::Path;

/// Save the entire config to a TOML file.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let content = toml::to_string_pretty(config).with_context(|| "Failed to serialize config")?;

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    Ok(())
}

/// Write a default config unless the file already exists. Returns `true` if written.
pub fn write_default_if_missing(path: &Path, project_name: &str) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let mut config = Config::default();
    config.project.name = Some(project_name.to_string());
    save_config(path, &config)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;

    #[test]
    fn test_saved_default_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.toml");

        assert!(write_default_if_missing(&path, "reef").unwrap());
        assert!(!write_default_if_missing(&path, "other").unwrap());

        let config = load_config(&path).unwrap();
        assert_eq!(config.project.name.as_deref(), Some("reef"));
        assert_eq!(config.batch.capacity, 5);
    }
}
