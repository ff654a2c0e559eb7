//! Locating the engine executable.

use std::path::{Path, PathBuf};

/// Information about the configured engine executable.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    /// Command as configured, after expansion.
    pub command: String,
    pub available: bool,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Check whether an engine command can be found.
///
/// Commands containing a path separator are checked as paths; bare names are
/// looked up on `PATH`.
///
/// ```
/// use meshledger::engine::check_engine;
///
/// let info = check_engine("nonexistent_engine_12345");
/// assert!(!info.available);
/// ```
pub fn check_engine(command: &str) -> EngineInfo {
    let path = if command.contains(std::path::MAIN_SEPARATOR) || command.contains('/') {
        let candidate = Path::new(command);
        candidate.is_file().then(|| candidate.to_path_buf())
    } else {
        which::which(command).ok()
    };

    EngineInfo {
        command: command.to_string(),
        available: path.is_some(),
        path,
    }
}
