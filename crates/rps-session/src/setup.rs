//! Config loading.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Config;
use crate::error::SessionError;

/// Load configuration from the given path, or the default location.
///
/// A missing file at the default location yields the defaults; a missing
/// file that was asked for explicitly is an error.
pub fn load_config(path: Option<&str>) -> Result<Config, SessionError> {
    let (config_path, explicit) = match path {
        Some(p) => (PathBuf::from(p), true),
        None => (default_config_path(), false),
    };

    if config_path.exists() {
        let config = read_config(&config_path)?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else if explicit {
        Err(SessionError::Config(format!(
            "config file {} not found",
            config_path.display()
        )))
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

fn read_config(path: &Path) -> Result<Config, SessionError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SessionError::Config(format!("failed to read config: {e}")))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| SessionError::Config(format!("failed to parse config: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("rps-client")
}

/// Get the default config file path.
fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
