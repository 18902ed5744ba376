use std::path::{Path, PathBuf};

use crate::config::{Config, Overrides};
use crate::error::ConfigError;
use crate::validate::validate_first;

/// Default config location: `<config dir>/gdbtape/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gdbtape").join("config.toml"))
}

/// Load and validate the config file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::NotFound`] when the file does not exist, and
/// parse or validation errors otherwise.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let config = load_from_str(&content)?;
    tracing::debug!("loaded config from {}", path.display());
    Ok(config)
}

/// Load `explicit` if given; otherwise the default location if it
/// exists; otherwise built-in defaults.
pub fn load_or_default(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match default_config_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => {
            tracing::debug!("no config file, using defaults");
            Ok(Config::default())
        }
    }
}

/// Parse a TOML string directly into a validated [`Config`].
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_first(&config)?;
    Ok(config)
}

/// Apply command-line overrides and validate the result.
pub fn resolve(mut config: Config, overrides: &Overrides) -> Result<Config, ConfigError> {
    config.apply_overrides(overrides);
    validate_first(&config)?;
    Ok(config)
}
