//! Global configuration loader for Conductor.
//!
//! Reads `config.toml` and deserializes it into [`GlobalConfig`]. Falls back
//! to defaults when the file is missing or malformed.
//!
//! Loading happens before the tracing subscriber exists (the file decides
//! how logging is set up), so the loader returns a [`ConfigOrigin`] that is
//! logged once tracing is initialized.

use std::path::{Path, PathBuf};

use conductor_types::config::GlobalConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "CONDUCTOR_CONFIG";

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOrigin {
    File(PathBuf),
    Missing(PathBuf),
    Unreadable { path: PathBuf, error: String },
    Invalid { path: PathBuf, error: String },
    /// No candidate path (no `--config`, no env var, no home directory).
    NoPath,
}

impl ConfigOrigin {
    /// Report the origin through `tracing`.
    pub fn log(&self) {
        match self {
            ConfigOrigin::File(path) => {
                tracing::debug!("Loaded configuration from {}", path.display());
            }
            ConfigOrigin::Missing(path) => {
                tracing::debug!("No config.toml found at {}, using defaults", path.display());
            }
            ConfigOrigin::Unreadable { path, error } => {
                tracing::warn!("Failed to read {}: {error}, using defaults", path.display());
            }
            ConfigOrigin::Invalid { path, error } => {
                tracing::warn!("Failed to parse {}: {error}, using defaults", path.display());
            }
            ConfigOrigin::NoPath => {
                tracing::debug!("No home directory, using default configuration");
            }
        }
    }
}

/// Pick the config file path.
///
/// Priority:
/// 1. `--config <path>`
/// 2. `$CONDUCTOR_CONFIG`
/// 3. `~/.conductor/config.toml`
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".conductor").join("config.toml"))
}

/// Load the global configuration from `path`.
pub async fn load_global_config(path: Option<&Path>) -> (GlobalConfig, ConfigOrigin) {
    let Some(path) = path else {
        return (GlobalConfig::default(), ConfigOrigin::NoPath);
    };

    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return (GlobalConfig::default(), ConfigOrigin::Missing(path.to_path_buf()));
        }
        Err(err) => {
            return (
                GlobalConfig::default(),
                ConfigOrigin::Unreadable {
                    path: path.to_path_buf(),
                    error: err.to_string(),
                },
            );
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => (config, ConfigOrigin::File(path.to_path_buf())),
        Err(err) => (
            GlobalConfig::default(),
            ConfigOrigin::Invalid {
                path: path.to_path_buf(),
                error: err.to_string(),
            },
        ),
    }
}
