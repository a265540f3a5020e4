use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, TerraforgeError};

/// Per-user fallbacks for settings that neither the command line nor a run
/// file provides.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    pub template_suffix: Option<String>,
    pub concurrency: Option<usize>,
}

impl UserConfig {
    /// `<config dir>/terraforge/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("terraforge").join("config.toml"))
    }

    pub fn read(path: &Path) -> Result<Option<UserConfig>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TerraforgeError::Io {
                    context: format!("reading user defaults {}", path.display()),
                    source: e,
                })
            }
        };

        let config = toml::from_str(&content).map_err(|e| TerraforgeError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(path = %path.display(), "loaded user defaults");
        Ok(Some(config))
    }
}

pub fn load_user_config() -> Result<Option<UserConfig>> {
    match UserConfig::default_path() {
        Some(path) => UserConfig::read(&path),
        None => Ok(None),
    }
}
