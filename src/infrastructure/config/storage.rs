use super::app_config::{APP_NAME, APP_ORGANIZATION, APP_QUALIFIER, LoaderConfig};
use directories::ProjectDirs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no platform config directory available")]
    ConfigDirNotFound,
    #[error("config file has no parent directory: {0}")]
    NoParent(PathBuf),
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Reads and writes `config.toml`, by default in the platform config dir.
pub struct ConfigStorage {
    default_path: PathBuf,
}

impl ConfigStorage {
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigDirNotFound` if the platform has no
    /// config directory for this application.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .ok_or(ConfigError::ConfigDirNotFound)?;
        Ok(Self::with_dir(dirs.config_dir()))
    }

    #[must_use]
    pub fn with_dir(dir: &Path) -> Self {
        Self {
            default_path: dir.join(CONFIG_FILE_NAME),
        }
    }

    /// The file used when no override is given.
    #[must_use]
    pub fn config_path<'a>(&'a self, path_override: Option<&'a Path>) -> &'a Path {
        path_override.unwrap_or(&self.default_path)
    }

    /// Loads the loader configuration, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or the defaults
    /// cannot be written. A malformed file falls back to defaults.
    pub fn load_config(&self, path_override: Option<&Path>) -> Result<LoaderConfig, ConfigError> {
        let path = self.config_path(path_override);

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file, writing defaults");
                let config = LoaderConfig::default();
                Self::write_atomic(path, &config)?;
                return Ok(config);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(toml::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Malformed config, using defaults");
            LoaderConfig::default()
        }))
    }

    /// Writes `config` over the config file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be serialized or replaced.
    pub fn save_config(
        &self,
        config: &LoaderConfig,
        path_override: Option<&Path>,
    ) -> Result<(), ConfigError> {
        let path = self.config_path(path_override);
        Self::write_atomic(path, config)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    fn write_atomic(path: &Path, config: &LoaderConfig) -> Result<(), ConfigError> {
        let body = toml::to_string_pretty(config)?;
        let parent = path
            .parent()
            .ok_or_else(|| ConfigError::NoParent(path.to_path_buf()))?;
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(body.as_bytes())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
