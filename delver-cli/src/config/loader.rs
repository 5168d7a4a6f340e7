//! Config file discovery and loading.

use super::types::DelverConfig;
use std::path::{Path, PathBuf};

/// Discovers and layers config files
///
/// Priority, lowest first: `~/.delver/config.toml`, `./delver.toml`, then a
/// file named on the command line. The two discovered files are optional
/// and a broken one is skipped with a warning; an explicit file must load.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    global_path: PathBuf,
    local_path: PathBuf,
    explicit_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::with_paths(Self::global_config_path(), Self::local_config_path())
    }

    /// Loader over specific global and local paths.
    pub fn with_paths(global_path: PathBuf, local_path: PathBuf) -> Self {
        Self {
            global_path,
            local_path,
            explicit_path: None,
        }
    }

    /// Also load `path`, with the highest priority.
    #[must_use]
    pub fn with_explicit(mut self, path: Option<PathBuf>) -> Self {
        self.explicit_path = path;
        self
    }

    /// Get the path to the user-global config file.
    pub fn global_config_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".delver").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".delver/config.toml"))
    }

    /// Get the path to the project-local config file.
    pub fn local_config_path() -> PathBuf {
        PathBuf::from("delver.toml")
    }

    /// Load and merge every config file that exists.
    ///
    /// Returns the merged config and the files that were applied.
    pub fn load(&self) -> Result<(DelverConfig, Vec<PathBuf>), ConfigError> {
        let mut config = DelverConfig::default();
        let mut loaded_files = Vec::new();

        for path in [&self.global_path, &self.local_path] {
            if !path.exists() {
                continue;
            }
            match load_file(path) {
                Ok(file_config) => {
                    config.merge(file_config);
                    loaded_files.push(path.clone());
                }
                Err(e) => log::warn!("Skipping config file: {}", e),
            }
        }

        if let Some(path) = &self.explicit_path {
            config.merge(load_file(path)?);
            loaded_files.push(path.clone());
        }

        if config.is_empty() {
            log::debug!("No config files found, using defaults");
        } else {
            log::debug!("Loaded config from {:?}", loaded_files);
        }
        Ok((config, loaded_files))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn load_file(path: &Path) -> Result<DelverConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Errors that can occur during config loading.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// IO error reading config file
    Io { path: PathBuf, error: String },
    /// Parse error in config file
    Parse { path: PathBuf, error: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, error } => {
                write!(f, "Failed to read {}: {}", path.display(), error)
            }
            ConfigError::Parse { path, error } => {
                write!(f, "Failed to parse {}: {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
