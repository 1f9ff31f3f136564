// SPDX-License-Identifier: Apache-2.0

//! Launch configuration records and on-disk layout for Keeper.

pub mod layout;
pub mod memory;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use layout::Layout;

/// Logical name used when a settings file does not specify one.
pub const DEFAULT_INSTANCE: &str = "primary";

/// Graceful stop window used when a settings file does not specify one.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;

/// Errors raised while reading or writing settings files.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid launch config payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Everything needed to launch the game server once.
///
/// Field names follow the camelCase shape shared with the web layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    /// Jar (or binary) file name, relative to `working_dir`.
    pub jar_or_binary: String,
    pub min_memory: String,
    pub max_memory: String,
    #[serde(default)]
    pub use_optimized_flags: bool,
    /// Extra runtime arguments placed before `-jar`.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Trailing arguments placed after `--nogui`.
    #[serde(default)]
    pub program_args: Vec<String>,
    pub working_dir: PathBuf,
    #[serde(default = "default_java_path")]
    pub java_path: String,
}

impl LaunchConfig {
    /// Builds a config with default memory bounds for a jar in `working_dir`.
    pub fn new<P: Into<PathBuf>>(jar_or_binary: &str, working_dir: P) -> Self {
        LaunchConfig {
            jar_or_binary: jar_or_binary.to_string(),
            min_memory: "1G".to_string(),
            max_memory: "2G".to_string(),
            use_optimized_flags: false,
            extra_args: Vec::new(),
            program_args: Vec::new(),
            working_dir: working_dir.into(),
            java_path: default_java_path(),
        }
    }

    /// Parses the JSON record handed over by a persistence collaborator.
    pub fn from_json(payload: &str) -> Result<Self, ConfigFileError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Absolute (or working-dir relative) path of the jar to run.
    pub fn executable_path(&self) -> PathBuf {
        self.working_dir.join(&self.jar_or_binary)
    }
}

fn default_java_path() -> String {
    "java".to_string()
}

fn default_instance() -> String {
    DEFAULT_INSTANCE.to_string()
}

fn default_stop_timeout_secs() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}

/// Contents of `keeper.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_instance")]
    pub instance: String,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    pub launch: LaunchConfig,
}

impl Settings {
    /// Default settings for a fresh home, serving `server.jar` from the
    /// instance data directory.
    pub fn default_for(layout: &Layout) -> Self {
        Settings {
            instance: default_instance(),
            stop_timeout_secs: default_stop_timeout_secs(),
            launch: LaunchConfig::new("server.jar", layout.instance_dir(DEFAULT_INSTANCE)),
        }
    }

    /// Reads settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes settings as pretty TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigFileError> {
        let rendered = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigFileError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, rendered).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
