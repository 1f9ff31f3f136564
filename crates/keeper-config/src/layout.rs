// SPDX-License-Identifier: Apache-2.0

//! Directory layout under a Keeper home.

use std::path::{Path, PathBuf};

/// Resolved directories used by the supervisor.
///
/// ```text
/// <home>/keeper.toml
/// <home>/instances/<name>/   data directory per instance
/// <home>/logs/               timestamped run logs + events.jsonl
/// <home>/backups/            timestamped snapshot directories
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    home: PathBuf,
}

impl Layout {
    pub fn new<P: Into<PathBuf>>(home: P) -> Self {
        Layout { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn settings_path(&self) -> PathBuf {
        self.home.join("keeper.toml")
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.home.join("instances")
    }

    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.instances_dir().join(name)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.home.join("backups")
    }

    /// JSONL journal of lifecycle events.
    pub fn events_path(&self) -> PathBuf {
        self.logs_dir().join("events.jsonl")
    }
}
