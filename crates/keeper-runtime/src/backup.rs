// SPDX-License-Identifier: Apache-2.0

//! Point-in-time copies of an instance's config files and world data.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use keeper_config::LaunchConfig;
use serde::Serialize;
use tracing::info;

use crate::log_sink::is_stamped_for;

/// Configuration files copied when present.
pub const BACKUP_ALLOW_LIST: &[&str] = &[
    "server.properties",
    "eula.txt",
    "ops.json",
    "whitelist.json",
    "banned-players.json",
    "banned-ips.json",
    "usercache.json",
];

/// Bulk data directory copied recursively when present.
pub const WORLD_DIR: &str = "world";

const SNAPSHOT_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.3f";

/// Outcome of one backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    /// Top-level entries copied, e.g. `server.properties` or `world/`.
    pub files_included: Vec<String>,
}

/// Writes snapshots into `<backup_dir>/<name>-<timestamp>/`.
#[derive(Debug, Clone)]
pub struct Archiver {
    backup_dir: PathBuf,
}

impl Archiver {
    pub fn new<P: Into<PathBuf>>(backup_dir: P) -> Self {
        Archiver {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copies the allow-listed files and the world directory of `config`'s
    /// working directory. Missing entries are skipped.
    ///
    /// No isolation from a running server: files it writes concurrently may
    /// be captured mid-write.
    pub fn snapshot(&self, name: &str, config: &LaunchConfig) -> io::Result<BackupReport> {
        let source = &config.working_dir;
        let timestamp = Utc::now();
        let destination = self.allocate_destination(name, timestamp)?;

        let mut files_included = Vec::new();
        for file in BACKUP_ALLOW_LIST {
            let from = source.join(file);
            if !from.is_file() {
                continue;
            }
            fs::copy(&from, destination.join(file))?;
            files_included.push(file.to_string());
        }

        let world = source.join(WORLD_DIR);
        if world.is_dir() {
            copy_dir_recursive(&world, &destination.join(WORLD_DIR))?;
            files_included.push(format!("{WORLD_DIR}/"));
        }

        info!(
            instance = name,
            path = %destination.display(),
            entries = files_included.len(),
            "backup written"
        );

        Ok(BackupReport {
            path: destination,
            timestamp,
            files_included,
        })
    }

    /// Existing snapshot directories for `name`, newest first.
    pub fn list(&self, name: &str) -> io::Result<Vec<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }
        let mut snapshots: Vec<PathBuf> = fs::read_dir(&self.backup_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter(|entry| {
                is_stamped_for(&entry.file_name().to_string_lossy(), name, SNAPSHOT_FORMAT)
            })
            .map(|entry| entry.path())
            .collect();
        snapshots.sort();
        snapshots.reverse();
        Ok(snapshots)
    }

    fn allocate_destination(&self, name: &str, timestamp: DateTime<Utc>) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.backup_dir)?;
        let stamp = timestamp
            .with_timezone(&Local)
            .format(SNAPSHOT_FORMAT)
            .to_string();

        for attempt in 0u32..100 {
            let dir_name = if attempt == 0 {
                format!("{name}-{stamp}")
            } else {
                format!("{name}-{stamp}-{attempt}")
            };
            let candidate = self.backup_dir.join(dir_name);
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("could not allocate a backup directory for {name}"),
        ))
    }
}

/// Recursively copies regular files and directories. Symlinks are skipped
/// so a link inside the world cannot pull in files from elsewhere.
fn copy_dir_recursive(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = to.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_dir() -> (tempfile::TempDir, LaunchConfig) {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("instances/primary");
        fs::create_dir_all(&data).unwrap();
        let config = LaunchConfig::new("server.jar", &data);
        (tmp, config)
    }

    #[test]
    fn snapshot_copies_present_allow_listed_files_byte_identical() {
        let (tmp, config) = server_dir();
        let data = &config.working_dir;
        fs::write(data.join("server.properties"), "motd=hello\nmax-players=20\n").unwrap();
        fs::write(data.join("ops.json"), "[]").unwrap();
        fs::write(data.join("server.jar"), b"not in allow list").unwrap();

        let archiver = Archiver::new(tmp.path().join("backups"));
        let report = archiver.snapshot("primary", &config).unwrap();

        assert_eq!(
            report.files_included,
            vec!["server.properties".to_string(), "ops.json".to_string()]
        );
        let mut copied: Vec<String> = fs::read_dir(&report.path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        copied.sort();
        assert_eq!(copied, vec!["ops.json", "server.properties"]);
        assert_eq!(
            fs::read(report.path.join("server.properties")).unwrap(),
            fs::read(data.join("server.properties")).unwrap()
        );
    }

    #[test]
    fn snapshot_copies_world_recursively() {
        let (tmp, config) = server_dir();
        let region = config.working_dir.join("world/region");
        fs::create_dir_all(&region).unwrap();
        fs::write(config.working_dir.join("world/level.dat"), [1u8, 2, 3]).unwrap();
        fs::write(region.join("r.0.0.mca"), [9u8; 64]).unwrap();

        let archiver = Archiver::new(tmp.path().join("backups"));
        let report = archiver.snapshot("primary", &config).unwrap();

        assert_eq!(report.files_included, vec!["world/".to_string()]);
        assert_eq!(
            fs::read(report.path.join("world/level.dat")).unwrap(),
            vec![1u8, 2, 3]
        );
        assert_eq!(
            fs::read(report.path.join("world/region/r.0.0.mca")).unwrap(),
            vec![9u8; 64]
        );
    }

    #[test]
    fn empty_source_produces_empty_snapshot() {
        let (tmp, config) = server_dir();
        let archiver = Archiver::new(tmp.path().join("backups"));
        let report = archiver.snapshot("primary", &config).unwrap();

        assert!(report.files_included.is_empty());
        assert!(report.path.is_dir());
    }

    #[test]
    fn consecutive_snapshots_never_share_a_directory() {
        let (tmp, config) = server_dir();
        fs::write(config.working_dir.join("eula.txt"), "eula=true\n").unwrap();
        let archiver = Archiver::new(tmp.path().join("backups"));

        let first = archiver.snapshot("primary", &config).unwrap();
        let second = archiver.snapshot("primary", &config).unwrap();

        assert_ne!(first.path, second.path);
        let listed = archiver.list("primary").unwrap();
        assert_eq!(listed.len(), 2);
        assert!(archiver.list("other").unwrap().is_empty());
    }

    #[test]
    fn list_ignores_instances_sharing_a_prefix() {
        let (tmp, config) = server_dir();
        let archiver = Archiver::new(tmp.path().join("backups"));
        archiver.snapshot("primary-2", &config).unwrap();
        fs::create_dir_all(tmp.path().join("backups/primary-old")).unwrap();

        assert!(archiver.list("primary").unwrap().is_empty());
        let own = archiver.snapshot("primary", &config).unwrap();
        assert_eq!(archiver.list("primary").unwrap(), vec![own.path]);
        assert_eq!(archiver.list("primary-2").unwrap().len(), 1);
    }
}
