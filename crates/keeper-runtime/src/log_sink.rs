// SPDX-License-Identifier: Apache-2.0

//! Per-run append-only capture of a child's stdout and stderr.

use std::fs as std_fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

const RUN_ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.3f";
const LINE_STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// The pair of writers owned by one run.
#[derive(Debug)]
pub struct LogSink {
    pub run_id: String,
    pub stdout: LogWriter,
    pub stderr: LogWriter,
}

impl LogSink {
    /// Creates fresh `<run_id>.out.log` / `<run_id>.err.log` files in `log_dir`.
    ///
    /// The run id is `<name>-<local timestamp>`; if either file already
    /// exists a numeric suffix is added, so no run ever appends to another
    /// run's history.
    pub async fn open(log_dir: &Path, name: &str) -> io::Result<LogSink> {
        tokio::fs::create_dir_all(log_dir).await?;
        let stamp = Local::now().format(RUN_ID_FORMAT).to_string();

        for attempt in 0u32..100 {
            let run_id = if attempt == 0 {
                format!("{name}-{stamp}")
            } else {
                format!("{name}-{stamp}-{attempt}")
            };
            let out_path = log_dir.join(format!("{run_id}.out.log"));
            let err_path = log_dir.join(format!("{run_id}.err.log"));

            let stdout = match create_new(&out_path).await {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            };
            let stderr = match create_new(&err_path).await {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    drop(stdout);
                    let _ = tokio::fs::remove_file(&out_path).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            return Ok(LogSink {
                run_id,
                stdout: LogWriter::new(out_path, stdout),
                stderr: LogWriter::new(err_path, stderr),
            });
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("could not allocate unique log files for {name}"),
        ))
    }

    pub async fn close(&mut self) -> io::Result<()> {
        let out = self.stdout.close().await;
        let err = self.stderr.close().await;
        out.and(err)
    }
}

async fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create_new(true)
        .append(true)
        .open(path)
        .await
}

/// Append-only, timestamp-prefixing writer for one stream of one run.
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    file: Option<File>,
}

impl LogWriter {
    fn new(path: PathBuf, file: File) -> Self {
        LogWriter {
            path,
            file: Some(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Appends `line` prefixed with the capture time.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("log {} is closed", self.path.display()),
            ));
        };
        let stamped = format!("[{}] {}\n", Local::now().format(LINE_STAMP_FORMAT), line);
        file.write_all(stamped.as_bytes()).await
    }

    /// Flushes and releases the file handle. Safe to call more than once.
    pub async fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => {
                file.flush().await?;
                file.sync_data().await
            }
            None => Ok(()),
        }
    }
}

/// Returns the last `lines` lines of a log file, empty when it does not exist.
pub fn tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    if lines == 0 || !path.exists() {
        return Ok(Vec::new());
    }

    let content = std_fs::read(path)?;
    let content = String::from_utf8_lossy(&content);
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].iter().map(ToString::to_string).collect())
}

/// Whether `stem` is `<name>-<stamp>` or `<name>-<stamp>-<n>`, with `stamp`
/// rendered by `format`. Keeps `primary` from matching `primary-2` runs.
pub(crate) fn is_stamped_for(stem: &str, name: &str, format: &str) -> bool {
    let Some(rest) = stem
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };
    let stamp_len = Local::now().format(format).to_string().len();
    let (Some(stamp), Some(suffix)) = (rest.get(..stamp_len), rest.get(stamp_len..)) else {
        return false;
    };
    if NaiveDateTime::parse_from_str(stamp, format).is_err() {
        return false;
    }
    match suffix.strip_prefix('-') {
        None => suffix.is_empty(),
        Some(n) => !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()),
    }
}

/// Newest `<name>-<stamp>.out.log` in `log_dir`, by modification time.
pub fn latest_run_log(log_dir: &Path, name: &str) -> io::Result<Option<PathBuf>> {
    if !log_dir.exists() {
        return Ok(None);
    }
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std_fs::read_dir(log_dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(run_id) = file_name.strip_suffix(".out.log") else {
            continue;
        };
        if !is_stamped_for(run_id, name, RUN_ID_FORMAT) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        let candidate = (modified, entry.path());
        if newest.as_ref().map_or(true, |current| candidate > *current) {
            newest = Some(candidate);
        }
    }
    Ok(newest.map(|(_, path)| path))
}
