// SPDX-License-Identifier: Apache-2.0

//! Lifecycle states and the publish port observers subscribe to.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 64;

/// In-memory lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Status transition, serialized as `{"type":"status","status":...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "status", rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub instance: String,
    pub status: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
}

impl LifecycleEvent {
    pub fn new(instance: &str, status: LifecycleState) -> Self {
        LifecycleEvent {
            instance: instance.to_string(),
            status,
            pid: None,
            start_time: None,
            exit_code: None,
            signal: None,
        }
    }

    pub fn with_process(mut self, pid: u32, start_time: DateTime<Utc>) -> Self {
        self.pid = Some(pid);
        self.start_time = Some(start_time);
        self
    }

    pub fn with_exit(mut self, exit_code: Option<i32>, signal: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self.signal = signal;
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JournalEntry<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a LifecycleEvent,
}

/// Fan-out of lifecycle events to subscribers plus an optional JSONL journal.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
    journal: Option<PathBuf>,
}

impl EventBus {
    pub fn new(journal: Option<PathBuf>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventBus { tx, journal }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Records and broadcasts `event`. Never fails: a journal write error is
    /// logged and having no subscribers is normal.
    pub fn publish(&self, event: LifecycleEvent) {
        info!(
            instance = %event.instance,
            status = %event.status,
            pid = ?event.pid,
            "lifecycle transition"
        );
        if let Err(e) = self.append_journal(&event) {
            warn!("failed to journal lifecycle event: {e}");
        }
        let _ = self.tx.send(event);
    }

    fn append_journal(&self, event: &LifecycleEvent) -> io::Result<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entry = JournalEntry {
            timestamp: Utc::now(),
            event,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{json}")
    }
}
