// SPDX-License-Identifier: Apache-2.0

//! The supervised process registry: at most one tracked child per name,
//! serialized lifecycle operations, and exactly-once exit cleanup.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use keeper_config::{LaunchConfig, Layout};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::backup::{Archiver, BackupReport};
use crate::error::{Result, SupervisorError};
use crate::events::{EventBus, LifecycleEvent, LifecycleState};
use crate::launch::{self, LaunchPlan};
use crate::log_sink::{self, LogSink, LogWriter};
use crate::probe::Prober;
use crate::signal::{self, KillSignal};
use crate::stats::{self, HostStats};

/// Line written to the server console to request a clean shutdown.
pub const SHUTDOWN_COMMAND: &str = "stop";

/// How long the exit observer waits for output drains after the process is
/// gone. A descendant that inherited the pipes can otherwise hold them open.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on a console write. A server that stops reading its input
/// must not hold the console lock forever.
const COMMAND_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of a live instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub run_id: String,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub config: LaunchConfig,
    pub log_path: PathBuf,
    pub error_log_path: PathBuf,
}

/// Returned by a successful [`Registry::start`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub log_path: PathBuf,
    pub error_log_path: PathBuf,
}

/// How a process ended. `signal` is set when it was killed by one (unix).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitReport {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitReport {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        ExitReport {
            exit_code: status.code(),
            signal,
        }
    }
}

/// Status payload for monitoring collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<LifecycleState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Milliseconds since start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<LaunchConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log_path: Option<PathBuf>,
}

impl StatusPayload {
    fn stopped() -> Self {
        StatusPayload {
            running: false,
            state: None,
            pid: None,
            start_time: None,
            uptime: None,
            config: None,
            log_path: None,
            error_log_path: None,
        }
    }
}

type SharedStdin = Arc<AsyncMutex<Option<ChildStdin>>>;

#[derive(Clone)]
struct Entry {
    descriptor: Descriptor,
    state: LifecycleState,
    stdin: SharedStdin,
    exited: watch::Receiver<Option<ExitReport>>,
}

struct Inner {
    log_dir: PathBuf,
    archiver: Archiver,
    prober: Prober,
    events: EventBus,
    entries: Mutex<HashMap<String, Entry>>,
    configs: Mutex<HashMap<String, LaunchConfig>>,
    lifecycle_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Owned registry handle. Clones share the same state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("log_dir", &self.inner.log_dir)
            .field("instances", &self.names())
            .finish()
    }
}

impl Registry {
    /// Creates an empty registry writing logs, events and backups under `layout`.
    pub fn new(layout: &Layout) -> Self {
        Registry {
            inner: Arc::new(Inner {
                log_dir: layout.logs_dir(),
                archiver: Archiver::new(layout.backups_dir()),
                prober: Prober::new(),
                events: EventBus::new(Some(layout.events_path())),
                entries: Mutex::new(HashMap::new()),
                configs: Mutex::new(HashMap::new()),
                lifecycle_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Receives every lifecycle transition published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    pub fn prober(&self) -> &Prober {
        &self.inner.prober
    }

    /// Records `config` as the known configuration for `name`.
    pub fn remember(&self, name: &str, config: LaunchConfig) {
        lock(&self.inner.configs).insert(name.to_string(), config);
    }

    /// Last configuration known for `name`.
    pub fn config(&self, name: &str) -> Option<LaunchConfig> {
        lock(&self.inner.configs).get(name).cloned()
    }

    /// Registered instance names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.entries).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn descriptor(&self, name: &str) -> Option<Descriptor> {
        lock(&self.inner.entries)
            .get(name)
            .map(|entry| entry.descriptor.clone())
    }

    /// In-memory state; does not probe liveness (see [`Registry::status`]).
    pub fn state(&self, name: &str) -> LifecycleState {
        lock(&self.inner.entries)
            .get(name)
            .map(|entry| entry.state)
            .unwrap_or(LifecycleState::Stopped)
    }

    /// Launches `config` under `name`.
    pub async fn start(&self, name: &str, config: LaunchConfig) -> Result<StartReport> {
        let _guard = self.lifecycle_guard(name)?;

        if let Some(mut entry) = self.entry(name) {
            if self.inner.prober.is_alive(entry.descriptor.pid) {
                return Err(SupervisorError::AlreadyRunning(name.to_string()));
            }
            // Let the observer record the exit before the slot is reused.
            let _ = tokio::time::timeout(
                DRAIN_GRACE + Duration::from_secs(1),
                wait_for_exit(&mut entry.exited),
            )
            .await;
            self.reconcile_dead(&entry.descriptor);
        }

        self.remember(name, config.clone());
        self.publish(LifecycleEvent::new(name, LifecycleState::Starting));

        let plan = match launch::build(&config) {
            Ok(plan) => plan,
            Err(e) => {
                self.publish(LifecycleEvent::new(name, LifecycleState::Stopped));
                return Err(e.into());
            }
        };

        let mut sink = match LogSink::open(&self.inner.log_dir, name).await {
            Ok(sink) => sink,
            Err(e) => {
                self.publish(LifecycleEvent::new(name, LifecycleState::Stopped));
                return Err(SupervisorError::SpawnFailed(format!(
                    "failed to open run logs: {e}"
                )));
            }
        };
        let _ = sink
            .stdout
            .write_line(&format!("[keeper] launching: {}", plan.argv().join(" ")))
            .await;

        let mut child = match spawn(&plan) {
            Ok(child) => child,
            Err(e) => {
                let _ = sink
                    .stderr
                    .write_line(&format!("[keeper] spawn failed: {e}"))
                    .await;
                let _ = sink.close().await;
                self.publish(LifecycleEvent::new(name, LifecycleState::Stopped));
                return Err(SupervisorError::SpawnFailed(e.to_string()));
            }
        };

        // From here on the child must end up registered: no await until the
        // exit observer owns it.
        let Some(pid) = child.id() else {
            let _ = sink.close().await;
            self.publish(LifecycleEvent::new(name, LifecycleState::Stopped));
            return Err(SupervisorError::SpawnFailed(
                "process exited before its pid could be read".to_string(),
            ));
        };
        let start_time = Utc::now();
        let (exit_tx, exit_rx) = watch::channel(None);
        let stdin: SharedStdin = Arc::new(AsyncMutex::new(child.stdin.take()));
        let descriptor = Descriptor {
            name: name.to_string(),
            run_id: sink.run_id.clone(),
            pid,
            start_time,
            config,
            log_path: sink.stdout.path().to_path_buf(),
            error_log_path: sink.stderr.path().to_path_buf(),
        };

        lock(&self.inner.entries).insert(
            name.to_string(),
            Entry {
                descriptor: descriptor.clone(),
                state: LifecycleState::Starting,
                stdin,
                exited: exit_rx,
            },
        );
        tokio::spawn(observe_exit(
            Arc::clone(&self.inner),
            descriptor.clone(),
            child,
            sink,
            exit_tx,
        ));

        self.set_state(&descriptor, LifecycleState::Running);
        self.publish(
            LifecycleEvent::new(name, LifecycleState::Running).with_process(pid, start_time),
        );
        info!(instance = name, pid, "instance started");

        Ok(StartReport {
            pid,
            start_time,
            log_path: descriptor.log_path,
            error_log_path: descriptor.error_log_path,
        })
    }

    /// Asks `name` to shut down and waits up to `timeout` for it to exit.
    /// The timeout covers delivering the shutdown message too.
    ///
    /// Never escalates: on timeout the process keeps running, is reported as
    /// `Running` again, and the caller decides whether to [`Registry::kill`] it.
    pub async fn stop(&self, name: &str, timeout: Duration) -> Result<ExitReport> {
        let _guard = self.lifecycle_guard(name)?;
        let Entry {
            descriptor,
            stdin,
            mut exited,
            ..
        } = self.live_entry(name)?;
        let deadline = tokio::time::Instant::now() + timeout;

        self.set_state(&descriptor, LifecycleState::Stopping);
        self.publish(
            LifecycleEvent::new(name, LifecycleState::Stopping)
                .with_process(descriptor.pid, descriptor.start_time),
        );

        match tokio::time::timeout_at(deadline, write_console_line(&stdin, SHUTDOWN_COMMAND)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                if self.inner.prober.is_alive(descriptor.pid) {
                    self.resume_running(&descriptor);
                    return Err(SupervisorError::ShutdownMessageFailed {
                        name: name.to_string(),
                        source,
                    });
                }
                // Console already closed because the process is exiting anyway.
                warn!(instance = name, "console closed before shutdown message: {source}");
            }
            Err(_) => {
                warn!(instance = name, "console did not accept the shutdown message in time");
                self.resume_running(&descriptor);
                return Err(SupervisorError::StopTimedOut {
                    name: name.to_string(),
                    timeout,
                });
            }
        }

        match tokio::time::timeout_at(deadline, wait_for_exit(&mut exited)).await {
            Ok(report) => Ok(report),
            Err(_) => {
                self.resume_running(&descriptor);
                Err(SupervisorError::StopTimedOut {
                    name: name.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Sends `signal` to the instance's process tree and returns at once.
    /// Cleanup happens when the exit observer fires.
    pub fn kill(&self, name: &str, signal: KillSignal) -> Result<()> {
        let _guard = self.lifecycle_guard(name)?;
        let Entry {
            descriptor,
            state: previous,
            ..
        } = self.live_entry(name)?;

        self.set_state(&descriptor, LifecycleState::Stopping);
        self.publish(
            LifecycleEvent::new(name, LifecycleState::Stopping)
                .with_process(descriptor.pid, descriptor.start_time),
        );

        if let Err(reason) = signal::signal_tree(&self.inner.prober, descriptor.pid, signal) {
            self.set_state(&descriptor, previous);
            return Err(SupervisorError::SignalFailed {
                name: name.to_string(),
                reason,
            });
        }
        info!(instance = name, pid = descriptor.pid, %signal, "signal sent to process tree");
        Ok(())
    }

    /// Writes `text` plus a newline to the server console. Gives up after
    /// a few seconds when the server is not reading its input.
    pub async fn send_command(&self, name: &str, text: &str) -> Result<()> {
        let stdin = {
            let entries = lock(&self.inner.entries);
            match entries.get(name) {
                Some(entry) if entry.state == LifecycleState::Running => Arc::clone(&entry.stdin),
                _ => return Err(SupervisorError::NotRunning(name.to_string())),
            }
        };
        let written = match tokio::time::timeout(
            COMMAND_WRITE_TIMEOUT,
            write_console_line(&stdin, text),
        )
        .await
        {
            Ok(written) => written,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "console input did not accept the command in time",
            )),
        };
        written.map_err(|source| SupervisorError::CommandFailed {
            name: name.to_string(),
            source,
        })
    }

    /// Re-probes liveness and reports the instance. A dead pid reports as
    /// stopped; its descriptor is left for the exit observer to clear unless
    /// the observer is gone.
    pub fn status(&self, name: &str) -> StatusPayload {
        let Some(Entry {
            descriptor,
            state,
            exited,
            ..
        }) = self.entry(name)
        else {
            return StatusPayload::stopped();
        };
        if !self.inner.prober.is_alive(descriptor.pid) {
            if observer_gone(&exited) {
                self.reconcile_dead(&descriptor);
            }
            return StatusPayload::stopped();
        }

        let uptime = (Utc::now() - descriptor.start_time)
            .num_milliseconds()
            .max(0) as u64;
        StatusPayload {
            running: true,
            state: Some(state),
            pid: Some(descriptor.pid),
            start_time: Some(descriptor.start_time),
            uptime: Some(uptime),
            config: Some(descriptor.config),
            log_path: Some(descriptor.log_path),
            error_log_path: Some(descriptor.error_log_path),
        }
    }

    /// Graceful stop followed by a start with the same configuration.
    pub async fn restart(&self, name: &str, timeout: Duration) -> Result<StartReport> {
        let config = self
            .descriptor(name)
            .map(|descriptor| descriptor.config)
            .ok_or_else(|| SupervisorError::NotRunning(name.to_string()))?;
        self.stop(name, timeout).await?;
        self.start(name, config).await
    }

    /// Stops every registered instance. Timeouts are reported, not escalated.
    pub async fn shutdown_all(&self, timeout: Duration) -> Vec<(String, Result<ExitReport>)> {
        let mut outcomes = Vec::new();
        for name in self.names() {
            let outcome = self.stop(&name, timeout).await;
            outcomes.push((name, outcome));
        }
        outcomes
    }

    /// Last `lines` lines of the current (or most recent) run's stdout log.
    pub fn tail_logs(&self, name: &str, lines: usize) -> io::Result<Vec<String>> {
        let path = match self.descriptor(name) {
            Some(descriptor) => Some(descriptor.log_path),
            None => log_sink::latest_run_log(&self.inner.log_dir, name)?,
        };
        match path {
            Some(path) => log_sink::tail(&path, lines),
            None => Ok(Vec::new()),
        }
    }

    /// Snapshots the known config's data directory. The instance does not
    /// need to be running.
    pub async fn backup(&self, name: &str) -> Result<BackupReport> {
        let config = self
            .config(name)
            .ok_or_else(|| SupervisorError::NotRegistered(name.to_string()))?;
        let archiver = self.inner.archiver.clone();
        let name = name.to_string();
        let report = tokio::task::spawn_blocking(move || archiver.snapshot(&name, &config))
            .await
            .map_err(|e| io::Error::other(format!("backup task failed: {e}")))??;
        Ok(report)
    }

    pub fn list_backups(&self, name: &str) -> io::Result<Vec<PathBuf>> {
        self.inner.archiver.list(name)
    }

    /// Host figures plus stats for every live instance.
    pub fn host_stats(&self) -> HostStats {
        let instances: Vec<(String, u32)> = lock(&self.inner.entries)
            .values()
            .map(|entry| (entry.descriptor.name.clone(), entry.descriptor.pid))
            .collect();
        stats::collect(&self.inner.prober, &instances)
    }

    fn lifecycle_guard(&self, name: &str) -> Result<OwnedMutexGuard<()>> {
        let lifecycle = Arc::clone(
            lock(&self.inner.lifecycle_locks)
                .entry(name.to_string())
                .or_default(),
        );
        lifecycle
            .try_lock_owned()
            .map_err(|_| SupervisorError::OperationInProgress(name.to_string()))
    }

    fn entry(&self, name: &str) -> Option<Entry> {
        lock(&self.inner.entries).get(name).cloned()
    }

    /// Snapshot of a registered instance whose pid is still alive.
    fn live_entry(&self, name: &str) -> Result<Entry> {
        let Some(entry) = self.entry(name) else {
            return Err(SupervisorError::NotRunning(name.to_string()));
        };
        if !self.inner.prober.is_alive(entry.descriptor.pid) {
            if observer_gone(&entry.exited) {
                self.reconcile_dead(&entry.descriptor);
            }
            return Err(SupervisorError::NotRunning(name.to_string()));
        }
        Ok(entry)
    }

    fn set_state(&self, descriptor: &Descriptor, state: LifecycleState) {
        if let Some(entry) = lock(&self.inner.entries).get_mut(&descriptor.name) {
            if entry.descriptor.run_id == descriptor.run_id {
                entry.state = state;
            }
        }
    }

    /// Puts a run that is still registered back to `Running`.
    fn resume_running(&self, descriptor: &Descriptor) {
        let resumed = match lock(&self.inner.entries).get_mut(&descriptor.name) {
            Some(entry) if entry.descriptor.run_id == descriptor.run_id => {
                entry.state = LifecycleState::Running;
                true
            }
            _ => false,
        };
        if resumed {
            self.publish(
                LifecycleEvent::new(&descriptor.name, LifecycleState::Running)
                    .with_process(descriptor.pid, descriptor.start_time),
            );
        }
    }

    /// Drops a descriptor whose process is gone, without exit details.
    fn reconcile_dead(&self, descriptor: &Descriptor) {
        if self.inner.purge(descriptor) {
            warn!(
                instance = %descriptor.name,
                pid = descriptor.pid,
                "process is no longer alive; cleared stale descriptor"
            );
            self.publish(LifecycleEvent::new(
                &descriptor.name,
                LifecycleState::Stopped,
            ));
        }
    }

    fn publish(&self, event: LifecycleEvent) {
        self.inner.events.publish(event);
    }
}

impl Inner {
    /// Removes the entry for `descriptor`'s run. Returns whether this call
    /// removed it, so cleanup side effects run exactly once.
    fn purge(&self, descriptor: &Descriptor) -> bool {
        let mut entries = lock(&self.entries);
        match entries.get(&descriptor.name) {
            Some(entry) if entry.descriptor.run_id == descriptor.run_id => {
                entries.remove(&descriptor.name);
                true
            }
            _ => false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn(plan: &LaunchPlan) -> io::Result<Child> {
    let mut command = Command::new(&plan.program);
    command
        .args(&plan.args)
        .current_dir(&plan.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);
    // Own process group so a kill reaches helpers the server forks.
    #[cfg(unix)]
    command.process_group(0);
    command.spawn()
}

async fn write_console_line(stdin: &SharedStdin, text: &str) -> io::Result<()> {
    let mut guard = stdin.lock().await;
    let Some(stdin) = guard.as_mut() else {
        return Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "console input is closed",
        ));
    };
    stdin.write_all(format!("{text}\n").as_bytes()).await?;
    stdin.flush().await
}

/// True once the exit observer has finished or vanished, so nothing else
/// will clear its descriptor.
fn observer_gone(exited: &watch::Receiver<Option<ExitReport>>) -> bool {
    exited.has_changed().is_err() || exited.borrow().is_some()
}

async fn wait_for_exit(exited: &mut watch::Receiver<Option<ExitReport>>) -> ExitReport {
    match exited.wait_for(Option::is_some).await {
        Ok(report) => (*report).unwrap_or_default(),
        // Observer dropped its sender without reporting; nothing left to wait on.
        Err(_) => ExitReport::default(),
    }
}

/// Copies one output stream into its log until end-of-stream. Keeps reading
/// even when the log write fails so the child is never back-pressured.
async fn drain<R>(reader: R, writer: Arc<AsyncMutex<LogWriter>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut write_failed = false;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if let Err(e) = writer.lock().await.write_line(line).await {
                    if !write_failed {
                        warn!("dropping output, log write failed: {e}");
                        write_failed = true;
                    }
                }
            }
            Err(e) => {
                warn!("output stream read failed: {e}");
                break;
            }
        }
    }
}

/// The exit observer: waits for the OS to report termination and for both
/// streams to finish, records the exit, closes the logs, then removes the
/// descriptor and wakes any pending `stop`.
async fn observe_exit(
    inner: Arc<Inner>,
    descriptor: Descriptor,
    mut child: Child,
    sink: LogSink,
    exit_tx: watch::Sender<Option<ExitReport>>,
) {
    let LogSink { stdout, stderr, .. } = sink;
    let stdout_log = Arc::new(AsyncMutex::new(stdout));
    let stderr_log = Arc::new(AsyncMutex::new(stderr));

    let mut drains = Vec::new();
    if let Some(pipe) = child.stdout.take() {
        drains.push(tokio::spawn(drain(pipe, Arc::clone(&stdout_log))));
    }
    if let Some(pipe) = child.stderr.take() {
        drains.push(tokio::spawn(drain(pipe, Arc::clone(&stderr_log))));
    }

    let report = match child.wait().await {
        Ok(status) => ExitReport::from_status(status),
        Err(e) => {
            error!(instance = %descriptor.name, pid = descriptor.pid, "child wait failed: {e}");
            ExitReport::default()
        }
    };

    for handle in drains {
        let abort = handle.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, handle).await.is_err() {
            warn!(
                instance = %descriptor.name,
                "output still open {DRAIN_GRACE:?} after exit; detaching drain"
            );
            abort.abort();
        }
    }

    {
        let mut stdout = stdout_log.lock().await;
        let _ = stdout
            .write_line(&format!(
                "[keeper] process {} exited: code={} signal={}",
                descriptor.pid,
                report
                    .exit_code
                    .map_or_else(|| "none".to_string(), |c| c.to_string()),
                report
                    .signal
                    .map_or_else(|| "none".to_string(), |s| s.to_string()),
            ))
            .await;
        if let Err(e) = stdout.close().await {
            warn!("failed to close {}: {e}", stdout.path().display());
        }
    }
    if let Err(e) = stderr_log.lock().await.close().await {
        warn!(instance = %descriptor.name, "failed to close error log: {e}");
    }

    if inner.purge(&descriptor) {
        inner.events.publish(
            LifecycleEvent::new(&descriptor.name, LifecycleState::Stopped)
                .with_exit(report.exit_code, report.signal),
        );
    }
    info!(
        instance = %descriptor.name,
        pid = descriptor.pid,
        exit_code = ?report.exit_code,
        signal = ?report.signal,
        "instance exited"
    );
    exit_tx.send_replace(Some(report));
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;

    /// Reads console lines, echoing them, and exits cleanly on `stop`.
    const CONSOLE_SCRIPT: &str = r#"echo "Starting minecraft server"
while read line; do
  echo "got $line"
  if [ "$line" = "stop" ]; then exit 0; fi
done
"#;

    struct Fixture {
        tmp: tempfile::TempDir,
        registry: Registry,
        config: LaunchConfig,
    }

    /// A registry whose "java" is a shell script running `body`.
    fn fixture(body: &str) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("server.jar"), b"placeholder").unwrap();

        let java = tmp.path().join("fake-java");
        fs::write(&java, format!("#!/bin/sh\n{body}")).unwrap();
        fs::set_permissions(&java, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = LaunchConfig::new("server.jar", &data);
        config.java_path = java.to_string_lossy().to_string();
        let registry = Registry::new(&Layout::new(tmp.path().join("home")));
        Fixture {
            tmp,
            registry,
            config,
        }
    }

    async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        check()
    }

    async fn force_stop(registry: &Registry, name: &str) {
        let _ = registry.kill(name, KillSignal::Kill);
        eventually(|| !registry.status(name).running).await;
    }

    #[tokio::test]
    async fn missing_executable_fails_and_stays_stopped() {
        let fx = fixture(CONSOLE_SCRIPT);
        let mut config = fx.config.clone();
        config.jar_or_binary = "missing.jar".to_string();

        let err = fx.registry.start("primary", config).await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Config(crate::error::ConfigError::ExecutableNotFound(_))
        ));
        assert_eq!(fx.registry.state("primary"), LifecycleState::Stopped);
        assert!(!fx.registry.status("primary").running);
    }

    #[tokio::test]
    async fn status_reports_the_started_pid() {
        let fx = fixture(CONSOLE_SCRIPT);
        let report = fx.registry.start("primary", fx.config.clone()).await.unwrap();

        let status = fx.registry.status("primary");
        assert!(status.running);
        assert_eq!(status.pid, Some(report.pid));
        assert_eq!(status.state, Some(LifecycleState::Running));
        assert_eq!(status.log_path.as_deref(), Some(report.log_path.as_path()));
        assert!(report.log_path.exists());
        assert!(report.error_log_path.exists());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["running"], true);
        assert!(json["startTime"].is_string());
        assert!(json["errorLogPath"].is_string());

        force_stop(&fx.registry, "primary").await;
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_alive() {
        let fx = fixture(CONSOLE_SCRIPT);
        let first = fx.registry.start("primary", fx.config.clone()).await.unwrap();

        let err = fx
            .registry
            .start("primary", fx.config.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning(_)));
        assert_eq!(fx.registry.status("primary").pid, Some(first.pid));

        force_stop(&fx.registry, "primary").await;
    }

    #[tokio::test]
    async fn graceful_stop_returns_exit_code() {
        let fx = fixture(CONSOLE_SCRIPT);
        fx.registry.start("primary", fx.config.clone()).await.unwrap();

        let report = fx
            .registry
            .stop("primary", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.signal, None);
        assert!(!fx.registry.status("primary").running);
        assert!(fx.registry.descriptor("primary").is_none());

        let lines = fx.registry.tail_logs("primary", 50).unwrap();
        assert!(lines.iter().any(|l| l.ends_with("] got stop")));
        assert!(lines.iter().any(|l| l.contains("exited: code=0")));
    }

    #[tokio::test]
    async fn concurrent_stop_is_rejected_and_later_stop_finds_nothing() {
        let fx = fixture(CONSOLE_SCRIPT);
        fx.registry.start("primary", fx.config.clone()).await.unwrap();

        let timeout = Duration::from_secs(10);
        let (first, second) = tokio::join!(
            fx.registry.stop("primary", timeout),
            fx.registry.stop("primary", timeout)
        );
        assert!(first.is_ok());
        assert!(matches!(
            second,
            Err(SupervisorError::OperationInProgress(_))
        ));

        let third = fx.registry.stop("primary", timeout).await;
        assert!(matches!(third, Err(SupervisorError::NotRunning(_))));
    }

    #[tokio::test]
    async fn stop_times_out_without_escalating() {
        let fx = fixture("exec sleep 30\n");
        let started = fx.registry.start("primary", fx.config.clone()).await.unwrap();

        let err = fx
            .registry
            .stop("primary", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::StopTimedOut { .. }));
        assert_eq!(fx.registry.state("primary"), LifecycleState::Running);
        assert_eq!(
            fx.registry.status("primary").state,
            Some(LifecycleState::Running)
        );
        assert!(fx.registry.prober().is_alive(started.pid));

        force_stop(&fx.registry, "primary").await;
    }

    #[tokio::test]
    async fn stop_deadline_covers_a_blocked_console() {
        let fx = fixture("exec sleep 30\n");
        fx.registry.start("primary", fx.config.clone()).await.unwrap();

        // Larger than a pipe buffer: the write parks holding the console lock.
        let registry = fx.registry.clone();
        let pending = tokio::spawn(async move {
            registry.send_command("primary", &"a".repeat(200_000)).await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let begun = Instant::now();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            fx.registry.stop("primary", Duration::from_millis(500)),
        )
        .await
        .expect("stop must honour its own timeout")
        .unwrap_err();
        assert!(matches!(err, SupervisorError::StopTimedOut { .. }));
        assert!(begun.elapsed() < Duration::from_secs(3));
        assert_eq!(fx.registry.state("primary"), LifecycleState::Running);

        fx.registry.kill("primary", KillSignal::Kill).unwrap();
        assert!(pending.await.unwrap().is_err());
        assert!(eventually(|| !fx.registry.status("primary").running).await);
    }

    #[tokio::test]
    async fn console_commands_reach_the_process() {
        let fx = fixture(CONSOLE_SCRIPT);
        fx.registry.start("primary", fx.config.clone()).await.unwrap();

        fx.registry.send_command("primary", "say hello").await.unwrap();
        let seen = eventually(|| {
            fx.registry
                .tail_logs("primary", 50)
                .unwrap()
                .iter()
                .any(|l| l.ends_with("] got say hello"))
        })
        .await;
        assert!(seen);

        fx.registry
            .stop("primary", Duration::from_secs(10))
            .await
            .unwrap();
        let err = fx
            .registry
            .send_command("primary", "list")
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning(_)));
    }

    #[tokio::test]
    async fn out_of_band_death_is_reconciled() {
        let fx = fixture(CONSOLE_SCRIPT);
        let report = fx.registry.start("primary", fx.config.clone()).await.unwrap();

        nix::sys::signal::killpg(
            nix::unistd::Pid::from_raw(report.pid as i32),
            nix::sys::signal::Signal::SIGKILL,
        )
        .unwrap();

        assert!(eventually(|| !fx.registry.status("primary").running).await);
        assert!(eventually(|| fx.registry.state("primary") == LifecycleState::Stopped).await);
        let restarted = fx.registry.start("primary", fx.config.clone()).await.unwrap();
        assert_ne!(restarted.pid, report.pid);

        force_stop(&fx.registry, "primary").await;
    }

    #[tokio::test]
    async fn polling_status_keeps_exit_details_of_a_killed_process() {
        let fx = fixture(CONSOLE_SCRIPT);
        let mut events = fx.registry.subscribe();
        let report = fx.registry.start("primary", fx.config.clone()).await.unwrap();

        nix::sys::signal::killpg(
            nix::unistd::Pid::from_raw(report.pid as i32),
            nix::sys::signal::Signal::SIGKILL,
        )
        .unwrap();
        while fx.registry.status("primary").running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for _ in 0..20 {
            let _ = fx.registry.status("primary");
            tokio::task::yield_now().await;
        }

        let stopped = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = events.recv().await.unwrap();
                if event.status == LifecycleState::Stopped {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(stopped.signal, Some(9));
        assert_eq!(stopped.exit_code, None);
    }

    #[tokio::test]
    async fn optimized_launch_runs_briefly_and_logs_timestamped_output() {
        let fx = fixture("echo \"Done! For help, type help\"\nsleep 2\n");
        let mut config = fx.config.clone();
        config.min_memory = "1G".to_string();
        config.max_memory = "2G".to_string();
        config.use_optimized_flags = true;

        let report = fx.registry.start("primary", config).await.unwrap();
        let status = fx.registry.status("primary");
        assert!(status.running);
        assert_eq!(status.pid, Some(report.pid));

        assert!(eventually(|| !fx.registry.status("primary").running).await);
        assert!(
            eventually(|| log_sink::tail(&report.log_path, 50)
                .unwrap()
                .iter()
                .any(|l| l.starts_with('[') && l.ends_with("] Done! For help, type help")))
            .await
        );
        let launched = log_sink::tail(&report.log_path, 50).unwrap();
        assert!(launched
            .iter()
            .any(|l| l.contains("-Xms1G -Xmx2G") && l.contains("-XX:+UseG1GC")));
    }

    #[tokio::test]
    async fn short_lived_process_is_captured_and_cleaned_up() {
        let fx = fixture("echo \"Starting minecraft server\"\nsleep 1\necho \"oops\" >&2\nexit 3\n");
        let mut events = fx.registry.subscribe();
        let report = fx.registry.start("primary", fx.config.clone()).await.unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = events.recv().await.unwrap();
                if event.status == LifecycleState::Stopped {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(stopped.exit_code, Some(3));
        assert!(!fx.registry.status("primary").running);

        let out = fx.registry.tail_logs("primary", 50).unwrap();
        assert!(out
            .iter()
            .any(|l| l.starts_with('[') && l.ends_with("] Starting minecraft server")));
        assert_eq!(
            log_sink::latest_run_log(&fx.tmp.path().join("home/logs"), "primary").unwrap(),
            Some(report.log_path)
        );
        let err_lines = log_sink::tail(&report.error_log_path, 10).unwrap();
        assert!(err_lines.iter().any(|l| l.ends_with("] oops")));
    }

    #[tokio::test]
    async fn kill_reaches_forked_children() {
        let fx = fixture("sleep 60 &\necho $! > child.pid\nwait\n");
        fx.registry.start("primary", fx.config.clone()).await.unwrap();

        let pid_file = fx.config.working_dir.join("child.pid");
        assert!(
            eventually(|| fs::read_to_string(&pid_file)
                .map(|s| s.trim().parse::<u32>().is_ok())
                .unwrap_or(false))
            .await
        );
        let child: u32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        assert!(fx.registry.prober().is_alive(child));

        fx.registry.kill("primary", KillSignal::Kill).unwrap();

        assert!(eventually(|| !fx.registry.status("primary").running).await);
        assert!(eventually(|| !fx.registry.prober().is_alive(child)).await);
    }

    #[tokio::test]
    async fn subscribers_see_starting_then_running() {
        let fx = fixture(CONSOLE_SCRIPT);
        let mut events = fx.registry.subscribe();
        let report = fx.registry.start("primary", fx.config.clone()).await.unwrap();

        let starting = events.recv().await.unwrap();
        assert_eq!(starting.status, LifecycleState::Starting);
        let running = events.recv().await.unwrap();
        assert_eq!(running.status, LifecycleState::Running);
        assert_eq!(running.pid, Some(report.pid));
        assert_eq!(running.start_time, Some(report.start_time));

        force_stop(&fx.registry, "primary").await;
    }

    #[tokio::test]
    async fn restart_replaces_the_process() {
        let fx = fixture(CONSOLE_SCRIPT);
        let first = fx.registry.start("primary", fx.config.clone()).await.unwrap();

        let second = fx
            .registry
            .restart("primary", Duration::from_secs(10))
            .await
            .unwrap();
        assert_ne!(first.pid, second.pid);
        assert_ne!(first.log_path, second.log_path);
        assert_eq!(fx.registry.status("primary").pid, Some(second.pid));

        let outcomes = fx.registry.shutdown_all(Duration::from_secs(10)).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].1.is_ok());
    }

    #[tokio::test]
    async fn backup_requires_a_known_config() {
        let fx = fixture(CONSOLE_SCRIPT);
        let err = fx.registry.backup("primary").await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotRegistered(_)));

        fs::write(fx.config.working_dir.join("server.properties"), "motd=hi\n").unwrap();
        fx.registry.remember("primary", fx.config.clone());
        let report = fx.registry.backup("primary").await.unwrap();

        assert_eq!(report.files_included, vec!["server.properties".to_string()]);
        assert_eq!(fx.registry.list_backups("primary").unwrap(), vec![report.path]);
    }

    #[tokio::test]
    async fn host_stats_cover_live_instances() {
        let fx = fixture(CONSOLE_SCRIPT);
        let report = fx.registry.start("primary", fx.config.clone()).await.unwrap();

        let stats = fx.registry.host_stats();
        assert_eq!(stats.instances.len(), 1);
        assert_eq!(stats.instances[0].name, "primary");
        assert_eq!(stats.instances[0].process.pid, report.pid);

        force_stop(&fx.registry, "primary").await;
    }
}
