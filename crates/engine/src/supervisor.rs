//! Process supervisor for external trading-bot instances.
//!
//! The supervisor owns a concurrency-safe slot table keyed by entity id and
//! enforces at most one live OS process per entity. It is constructed once
//! at startup and shared via `Arc`; every caller goes through [`start`],
//! [`stop`], and [`status`] — nothing else mutates the table.
//!
//! [`start`]: Supervisor::start
//! [`stop`]: Supervisor::stop
//! [`status`]: Supervisor::status

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Notify, RwLock};

use gridpilot_core::artifact;
use gridpilot_core::error::CoreError;
use gridpilot_core::types::{EntityId, ExitReason, ProcessState};
use gridpilot_events::{ScopeKey, StatusHub, StreamEvent};

/// Bounded wait after SIGTERM before escalating to SIGKILL.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// SpawnSpec / SupervisorConfig
// ---------------------------------------------------------------------------

/// Everything needed to launch one bot process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Executable to launch (e.g. the python interpreter).
    pub program: PathBuf,
    /// Leading arguments (e.g. the bot entry script). The supervisor
    /// appends `--config <artifact>` after materializing the config.
    pub args: Vec<String>,
    /// Fixed working directory for the child.
    pub working_dir: PathBuf,
    /// Config payload written to the per-entity spawn artifact.
    pub config: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory for per-entity config artifacts.
    pub artifact_dir: PathBuf,
    /// Grace period between SIGTERM and SIGKILL on stop.
    pub grace_period: Duration,
}

impl SupervisorConfig {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// One entry in the slot table; exists only while the entity has a live
/// (or starting) process.
struct ProcessSlot {
    pid: Option<u32>,
    state: ProcessState,
    /// Notified by the exit monitor after the slot has been cleared.
    exited: Arc<Notify>,
}

pub struct Supervisor {
    slots: Arc<RwLock<HashMap<EntityId, ProcessSlot>>>,
    /// Last recorded exit per entity, for `status` reads after the slot
    /// has been released.
    exits: Arc<RwLock<HashMap<EntityId, ExitReason>>>,
    hub: Arc<StatusHub>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(hub: Arc<StatusHub>, config: SupervisorConfig) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            exits: Arc::new(RwLock::new(HashMap::new())),
            hub,
            config,
        }
    }

    /// Start the external process for `entity_id`.
    ///
    /// Fails with [`CoreError::AlreadyRunning`] if the entity currently
    /// holds a slot in a live state. The slot is reserved (Starting) under
    /// the table lock *before* any I/O, so concurrent starts for the same
    /// entity cannot both proceed. Spawn failures release the reservation
    /// and are returned synchronously; mid-run crashes are detected by the
    /// exit monitor instead.
    pub async fn start(&self, entity_id: &str, spec: SpawnSpec) -> Result<(), CoreError> {
        // Reserve the slot.
        {
            let mut slots = self.slots.write().await;
            if let Some(slot) = slots.get(entity_id) {
                if slot.state.blocks_start() {
                    return Err(CoreError::AlreadyRunning {
                        entity_id: entity_id.to_string(),
                    });
                }
            }
            slots.insert(
                entity_id.to_string(),
                ProcessSlot {
                    pid: None,
                    state: ProcessState::Starting,
                    exited: Arc::new(Notify::new()),
                },
            );
        }

        match self.spawn_and_monitor(entity_id, spec).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Never leave a reserved slot behind on a synchronous
                // failure, and wake any stop that is already waiting on it.
                if let Some(slot) = self.slots.write().await.remove(entity_id) {
                    slot.exited.notify_waiters();
                }
                Err(e)
            }
        }
    }

    async fn spawn_and_monitor(&self, entity_id: &str, spec: SpawnSpec) -> Result<(), CoreError> {
        let artifact_path =
            artifact::write_config_artifact(&self.config.artifact_dir, entity_id, &spec.config)
                .await?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .arg("--config")
            .arg(&artifact_path)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| CoreError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;

        let pid = child.id();
        let scope = ScopeKey::InstanceLogs(entity_id.to_string());

        // The OS confirmed the process; expose it as Running. If a stop
        // request arrived while we were still spawning, honor it now that
        // there is a pid to signal.
        let mut stop_requested = false;
        {
            let mut slots = self.slots.write().await;
            if let Some(slot) = slots.get_mut(entity_id) {
                slot.pid = pid;
                if slot.state == ProcessState::Stopping {
                    stop_requested = true;
                } else {
                    slot.state = ProcessState::Running;
                }
            }
        }
        self.exits.write().await.remove(entity_id);
        if stop_requested {
            if let Some(pid) = pid {
                signal(pid, libc::SIGTERM);
            }
        }

        tracing::info!(entity_id, pid, "Instance process started");
        self.hub
            .publish(
                &scope,
                StreamEvent::new(
                    "state",
                    serde_json::json!({ "state": ProcessState::Running, "pid": pid }),
                ),
            )
            .await;

        // Log pumps: captured output lines fan out to the instance scope.
        // The monitor drains these before closing the scope so trailing
        // output is not lost.
        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_lines(
                stdout,
                Arc::clone(&self.hub),
                scope.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_lines(
                stderr,
                Arc::clone(&self.hub),
                scope.clone(),
            )));
        }

        // Exit monitor: blocks on process exit, then unconditionally clears
        // the slot so a dead process can never wedge future starts.
        let slots = Arc::clone(&self.slots);
        let exits = Arc::clone(&self.exits);
        let hub = Arc::clone(&self.hub);
        let entity = entity_id.to_string();
        tokio::spawn(async move {
            let status = child.wait().await;
            for pump in pumps {
                let _ = pump.await;
            }

            let reason = {
                let mut slots = slots.write().await;
                let was_stopping = slots
                    .get(&entity)
                    .is_some_and(|s| s.state == ProcessState::Stopping);
                let slot = slots.remove(&entity);

                // A termination we asked for is a clean stop regardless of
                // how the process died.
                let reason = match (&status, was_stopping) {
                    (_, true) => ExitReason::Clean,
                    (Ok(st), false) if st.success() => ExitReason::Clean,
                    (Ok(st), false) => ExitReason::Error { code: st.code() },
                    (Err(_), false) => ExitReason::Error { code: None },
                };

                match slot {
                    Some(slot) => {
                        exits.write().await.insert(entity.clone(), reason);
                        slot.exited.notify_waiters();
                    }
                    // Slot already force-released by `stop`; keep the reason
                    // it recorded.
                    None => {
                        exits.write().await.entry(entity.clone()).or_insert(reason);
                    }
                }
                reason
            };

            match reason {
                ExitReason::Clean => tracing::info!(entity_id = %entity, "Instance exited cleanly"),
                ExitReason::Error { code } => {
                    tracing::warn!(entity_id = %entity, ?code, "Instance exited with error")
                }
            }

            hub.publish(
                &scope,
                StreamEvent::new(
                    "state",
                    serde_json::json!({ "state": reason.final_state(), "exit": reason }),
                ),
            )
            .await;
            // The process is confirmed gone; end all log subscriptions.
            hub.close(&scope).await;
        });

        Ok(())
    }

    /// Stop the entity's process: SIGTERM, bounded grace wait, then SIGKILL.
    ///
    /// Idempotent — stopping an entity with no live process is a no-op
    /// success. Always returns with the slot released.
    pub async fn stop(&self, entity_id: &str) -> Result<(), CoreError> {
        let exited = {
            let mut slots = self.slots.write().await;
            match slots.get_mut(entity_id) {
                None => return Ok(()),
                Some(slot) => {
                    slot.state = ProcessState::Stopping;
                    Arc::clone(&slot.exited)
                }
            }
        };

        tracing::info!(entity_id, "Stopping instance");

        // Graceful phase. The pid is re-read inside the wait rather than
        // snapshotted here: a stop racing an in-flight spawn sees no pid
        // yet, and the spawn path signals SIGTERM itself once the pid lands
        // and finds the slot marked Stopping.
        if self.signal_and_await_exit(entity_id, &exited, libc::SIGTERM).await.0 {
            return Ok(());
        }

        // Escalation. SIGKILL must go to the *current* pid, and the slot is
        // only ever force-released after a kill was actually delivered; with
        // no pid to kill yet, keep waiting for the spawn path to land one or
        // to fail and release the slot itself.
        loop {
            tracing::warn!(entity_id, "Grace period elapsed; sending SIGKILL");
            let (exited_now, pid) = self
                .signal_and_await_exit(entity_id, &exited, libc::SIGKILL)
                .await;
            if exited_now {
                return Ok(());
            }
            if pid.is_some() {
                // The monitor should have reaped a SIGKILLed child by now;
                // release the slot regardless so restarts are never blocked.
                tracing::error!(entity_id, "Exit monitor did not confirm kill; forcing slot release");
                if let Some(slot) = self.slots.write().await.remove(entity_id) {
                    slot.exited.notify_waiters();
                }
                self.exits
                    .write()
                    .await
                    .insert(entity_id.to_string(), ExitReason::Clean);
                return Ok(());
            }
        }
    }

    /// Send `sig` to the entity's current process (if it has a pid yet) and
    /// wait up to the grace period for the exit monitor to clear the slot.
    ///
    /// The exit notification is registered before the slot is re-read, so a
    /// monitor that clears the slot in between is never missed. Returns
    /// whether the slot is gone, plus the pid the signal was sent to.
    async fn signal_and_await_exit(
        &self,
        entity_id: &str,
        exited: &Arc<Notify>,
        sig: libc::c_int,
    ) -> (bool, Option<u32>) {
        let notified = exited.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let pid = match self.slots.read().await.get(entity_id) {
            None => return (true, None),
            Some(slot) => slot.pid,
        };
        if let Some(pid) = pid {
            signal(pid, sig);
        }

        let exited_now = tokio::time::timeout(self.config.grace_period, notified)
            .await
            .is_ok()
            || !self.slots.read().await.contains_key(entity_id);
        (exited_now, pid)
    }

    /// Current lifecycle state of an entity. Non-mutating.
    ///
    /// The slot table is the primary source of truth; for a Running slot
    /// the OS process table is probed as a fallback so a process that died
    /// moments ago is not reported alive while the monitor catches up.
    pub async fn status(&self, entity_id: &str) -> ProcessState {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(entity_id) {
                if slot.state == ProcessState::Running {
                    if let Some(pid) = slot.pid {
                        if !process_alive(pid) {
                            return self.exited_state(entity_id).await.unwrap_or(ProcessState::Failed);
                        }
                    }
                }
                return slot.state;
            }
        }
        self.exited_state(entity_id).await.unwrap_or(ProcessState::Stopped)
    }

    async fn exited_state(&self, entity_id: &str) -> Option<ProcessState> {
        self.exits
            .read()
            .await
            .get(entity_id)
            .map(|r| r.final_state())
    }

    /// Last recorded exit reason, if the entity has exited at least once.
    pub async fn last_exit(&self, entity_id: &str) -> Option<ExitReason> {
        self.exits.read().await.get(entity_id).copied()
    }

    /// OS pid of the entity's live process, if any.
    pub async fn pid(&self, entity_id: &str) -> Option<u32> {
        self.slots.read().await.get(entity_id).and_then(|s| s.pid)
    }

    /// Number of entities currently holding a live slot.
    pub async fn running_count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Remove the on-disk config artifact for an entity (e.g. when its
    /// record is deleted).
    pub async fn delete_artifact(&self, entity_id: &str) {
        artifact::remove_config_artifact(&self.config.artifact_dir, entity_id).await;
    }
}

/// Forward each line of a child output stream to the hub.
async fn pump_lines<R>(stream: R, hub: Arc<StatusHub>, scope: ScopeKey)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        hub.publish(&scope, StreamEvent::log(line)).await;
    }
}

/// Probe the OS process table: does `pid` name a live process?
fn process_alive(pid: u32) -> bool {
    // Signal 0 performs permission and existence checks without delivering.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Best-effort signal delivery; failure means the process is already gone.
fn signal(pid: u32, sig: libc::c_int) {
    unsafe {
        libc::kill(pid as libc::pid_t, sig);
    }
}
