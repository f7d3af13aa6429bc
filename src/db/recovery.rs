//! Crash-and-recover supervision for the system under test.
//!
//! Wraps a database handle so that an unexpected process death during a run
//! surfaces as transient unavailability instead of permanent failure. Kills
//! issued *through* the wrapper mark the node expected-down, so the watchdog
//! leaves nemesis-injected faults alone.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::{Db, DbError, Health, HealthStatus, Node, ProcessControl};

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How often to re-probe a node while waiting for it to become ready.
    pub poll_interval: Duration,
    /// Give up waiting for ready after this long.
    pub ready_deadline: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            poll_interval: Duration::from_secs(1),
            ready_deadline: Duration::from_secs(300),
        }
    }
}

#[derive(Default)]
struct Gate {
    expected_down: bool,
    restarting: bool,
}

/// A database handle with restart supervision layered on top.
pub struct Supervised<D> {
    inner: D,
    health: Arc<dyn Health>,
    config: RecoveryConfig,
    gates: Mutex<HashMap<Node, Gate>>,
    idle: Condvar,
}

impl<D: ProcessControl> Supervised<D> {
    pub fn new(inner: D, health: Arc<dyn Health>, config: RecoveryConfig) -> Self {
        Supervised { inner, health, config, gates: Mutex::new(HashMap::new()), idle: Condvar::new() }
    }

    /// Whether the node's process is currently ready.
    pub fn running(&self, node: &str) -> Result<bool, DbError> {
        Ok(self.health.status(node)? == HealthStatus::Ready)
    }

    fn expected_down(&self, node: &str) -> bool {
        self.gates.lock().get(node).map(|g| g.expected_down).unwrap_or(false)
    }

    /// Start the node's process and block until it reports ready,
    /// restarting it as often as needed within the deadline.
    ///
    /// Reentrant-safe: while one caller is driving a restart, concurrent
    /// callers wait; when the restart finishes and the node probes ready
    /// they return without starting anything themselves.
    pub fn await_ready(&self, node: &str) -> Result<(), DbError> {
        if self.health.status(node)? == HealthStatus::Ready {
            if let Some(gate) = self.gates.lock().get_mut(node) {
                gate.expected_down = false;
            }
            return Ok(());
        }
        loop {
            {
                let mut gates = self.gates.lock();
                let gate = gates.entry(node.to_string()).or_default();
                if !gate.restarting {
                    gate.restarting = true;
                    break;
                }
                self.idle.wait(&mut gates);
            }
            // Another caller just finished. If its restart brought the node
            // up we are done; otherwise loop around and take the gate.
            if self.health.status(node)? == HealthStatus::Ready {
                return Ok(());
            }
        }

        let result = self.restart_loop(node);

        let mut gates = self.gates.lock();
        if let Some(gate) = gates.get_mut(node) {
            gate.restarting = false;
            if result.is_ok() {
                gate.expected_down = false;
            }
        }
        self.idle.notify_all();
        result
    }

    fn restart_loop(&self, node: &str) -> Result<(), DbError> {
        let begin = Instant::now();
        self.inner.start(node)?;
        loop {
            match self.health.status(node)? {
                HealthStatus::Ready => {
                    debug!(node, waited_ms = begin.elapsed().as_millis() as u64, "node ready");
                    return Ok(());
                }
                HealthStatus::Starting => {}
                HealthStatus::Crashed => {
                    warn!(node, "crashed while starting, trying again");
                    self.inner.start(node)?;
                }
            }
            if begin.elapsed() >= self.config.ready_deadline {
                return Err(DbError::RecoveryTimeout {
                    node: node.to_string(),
                    waited: begin.elapsed(),
                });
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Spawn a thread that polls every node and restarts any that crashed
    /// outside the nemesis's control. Returns a handle that stops the loop
    /// when dropped.
    pub fn spawn_watchdog(self: &Arc<Self>, nodes: Vec<Node>, interval: Duration) -> Watchdog
    where
        D: 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let supervisor = Arc::clone(self);
        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            }
            for node in &nodes {
                if supervisor.expected_down(node) {
                    continue;
                }
                match supervisor.health.status(node) {
                    Ok(HealthStatus::Crashed) => {
                        warn!(node = node.as_str(), "unexpected crash, restarting");
                        if let Err(e) = supervisor.await_ready(node) {
                            warn!(node = node.as_str(), error = %e, "watchdog restart failed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!(node = node.as_str(), error = %e, "watchdog probe failed"),
                }
            }
        });
        Watchdog { stop: Some(stop_tx), thread: Some(handle) }
    }
}

impl<D: ProcessControl> Db for Supervised<D> {
    fn setup(&self, node: &str) -> Result<(), DbError> {
        self.inner.setup(node)
    }

    fn teardown(&self, node: &str) -> Result<(), DbError> {
        self.inner.teardown(node)
    }

    fn primaries(&self, nodes: &[Node]) -> Vec<Node> {
        self.inner.primaries(nodes)
    }

    fn log_files(&self, node: &str) -> Vec<PathBuf> {
        self.inner.log_files(node)
    }
}

impl<D: ProcessControl> ProcessControl for Supervised<D> {
    /// Starting through the wrapper waits for ready, sharing any restart
    /// already in flight.
    fn start(&self, node: &str) -> Result<(), DbError> {
        self.await_ready(node)
    }

    /// Kills through the wrapper are deliberate: the node is marked
    /// expected-down until a later `start` succeeds.
    fn kill(&self, node: &str) -> Result<(), DbError> {
        self.gates.lock().entry(node.to_string()).or_default().expected_down = true;
        self.inner.kill(node)
    }
}

/// Handle for a running watchdog thread.
pub struct Watchdog {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}
