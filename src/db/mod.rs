//! System-under-test lifecycle capabilities.
//!
//! The harness never knows how a database is installed or reached (SSH,
//! local process, container); it drives these traits and nothing else.
//! Implementations live with the test, not here.

mod recovery;

pub use recovery::{RecoveryConfig, Supervised, Watchdog};

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A node in the cluster under test, identified by hostname.
pub type Node = String;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{node}: setup failed: {message}")]
    Setup { node: Node, message: String },
    #[error("{node}: teardown failed: {message}")]
    Teardown { node: Node, message: String },
    #[error("{node}: process would not start: {message}")]
    StartFailed { node: Node, message: String },
    #[error("{node}: control operation failed: {message}")]
    Control { node: Node, message: String },
    #[error("{node}: health probe failed: {message}")]
    Probe { node: Node, message: String },
    #[error("{node}: not ready after {waited:?}")]
    RecoveryTimeout { node: Node, waited: Duration },
}

impl DbError {
    pub fn node(&self) -> &str {
        match self {
            DbError::Setup { node, .. }
            | DbError::Teardown { node, .. }
            | DbError::StartFailed { node, .. }
            | DbError::Control { node, .. }
            | DbError::Probe { node, .. }
            | DbError::RecoveryTimeout { node, .. } => node,
        }
    }
}

/// Per-node lifecycle of the system under test.
pub trait Db: Send + Sync {
    fn setup(&self, node: &str) -> Result<(), DbError>;
    fn teardown(&self, node: &str) -> Result<(), DbError>;

    /// The subset of `nodes` currently acting as designated leader(s).
    /// Single-leader systems return one node; leaderless systems may return
    /// the input unchanged.
    fn primaries(&self, nodes: &[Node]) -> Vec<Node> {
        nodes.to_vec()
    }

    /// Log files worth collecting from `node` after a run.
    fn log_files(&self, _node: &str) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Databases whose process can be stopped and restarted independently of
/// full setup/teardown. Required by the kill nemesis and the recovery
/// wrapper.
pub trait ProcessControl: Db {
    fn start(&self, node: &str) -> Result<(), DbError>;
    fn kill(&self, node: &str) -> Result<(), DbError>;
}

/// Readiness of a node's database process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Starting,
    Ready,
    Crashed,
}

/// Probe for a node's process state, polled by the recovery loop and the
/// watchdog.
pub trait Health: Send + Sync {
    fn status(&self, node: &str) -> Result<HealthStatus, DbError>;
}
