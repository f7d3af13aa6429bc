//! Kill/restart nemesis.

use std::sync::Arc;

use tracing::info;

use super::{Nemesis, NemesisError};
use crate::db::{Node, ProcessControl};
use crate::generator::{DeterministicRng, OpSpec};
use crate::history::{f, Op, OpValue};

/// Forcibly terminates database processes on `kill.start` and restarts them
/// on `kill.stop`.
///
/// The nemesis remembers exactly which nodes it killed, so stop restarts
/// those and only those. Starting while some nodes are already down kills a
/// fresh subset of the still-running nodes; stopping with nothing down is a
/// no-op.
pub struct KillNemesis {
    db: Arc<dyn ProcessControl>,
    nodes: Vec<Node>,
    /// How many nodes each `kill.start` takes down.
    targets: usize,
    killed: Vec<Node>,
}

impl KillNemesis {
    pub fn new(db: Arc<dyn ProcessControl>, nodes: Vec<Node>, targets: usize) -> Self {
        KillNemesis { db, nodes, targets: targets.max(1), killed: Vec::new() }
    }

    /// The common case: one random node at a time.
    pub fn one(db: Arc<dyn ProcessControl>, nodes: Vec<Node>) -> Self {
        Self::new(db, nodes, 1)
    }
}

impl Nemesis for KillNemesis {
    fn invoke(&mut self, rng: &mut DeterministicRng, op: Op) -> Result<Op, NemesisError> {
        match op.f {
            f::KILL_START => {
                let alive: Vec<Node> = self
                    .nodes
                    .iter()
                    .filter(|n| !self.killed.contains(n))
                    .cloned()
                    .collect();
                let victims = rng.sample(&alive, self.targets);
                if victims.is_empty() {
                    return Ok(op.ok(OpValue::Text("no running nodes left to kill".into())));
                }
                for node in &victims {
                    self.db.kill(node)?;
                }
                info!(nodes = ?victims, "killed database processes");
                self.killed.extend(victims.iter().cloned());
                Ok(op.ok(OpValue::Nodes(victims)))
            }
            f::KILL_STOP => {
                if self.killed.is_empty() {
                    return Ok(op.ok(OpValue::Text("nothing to restart".into())));
                }
                let restarted = std::mem::take(&mut self.killed);
                for node in &restarted {
                    self.db.start(node)?;
                }
                info!(nodes = ?restarted, "restarted database processes");
                Ok(op.ok(OpValue::Nodes(restarted)))
            }
            other => Err(NemesisError::Unrouted { f: other }),
        }
    }

    fn teardown(&mut self) -> Result<(), NemesisError> {
        for node in std::mem::take(&mut self.killed) {
            self.db.start(&node)?;
        }
        Ok(())
    }

    fn vocabulary(&self) -> Vec<&'static str> {
        vec![f::KILL_START, f::KILL_STOP]
    }

    fn final_ops(&self) -> Vec<OpSpec> {
        vec![OpSpec::new(f::KILL_STOP, OpValue::None)]
    }
}
