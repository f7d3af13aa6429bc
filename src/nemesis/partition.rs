//! Network-partition nemesis.

use std::sync::Arc;

use tracing::info;

use super::{Nemesis, NemesisError};
use crate::db::Node;
use crate::generator::{DeterministicRng, OpSpec};
use crate::history::{f, Op, OpValue};

/// Network reachability control for the cluster. Implemented outside the
/// harness (iptables over SSH, a proxy, an in-memory switch in tests).
pub trait PartitionControl: Send + Sync {
    /// Stop traffic from `from` to `to`. Called once per direction.
    fn sever(&self, from: &str, to: &str) -> Result<(), NemesisError>;

    /// Restore full connectivity between all nodes.
    fn heal(&self) -> Result<(), NemesisError>;
}

/// How to choose the two sides of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMode {
    /// Shuffle the nodes and cut them into two halves.
    RandomHalves,
    /// Isolate one random node from everyone else.
    IsolateOne,
}

/// Partitions the cluster on `partition.start` and heals it on
/// `partition.stop`. Starting while a partition is active replaces it:
/// the old cut is healed first, then the new one applied. Stopping while
/// healthy is a no-op.
pub struct PartitionNemesis {
    net: Arc<dyn PartitionControl>,
    nodes: Vec<Node>,
    mode: PartitionMode,
    active: Option<(Vec<Node>, Vec<Node>)>,
}

impl PartitionNemesis {
    pub fn new(net: Arc<dyn PartitionControl>, nodes: Vec<Node>, mode: PartitionMode) -> Self {
        PartitionNemesis { net, nodes, mode, active: None }
    }

    pub fn random_halves(net: Arc<dyn PartitionControl>, nodes: Vec<Node>) -> Self {
        Self::new(net, nodes, PartitionMode::RandomHalves)
    }

    pub fn isolate_one(net: Arc<dyn PartitionControl>, nodes: Vec<Node>) -> Self {
        Self::new(net, nodes, PartitionMode::IsolateOne)
    }

    fn choose_split(&self, rng: &mut DeterministicRng) -> (Vec<Node>, Vec<Node>) {
        let mut shuffled = self.nodes.clone();
        rng.shuffle(&mut shuffled);
        let cut = match self.mode {
            PartitionMode::RandomHalves => shuffled.len() / 2,
            PartitionMode::IsolateOne => 1,
        };
        let right = shuffled.split_off(cut.max(1));
        (shuffled, right)
    }

    fn apply_split(&self, left: &[Node], right: &[Node]) -> Result<(), NemesisError> {
        for a in left {
            for b in right {
                self.net.sever(a, b)?;
                self.net.sever(b, a)?;
            }
        }
        Ok(())
    }
}

impl Nemesis for PartitionNemesis {
    fn invoke(&mut self, rng: &mut DeterministicRng, op: Op) -> Result<Op, NemesisError> {
        match op.f {
            f::PARTITION_START => {
                if self.active.is_some() {
                    self.net.heal()?;
                }
                let (left, right) = self.choose_split(rng);
                self.apply_split(&left, &right)?;
                info!(left = ?left, right = ?right, "partitioned cluster");
                self.active = Some((left.clone(), right.clone()));
                Ok(op.ok(OpValue::Split { left, right }))
            }
            f::PARTITION_STOP => {
                if self.active.take().is_none() {
                    return Ok(op.ok(OpValue::Text("already healed".into())));
                }
                self.net.heal()?;
                info!("healed all partitions");
                Ok(op.ok(OpValue::Text("healed".into())))
            }
            other => Err(NemesisError::Unrouted { f: other }),
        }
    }

    fn teardown(&mut self) -> Result<(), NemesisError> {
        if self.active.take().is_some() {
            self.net.heal()?;
        }
        Ok(())
    }

    fn vocabulary(&self) -> Vec<&'static str> {
        vec![f::PARTITION_START, f::PARTITION_STOP]
    }

    fn final_ops(&self) -> Vec<OpSpec> {
        vec![OpSpec::new(f::PARTITION_STOP, OpValue::None)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Process;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeNet {
        severed: Mutex<Vec<(String, String)>>,
        heals: Mutex<usize>,
    }

    impl PartitionControl for FakeNet {
        fn sever(&self, from: &str, to: &str) -> Result<(), NemesisError> {
            self.severed.lock().push((from.to_string(), to.to_string()));
            Ok(())
        }

        fn heal(&self) -> Result<(), NemesisError> {
            self.severed.lock().clear();
            *self.heals.lock() += 1;
            Ok(())
        }
    }

    fn nodes() -> Vec<Node> {
        vec!["n1".into(), "n2".into(), "n3".into(), "n4".into(), "n5".into()]
    }

    fn start_op() -> Op {
        Op::invoke(Process::Nemesis, f::PARTITION_START, OpValue::None)
    }

    fn stop_op() -> Op {
        Op::invoke(Process::Nemesis, f::PARTITION_STOP, OpValue::None)
    }

    #[test]
    fn test_start_cuts_both_directions_between_halves() {
        let net = Arc::new(FakeNet::default());
        let mut nemesis = PartitionNemesis::random_halves(net.clone(), nodes());
        let mut rng = DeterministicRng::new(9);

        let done = nemesis.invoke(&mut rng, start_op()).unwrap();
        let OpValue::Split { left, right } = &done.value else {
            panic!("expected split payload, got {:?}", done.value);
        };
        assert_eq!(left.len() + right.len(), 5);
        assert!(!left.is_empty() && !right.is_empty());

        let severed = net.severed.lock();
        assert_eq!(severed.len(), 2 * left.len() * right.len());
    }

    #[test]
    fn test_isolate_one_cuts_single_node() {
        let net = Arc::new(FakeNet::default());
        let mut nemesis = PartitionNemesis::isolate_one(net, nodes());
        let mut rng = DeterministicRng::new(3);

        let done = nemesis.invoke(&mut rng, start_op()).unwrap();
        let OpValue::Split { left, right } = &done.value else {
            panic!("expected split payload");
        };
        assert_eq!(left.len(), 1);
        assert_eq!(right.len(), 4);
    }

    #[test]
    fn test_restart_replaces_partition() {
        let net = Arc::new(FakeNet::default());
        let mut nemesis = PartitionNemesis::random_halves(net.clone(), nodes());
        let mut rng = DeterministicRng::new(4);

        nemesis.invoke(&mut rng, start_op()).unwrap();
        nemesis.invoke(&mut rng, start_op()).unwrap();
        // The second start healed the first cut before applying its own.
        assert_eq!(*net.heals.lock(), 1);
        assert!(!net.severed.lock().is_empty());
    }

    #[test]
    fn test_stop_when_quiescent_is_a_noop() {
        let net = Arc::new(FakeNet::default());
        let mut nemesis = PartitionNemesis::random_halves(net.clone(), nodes());
        let mut rng = DeterministicRng::new(5);

        let done = nemesis.invoke(&mut rng, stop_op()).unwrap();
        assert!(done.is_terminal());
        assert_eq!(*net.heals.lock(), 0);
    }

    #[test]
    fn test_stop_heals_active_partition() {
        let net = Arc::new(FakeNet::default());
        let mut nemesis = PartitionNemesis::random_halves(net.clone(), nodes());
        let mut rng = DeterministicRng::new(6);

        nemesis.invoke(&mut rng, start_op()).unwrap();
        nemesis.invoke(&mut rng, stop_op()).unwrap();
        assert_eq!(*net.heals.lock(), 1);
        assert!(net.severed.lock().is_empty());
    }

    #[test]
    fn test_teardown_heals_leftover_partition() {
        let net = Arc::new(FakeNet::default());
        let mut nemesis = PartitionNemesis::random_halves(net.clone(), nodes());
        let mut rng = DeterministicRng::new(7);

        nemesis.invoke(&mut rng, start_op()).unwrap();
        nemesis.teardown().unwrap();
        assert_eq!(*net.heals.lock(), 1);

        // Nothing active anymore, teardown again stays quiet.
        nemesis.teardown().unwrap();
        assert_eq!(*net.heals.lock(), 1);
    }
}
