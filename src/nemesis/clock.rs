//! Clock-skew nemesis.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::{Nemesis, NemesisError};
use crate::db::Node;
use crate::generator::{DeterministicRng, OpSpec};
use crate::history::{f, Op, OpValue};

/// Per-node clock manipulation. Implementations bump the node's wall clock
/// by a signed millisecond delta and can restore it to true time.
pub trait ClockControl: Send + Sync {
    fn bump(&self, node: &str, delta_ms: i64) -> Result<(), NemesisError>;
    fn reset(&self, node: &str) -> Result<(), NemesisError>;
}

/// Skews clocks on a random subset of nodes on `clock.start` and restores
/// every touched node on `clock.stop`. Offsets are bounded by
/// `max_skew_ms` and accumulate if start fires while skews are active; the
/// running total per node is tracked so the history records the net offset.
pub struct ClockSkewNemesis {
    clock: Arc<dyn ClockControl>,
    nodes: Vec<Node>,
    max_skew_ms: i64,
    applied: HashMap<Node, i64>,
}

impl ClockSkewNemesis {
    pub fn new(clock: Arc<dyn ClockControl>, nodes: Vec<Node>, max_skew_ms: i64) -> Self {
        ClockSkewNemesis { clock, nodes, max_skew_ms: max_skew_ms.abs().max(1), applied: HashMap::new() }
    }
}

impl Nemesis for ClockSkewNemesis {
    fn invoke(&mut self, rng: &mut DeterministicRng, op: Op) -> Result<Op, NemesisError> {
        match op.f {
            f::CLOCK_START => {
                let count = rng.gen_range(1, self.nodes.len() as u64 + 1) as usize;
                let victims = rng.sample(&self.nodes, count);
                let mut skews = Vec::with_capacity(victims.len());
                for node in victims {
                    let mut delta = rng.gen_range_i64(-self.max_skew_ms, self.max_skew_ms + 1);
                    if delta == 0 {
                        delta = self.max_skew_ms;
                    }
                    self.clock.bump(&node, delta)?;
                    *self.applied.entry(node.clone()).or_insert(0) += delta;
                    skews.push((node, delta));
                }
                info!(skews = ?skews, "bumped node clocks");
                Ok(op.ok(OpValue::Skews(skews)))
            }
            f::CLOCK_STOP => {
                if self.applied.is_empty() {
                    return Ok(op.ok(OpValue::Text("clocks already true".into())));
                }
                let mut reset: Vec<Node> = self.applied.drain().map(|(node, _)| node).collect();
                reset.sort();
                for node in &reset {
                    self.clock.reset(node)?;
                }
                info!(nodes = ?reset, "restored node clocks");
                Ok(op.ok(OpValue::Nodes(reset)))
            }
            other => Err(NemesisError::Unrouted { f: other }),
        }
    }

    fn teardown(&mut self) -> Result<(), NemesisError> {
        let mut leftover: Vec<Node> = self.applied.drain().map(|(node, _)| node).collect();
        leftover.sort();
        for node in &leftover {
            self.clock.reset(node)?;
        }
        Ok(())
    }

    fn vocabulary(&self) -> Vec<&'static str> {
        vec![f::CLOCK_START, f::CLOCK_STOP]
    }

    fn final_ops(&self) -> Vec<OpSpec> {
        vec![OpSpec::new(f::CLOCK_STOP, OpValue::None)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Process;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeClock {
        offsets: Mutex<HashMap<String, i64>>,
    }

    impl ClockControl for FakeClock {
        fn bump(&self, node: &str, delta_ms: i64) -> Result<(), NemesisError> {
            *self.offsets.lock().entry(node.to_string()).or_insert(0) += delta_ms;
            Ok(())
        }

        fn reset(&self, node: &str) -> Result<(), NemesisError> {
            self.offsets.lock().remove(node);
            Ok(())
        }
    }

    fn nodes() -> Vec<Node> {
        vec!["n1".into(), "n2".into(), "n3".into()]
    }

    fn start_op() -> Op {
        Op::invoke(Process::Nemesis, f::CLOCK_START, OpValue::None)
    }

    fn stop_op() -> Op {
        Op::invoke(Process::Nemesis, f::CLOCK_STOP, OpValue::None)
    }

    #[test]
    fn test_skews_are_bounded_and_recorded() {
        let clock = Arc::new(FakeClock::default());
        let mut nemesis = ClockSkewNemesis::new(clock.clone(), nodes(), 500);
        let mut rng = DeterministicRng::new(11);

        let done = nemesis.invoke(&mut rng, start_op()).unwrap();
        let OpValue::Skews(skews) = &done.value else {
            panic!("expected skew payload, got {:?}", done.value);
        };
        assert!(!skews.is_empty());
        for (node, delta) in skews {
            assert!(delta.abs() <= 500, "{} skewed by {}", node, delta);
            assert_ne!(*delta, 0);
        }
        assert_eq!(clock.offsets.lock().len(), skews.len());
    }

    #[test]
    fn test_stop_reverses_every_touched_node() {
        let clock = Arc::new(FakeClock::default());
        let mut nemesis = ClockSkewNemesis::new(clock.clone(), nodes(), 100);
        let mut rng = DeterministicRng::new(12);

        nemesis.invoke(&mut rng, start_op()).unwrap();
        nemesis.invoke(&mut rng, start_op()).unwrap();
        nemesis.invoke(&mut rng, stop_op()).unwrap();
        assert!(clock.offsets.lock().is_empty());
    }

    #[test]
    fn test_stop_when_true_is_a_noop() {
        let clock = Arc::new(FakeClock::default());
        let mut nemesis = ClockSkewNemesis::new(clock, nodes(), 100);
        let mut rng = DeterministicRng::new(13);

        let done = nemesis.invoke(&mut rng, stop_op()).unwrap();
        assert!(matches!(done.value, OpValue::Text(_)));
    }

    #[test]
    fn test_teardown_resets_leftover_skews() {
        let clock = Arc::new(FakeClock::default());
        let mut nemesis = ClockSkewNemesis::new(clock.clone(), nodes(), 100);
        let mut rng = DeterministicRng::new(14);

        nemesis.invoke(&mut rng, start_op()).unwrap();
        nemesis.teardown().unwrap();
        assert!(clock.offsets.lock().is_empty());
    }
}
