//! Nemesis: the fault-injection actor.
//!
//! Each nemesis is a small state machine, quiescent -> active -> quiescent,
//! driven by the start/stop operations the generator routes to the nemesis
//! process. Capability handles (network control, process control, clock
//! control) are injected at construction; the nemesis owns its fault state
//! and mutates it only from its own `invoke`.
//!
//! Fault targets are often chosen at random, so every invocation returns an
//! operation describing what actually happened. The history must be
//! self-describing or later analysis cannot interpret the fault schedule.

mod clock;
mod kill;
mod partition;

pub use clock::{ClockControl, ClockSkewNemesis};
pub use kill::KillNemesis;
pub use partition::{PartitionControl, PartitionMode, PartitionNemesis};

use std::collections::HashMap;

use thiserror::Error;

use crate::db::DbError;
use crate::generator::{DeterministicRng, OpSpec};
use crate::history::Op;

#[derive(Debug, Error)]
pub enum NemesisError {
    #[error("no nemesis claims operation {f:?}")]
    Unrouted { f: &'static str },
    #[error("overlapping nemesis vocabulary: {f:?}")]
    Overlap { f: &'static str },
    #[error("fault control failed: {0}")]
    Control(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

pub trait Nemesis: Send {
    fn setup(&mut self) -> Result<(), NemesisError> {
        Ok(())
    }

    /// Apply or heal a fault in response to `op`, returning the completed
    /// operation. `Unrouted` for an `op.f` outside this nemesis's
    /// vocabulary.
    fn invoke(&mut self, rng: &mut DeterministicRng, op: Op) -> Result<Op, NemesisError>;

    /// Undo any fault still active. Called unconditionally at the end of a
    /// run.
    fn teardown(&mut self) -> Result<(), NemesisError> {
        Ok(())
    }

    /// The operation names this nemesis responds to.
    fn vocabulary(&self) -> Vec<&'static str>;

    /// Operations the runner schedules in the final-heal phase, after the
    /// main generator is exhausted.
    fn final_ops(&self) -> Vec<OpSpec> {
        Vec::new()
    }
}

/// A nemesis that injects nothing, for fault-free control runs.
pub struct NoopNemesis;

impl Nemesis for NoopNemesis {
    fn invoke(&mut self, _rng: &mut DeterministicRng, op: Op) -> Result<Op, NemesisError> {
        Err(NemesisError::Unrouted { f: op.f })
    }

    fn vocabulary(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Multiplexes several independent fault kinds, routing each operation by
/// its `f` discriminator to the sub-nemesis that claims it.
pub struct Compose {
    children: Vec<Box<dyn Nemesis>>,
    routes: HashMap<&'static str, usize>,
}

impl Compose {
    /// Fails on construction if two children claim the same operation name.
    pub fn new(children: Vec<Box<dyn Nemesis>>) -> Result<Self, NemesisError> {
        let mut routes = HashMap::new();
        for (i, child) in children.iter().enumerate() {
            for f in child.vocabulary() {
                if routes.insert(f, i).is_some() {
                    return Err(NemesisError::Overlap { f });
                }
            }
        }
        Ok(Compose { children, routes })
    }
}

impl Nemesis for Compose {
    fn setup(&mut self) -> Result<(), NemesisError> {
        for child in &mut self.children {
            child.setup()?;
        }
        Ok(())
    }

    fn invoke(&mut self, rng: &mut DeterministicRng, op: Op) -> Result<Op, NemesisError> {
        match self.routes.get(op.f) {
            Some(&i) => self.children[i].invoke(rng, op),
            None => Err(NemesisError::Unrouted { f: op.f }),
        }
    }

    fn teardown(&mut self) -> Result<(), NemesisError> {
        let mut first_err = None;
        for child in &mut self.children {
            if let Err(e) = child.teardown() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn vocabulary(&self) -> Vec<&'static str> {
        self.children.iter().flat_map(|c| c.vocabulary()).collect()
    }

    fn final_ops(&self) -> Vec<OpSpec> {
        self.children.iter().flat_map(|c| c.final_ops()).collect()
    }
}
