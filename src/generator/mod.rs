//! Generator engine: the scheduling oracle that produces the operation
//! stream consumed by client workers and the nemesis.
//!
//! Generators are pull-based: a process asks for its next operation and gets
//! back one of three answers. `Pending` means "nothing for you right now,
//! poll again shortly" and is how pacing (`stagger`, `sleep`) and phase
//! barriers suspend a process without blocking the others. `Exhausted` is
//! always relative to the asking process: a generator scoped to the nemesis
//! is exhausted for every client slot from the first call.

mod combinators;
mod rng;
mod scheduler;

pub use combinators::{
    any, clients, empty, from_fn, mix, nemesis, once, phases, repeat, seq, sleep, stagger,
    time_limit, weighted_mix,
};
pub use rng::DeterministicRng;
pub use scheduler::Scheduler;

use std::time::Duration;

use crate::history::{Op, OpValue, Process};

/// Everything a generator may consult when deciding what to hand out.
pub struct Context<'a> {
    /// The process asking for work.
    pub process: Process,
    /// Time elapsed since the scheduler started.
    pub elapsed: Duration,
    /// The full roster of processes drawing from this generator. Scoping
    /// combinators narrow it, so phase barriers inside a `clients` scope
    /// wait only for client slots.
    pub procs: &'a [Process],
    pub rng: &'a mut DeterministicRng,
}

/// Answer to a single `next_op` call.
#[derive(Debug, Clone, PartialEq)]
pub enum NextOp {
    /// An operation for the asking process.
    Op(OpSpec),
    /// No operation yet; poll again.
    Pending,
    /// No more work for the asking process, ever.
    Exhausted,
}

/// A not-yet-invoked operation: what to do, but not yet who or when.
#[derive(Debug, Clone, PartialEq)]
pub struct OpSpec {
    pub f: &'static str,
    pub value: OpValue,
}

impl OpSpec {
    pub fn new(f: &'static str, value: OpValue) -> Self {
        OpSpec { f, value }
    }

    /// Bind this spec to a process as a fresh invocation.
    pub fn materialize(self, process: Process) -> Op {
        Op::invoke(process, self.f, self.value)
    }
}

/// A producer of operations. Implementations hold whatever state their
/// schedule needs; the scheduler serializes access, so `next_op` never runs
/// concurrently with itself.
pub trait Generator: Send {
    fn next_op(&mut self, ctx: &mut Context<'_>) -> NextOp;
}

pub type BoxGen = Box<dyn Generator>;
