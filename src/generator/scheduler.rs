//! Shared arbitration point between the generator tree and the threads
//! consuming it.
//!
//! The generator itself is single-threaded state behind a mutex; workers and
//! the nemesis contend on that one lock only for the instant it takes to
//! draw. `Pending` answers are waited out here, with the lock released, so a
//! paced process never stalls the rest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{BoxGen, Context, DeterministicRng, NextOp};
use crate::history::{Op, Process};

pub struct Scheduler {
    start: Instant,
    poll_interval: Duration,
    procs: Vec<Process>,
    aborted: AtomicBool,
    inner: Mutex<Inner>,
}

struct Inner {
    gen: BoxGen,
    rng: DeterministicRng,
}

impl Scheduler {
    pub fn new(gen: BoxGen, procs: Vec<Process>, seed: u64, poll_interval: Duration) -> Self {
        Scheduler {
            start: Instant::now(),
            poll_interval,
            procs,
            aborted: AtomicBool::new(false),
            inner: Mutex::new(Inner { gen, rng: DeterministicRng::new(seed) }),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn procs(&self) -> &[Process] {
        &self.procs
    }

    /// Stop handing out work. Processes blocked in `next_for` drain with
    /// `None` on their next poll. Used when a structural failure makes
    /// finishing the schedule impossible.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Block until the generator yields an operation for `process`, or
    /// return `None` once it is exhausted for that process. At most one
    /// operation is ever outstanding per process: callers invoke the
    /// returned op to a terminal state before asking again.
    pub fn next_for(&self, process: Process) -> Option<Op> {
        loop {
            if self.is_aborted() {
                return None;
            }
            let next = {
                let mut inner = self.inner.lock();
                let Inner { gen, rng } = &mut *inner;
                let mut ctx = Context {
                    process,
                    elapsed: self.start.elapsed(),
                    procs: &self.procs,
                    rng,
                };
                gen.next_op(&mut ctx)
            };
            match next {
                NextOp::Op(spec) => return Some(spec.materialize(process)),
                NextOp::Pending => thread::sleep(self.poll_interval),
                NextOp::Exhausted => return None,
            }
        }
    }
}
