//! Generator combinators.
//!
//! Small building blocks composed into complete schedules, e.g.
//!
//! ```ignore
//! phases(vec![
//!     time_limit(
//!         Duration::from_secs(300),
//!         any(vec![
//!             clients(stagger(Duration::from_millis(100), repeat(write_spec))),
//!             nemesis(stagger(Duration::from_secs(10), kill_cycle)),
//!         ]),
//!     ),
//!     nemesis(seq(vec![heal_spec])),
//!     sleep(Duration::from_secs(10)),
//!     clients(seq(final_reads)),
//! ])
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use super::{BoxGen, Context, Generator, NextOp, OpSpec};
use crate::history::Process;

/// Operations drawn strictly in list order, one per call, by whichever
/// process asks first.
struct Seq {
    ops: VecDeque<OpSpec>,
}

impl Generator for Seq {
    fn next_op(&mut self, _ctx: &mut Context<'_>) -> NextOp {
        match self.ops.pop_front() {
            Some(spec) => NextOp::Op(spec),
            None => NextOp::Exhausted,
        }
    }
}

pub fn seq(ops: impl IntoIterator<Item = OpSpec>) -> BoxGen {
    Box::new(Seq { ops: ops.into_iter().collect() })
}

/// A generator with no operations at all.
pub fn empty() -> BoxGen {
    seq(Vec::new())
}

/// Exactly one operation, for whichever process asks first.
struct Once {
    spec: Option<OpSpec>,
}

impl Generator for Once {
    fn next_op(&mut self, _ctx: &mut Context<'_>) -> NextOp {
        match self.spec.take() {
            Some(spec) => NextOp::Op(spec),
            None => NextOp::Exhausted,
        }
    }
}

pub fn once(spec: OpSpec) -> BoxGen {
    Box::new(Once { spec: Some(spec) })
}

/// The same operation forever. Bound it with `time_limit`.
struct Repeat {
    spec: OpSpec,
}

impl Generator for Repeat {
    fn next_op(&mut self, _ctx: &mut Context<'_>) -> NextOp {
        NextOp::Op(self.spec.clone())
    }
}

pub fn repeat(spec: OpSpec) -> BoxGen {
    Box::new(Repeat { spec })
}

/// Adapt a closure into a generator, for workloads whose payloads depend on
/// the context (random keys, fresh values).
struct FromFn<F> {
    f: F,
}

impl<F> Generator for FromFn<F>
where
    F: FnMut(&mut Context<'_>) -> NextOp + Send,
{
    fn next_op(&mut self, ctx: &mut Context<'_>) -> NextOp {
        (self.f)(ctx)
    }
}

pub fn from_fn<F>(f: F) -> BoxGen
where
    F: FnMut(&mut Context<'_>) -> NextOp + Send + 'static,
{
    Box::new(FromFn { f })
}

/// On each call, pick among children by weight. Children that answer
/// `Exhausted` for this call are skipped and the pick is redrawn from the
/// rest; they are never removed outright, since a child exhausted for one
/// process may still have work for another. The mix is exhausted for a
/// process only when every child is.
struct Mix {
    children: Vec<(u64, BoxGen)>,
}

impl Generator for Mix {
    fn next_op(&mut self, ctx: &mut Context<'_>) -> NextOp {
        let mut candidates: Vec<usize> = (0..self.children.len()).collect();

        while !candidates.is_empty() {
            let total: u64 = candidates.iter().map(|&i| self.children[i].0).sum();
            let mut draw = ctx.rng.gen_range(0, total.max(1));
            let mut picked = candidates.len() - 1;
            for (slot, &i) in candidates.iter().enumerate() {
                let weight = self.children[i].0;
                if draw < weight {
                    picked = slot;
                    break;
                }
                draw -= weight;
            }

            let child = candidates[picked];
            match self.children[child].1.next_op(ctx) {
                NextOp::Op(spec) => return NextOp::Op(spec),
                NextOp::Pending => return NextOp::Pending,
                NextOp::Exhausted => {
                    candidates.swap_remove(picked);
                }
            }
        }

        NextOp::Exhausted
    }
}

/// Uniform random choice among children.
pub fn mix(children: Vec<BoxGen>) -> BoxGen {
    Box::new(Mix { children: children.into_iter().map(|g| (1, g)).collect() })
}

/// Weighted random choice among children. Zero weights are treated as one.
pub fn weighted_mix(children: Vec<(u64, BoxGen)>) -> BoxGen {
    Box::new(Mix {
        children: children.into_iter().map(|(w, g)| (w.max(1), g)).collect(),
    })
}

/// Forward to the wrapped generator until `limit` has elapsed since the
/// first consumption, then report exhausted. Only future invocations are cut
/// off; operations already in flight run to their terminal state.
struct TimeLimit {
    limit: Duration,
    deadline: Option<Duration>,
    inner: BoxGen,
}

impl Generator for TimeLimit {
    fn next_op(&mut self, ctx: &mut Context<'_>) -> NextOp {
        let deadline = *self.deadline.get_or_insert(ctx.elapsed + self.limit);
        if ctx.elapsed >= deadline {
            return NextOp::Exhausted;
        }
        self.inner.next_op(ctx)
    }
}

pub fn time_limit(limit: Duration, inner: BoxGen) -> BoxGen {
    Box::new(TimeLimit { limit, deadline: None, inner })
}

/// Pace each process: after it draws an operation, hold it in `Pending` for
/// roughly `interval` (jittered between 0.5x and 1.5x) before it may draw
/// again. Other processes are unaffected.
struct Stagger {
    interval: Duration,
    next_draw: HashMap<Process, Duration>,
    inner: BoxGen,
}

impl Generator for Stagger {
    fn next_op(&mut self, ctx: &mut Context<'_>) -> NextOp {
        if let Some(&at) = self.next_draw.get(&ctx.process) {
            if ctx.elapsed < at {
                return NextOp::Pending;
            }
        }
        match self.inner.next_op(ctx) {
            NextOp::Op(spec) => {
                let base = self.interval.as_nanos() as u64;
                let jitter = ctx.rng.gen_range(base / 2, base + base / 2 + 1);
                self.next_draw
                    .insert(ctx.process, ctx.elapsed + Duration::from_nanos(jitter));
                NextOp::Op(spec)
            }
            other => other,
        }
    }
}

pub fn stagger(interval: Duration, inner: BoxGen) -> BoxGen {
    Box::new(Stagger { interval, next_draw: HashMap::new(), inner })
}

/// Yield no operations for `dur` (measured from first consumption), then
/// report exhausted. Used as a recovery window between phases.
struct Sleep {
    dur: Duration,
    wake: Option<Duration>,
}

impl Generator for Sleep {
    fn next_op(&mut self, ctx: &mut Context<'_>) -> NextOp {
        let wake = *self.wake.get_or_insert(ctx.elapsed + self.dur);
        if ctx.elapsed < wake {
            NextOp::Pending
        } else {
            NextOp::Exhausted
        }
    }
}

pub fn sleep(dur: Duration) -> BoxGen {
    Box::new(Sleep { dur, wake: None })
}

/// Route the wrapped generator exclusively to the nemesis process. Client
/// slots see it as exhausted. The inner roster is narrowed accordingly.
struct NemesisScope {
    inner: BoxGen,
}

const NEMESIS_ROSTER: [Process; 1] = [Process::Nemesis];

impl Generator for NemesisScope {
    fn next_op(&mut self, ctx: &mut Context<'_>) -> NextOp {
        if ctx.process != Process::Nemesis {
            return NextOp::Exhausted;
        }
        let mut inner_ctx = Context {
            process: ctx.process,
            elapsed: ctx.elapsed,
            procs: &NEMESIS_ROSTER,
            rng: &mut *ctx.rng,
        };
        self.inner.next_op(&mut inner_ctx)
    }
}

pub fn nemesis(inner: BoxGen) -> BoxGen {
    Box::new(NemesisScope { inner })
}

/// Route the wrapped generator exclusively to client processes.
struct ClientScope {
    inner: BoxGen,
    roster: Option<Vec<Process>>,
}

impl Generator for ClientScope {
    fn next_op(&mut self, ctx: &mut Context<'_>) -> NextOp {
        if !matches!(ctx.process, Process::Client(_)) {
            return NextOp::Exhausted;
        }
        let roster = self.roster.get_or_insert_with(|| {
            ctx.procs
                .iter()
                .filter(|p| matches!(p, Process::Client(_)))
                .copied()
                .collect()
        });
        let mut inner_ctx = Context {
            process: ctx.process,
            elapsed: ctx.elapsed,
            procs: roster,
            rng: &mut *ctx.rng,
        };
        self.inner.next_op(&mut inner_ctx)
    }
}

pub fn clients(inner: BoxGen) -> BoxGen {
    Box::new(ClientScope { inner, roster: None })
}

/// Run several generators side by side: each call tries the children in
/// order and returns the first operation found. Typically wraps one
/// `nemesis`-scoped and one `clients`-scoped child so the two streams run
/// concurrently but are scheduled independently.
struct Any {
    children: Vec<BoxGen>,
}

impl Generator for Any {
    fn next_op(&mut self, ctx: &mut Context<'_>) -> NextOp {
        let mut saw_pending = false;
        for child in &mut self.children {
            match child.next_op(ctx) {
                NextOp::Op(spec) => return NextOp::Op(spec),
                NextOp::Pending => saw_pending = true,
                NextOp::Exhausted => {}
            }
        }
        if saw_pending {
            NextOp::Pending
        } else {
            NextOp::Exhausted
        }
    }
}

pub fn any(children: Vec<BoxGen>) -> BoxGen {
    Box::new(Any { children })
}

/// Run each child to exhaustion before starting the next, with a barrier at
/// every boundary: a process that exhausts the current phase waits in
/// `Pending` until the whole roster has arrived, and only then does anyone
/// draw from the next phase. The arrival that completes the set advances the
/// phase and draws from the new one in the same call.
struct Phases {
    remaining: VecDeque<BoxGen>,
    arrived: HashSet<Process>,
}

impl Generator for Phases {
    fn next_op(&mut self, ctx: &mut Context<'_>) -> NextOp {
        loop {
            let Some(current) = self.remaining.front_mut() else {
                return NextOp::Exhausted;
            };

            if self.arrived.contains(&ctx.process) {
                return NextOp::Pending;
            }

            match current.next_op(ctx) {
                NextOp::Op(spec) => return NextOp::Op(spec),
                NextOp::Pending => return NextOp::Pending,
                NextOp::Exhausted => {
                    self.arrived.insert(ctx.process);
                    if self.arrived.len() == ctx.procs.len() {
                        self.remaining.pop_front();
                        self.arrived.clear();
                        continue;
                    }
                    return NextOp::Pending;
                }
            }
        }
    }
}

pub fn phases(list: Vec<BoxGen>) -> BoxGen {
    Box::new(Phases { remaining: list.into(), arrived: HashSet::new() })
}
