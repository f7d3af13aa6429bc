//! Operation and history model.
//!
//! Every client and nemesis action is recorded twice: once when it is
//! invoked and once when it reaches a terminal state (ok, fail, or info).
//! The append-only log of those records is the artifact the whole harness
//! exists to produce, and the input every consistency checker consumes.

use std::io::{self, Write};
use std::ops::Deref;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Operation-name constants shared by generators, clients, and nemeses.
///
/// Fault vocabularies are namespaced (`partition.start`, `kill.stop`, ...)
/// so a composed nemesis can route on the name alone.
pub mod f {
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    pub const CAS: &str = "cas";
    pub const TXN: &str = "txn";

    pub const PARTITION_START: &str = "partition.start";
    pub const PARTITION_STOP: &str = "partition.stop";
    pub const KILL_START: &str = "kill.start";
    pub const KILL_STOP: &str = "kill.stop";
    pub const CLOCK_START: &str = "clock.start";
    pub const CLOCK_STOP: &str = "clock.stop";
}

/// A logical actor in the test: one of the client worker slots, or the
/// single nemesis process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Process {
    Client(usize),
    Nemesis,
}

impl std::fmt::Display for Process {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Process::Client(i) => write!(fmt, "client-{}", i),
            Process::Nemesis => write!(fmt, "nemesis"),
        }
    }
}

/// Lifecycle stage of an operation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// The operation was handed to a client or the nemesis.
    Invoke,
    /// The operation definitely took effect.
    Ok,
    /// The operation definitely did not take effect.
    Fail,
    /// The outcome is unknown (timeout, connection reset mid-request).
    Info,
}

impl Kind {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Kind::Invoke)
    }
}

/// A single read or write step inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mop {
    pub f: MopKind,
    pub key: u64,
    /// `None` on a read means the value is still pending.
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MopKind {
    Read,
    Write,
}

impl Mop {
    pub fn r(key: u64, value: Option<i64>) -> Self {
        Mop { f: MopKind::Read, key, value }
    }

    pub fn w(key: u64, value: i64) -> Self {
        Mop { f: MopKind::Write, key, value: Some(value) }
    }

    pub fn is_write(&self) -> bool {
        self.f == MopKind::Write
    }
}

/// Operation payload. Nemesis results carry structured descriptions of what
/// actually happened (which nodes, which split, which offsets) so the
/// history is self-describing even when fault targets were chosen randomly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpValue {
    None,
    Read(Option<i64>),
    Write(i64),
    Cas { expect: i64, swap: i64 },
    Txn(Vec<Mop>),
    Nodes(Vec<String>),
    Split { left: Vec<String>, right: Vec<String> },
    Skews(Vec<(String, i64)>),
    Text(String),
}

/// One record in the history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Op {
    pub process: Process,
    pub kind: Kind,
    pub f: &'static str,
    pub value: OpValue,
    /// Monotonic nanoseconds since the run started, stamped at append time.
    pub time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Op {
    pub fn invoke(process: Process, f: &'static str, value: OpValue) -> Self {
        Op { process, kind: Kind::Invoke, f, value, time: 0, error: None }
    }

    /// Complete this operation successfully, replacing its payload with the
    /// observed result.
    pub fn ok(mut self, value: OpValue) -> Self {
        self.kind = Kind::Ok;
        self.value = value;
        self
    }

    /// Complete this operation as a definite failure. The payload is kept so
    /// the checker can still see what was attempted.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.kind = Kind::Fail;
        self.error = Some(error.into());
        self
    }

    /// Complete this operation with an unknown outcome.
    pub fn info(mut self, error: impl Into<String>) -> Self {
        self.kind = Kind::Info;
        self.error = Some(error.into());
        self
    }

    pub fn is_invoke(&self) -> bool {
        self.kind == Kind::Invoke
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Append-only operation log, contended by all worker threads and the
/// nemesis thread during a run.
///
/// Timestamps are assigned under the log's lock, so vector order and time
/// order agree: the history is ordered by *observed* time, not invocation
/// order. Terminal records may land far from their invocations.
pub struct HistoryLog {
    start: Instant,
    ops: Mutex<Vec<Op>>,
}

impl HistoryLog {
    pub fn new() -> Self {
        HistoryLog { start: Instant::now(), ops: Mutex::new(Vec::new()) }
    }

    /// Stamp `op` with the current run-relative time, record it, and return
    /// the stamped copy for the caller to act on.
    pub fn append(&self, mut op: Op) -> Op {
        let mut ops = self.ops.lock();
        op.time = self.start.elapsed().as_nanos() as u64;
        ops.push(op.clone());
        op
    }

    /// Freeze the log into an immutable history. The run is over; no writer
    /// holds a reference anymore.
    pub fn seal(self) -> History {
        History { ops: self.ops.into_inner() }
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable, completed history, ordered by observed time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct History {
    ops: Vec<Op>,
}

impl History {
    pub fn from_ops(ops: Vec<Op>) -> Self {
        History { ops }
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Write the history as JSON lines, one operation per line.
    pub fn write_json_lines<W: Write>(&self, mut out: W) -> io::Result<()> {
        for op in &self.ops {
            serde_json::to_writer(&mut out, op)?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl Deref for History {
    type Target = [Op];

    fn deref(&self) -> &[Op] {
        &self.ops
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a Op;
    type IntoIter = std::slice::Iter<'a, Op>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_lifecycle() {
        let op = Op::invoke(Process::Client(0), f::WRITE, OpValue::Write(3));
        assert!(op.is_invoke());

        let done = op.clone().ok(OpValue::Write(3));
        assert!(done.is_terminal());
        assert_eq!(done.kind, Kind::Ok);

        let failed = op.clone().fail("rejected");
        assert_eq!(failed.kind, Kind::Fail);
        assert_eq!(failed.error.as_deref(), Some("rejected"));

        let unknown = op.info("timeout");
        assert_eq!(unknown.kind, Kind::Info);
    }

    #[test]
    fn test_log_orders_by_append_time() {
        let log = HistoryLog::new();
        for i in 0..10 {
            log.append(Op::invoke(Process::Client(i), f::READ, OpValue::None));
        }
        let history = log.seal();
        assert_eq!(history.len(), 10);
        for pair in history.ops().windows(2) {
            assert!(pair[0].time <= pair[1].time);
        }
    }

    #[test]
    fn test_json_lines_export() {
        let log = HistoryLog::new();
        log.append(Op::invoke(Process::Nemesis, f::KILL_START, OpValue::None));
        log.append(
            Op::invoke(Process::Nemesis, f::KILL_START, OpValue::None)
                .ok(OpValue::Nodes(vec!["n1".into()])),
        );
        let history = log.seal();

        let mut buf = Vec::new();
        history.write_json_lines(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("kill.start"));
        assert!(text.contains("n1"));
    }
}
