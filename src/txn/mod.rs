//! Transaction micro-op analysis.
//!
//! Pure helpers that extract the externally observable effects of a
//! transaction: reads whose value came from outside the transaction, and the
//! final write per key. Anomaly checkers build their per-key indexes on top
//! of these instead of re-implementing the nested history/txn traversal.

use fnv::{FnvHashMap, FnvHashSet};

use crate::history::{History, Mop, MopKind, Op, OpValue};

/// The micro-ops of an operation, or an empty slice when its payload is not
/// a transaction.
pub fn op_mops(op: &Op) -> &[Mop] {
    match &op.value {
        OpValue::Txn(mops) => mops,
        _ => &[],
    }
}

/// External reads: for each key whose *first* appearance in `txn` is a read,
/// the value that read observed. A key written before it is read was already
/// known to the transaction, so later reads of it are internal. Linear in
/// the length of `txn`.
pub fn ext_reads(txn: &[Mop]) -> FnvHashMap<u64, Option<i64>> {
    let mut seen = FnvHashSet::default();
    let mut reads = FnvHashMap::default();
    for mop in txn {
        if seen.insert(mop.key) && mop.f == MopKind::Read {
            reads.insert(mop.key, mop.value);
        }
    }
    reads
}

/// External writes: for every key written at least once, the final value
/// written to it in `txn`. Reads never affect this mapping.
pub fn ext_writes(txn: &[Mop]) -> FnvHashMap<u64, i64> {
    let mut writes = FnvHashMap::default();
    for mop in txn {
        if mop.f == MopKind::Write {
            if let Some(value) = mop.value {
                writes.insert(mop.key, value);
            }
        }
    }
    writes
}

/// Intermediate writes: every write to a key except its last, i.e. writes
/// overwritten within `txn` before any external observer could see them.
/// Keys with at most one write are omitted entirely.
pub fn int_write_mops(txn: &[Mop]) -> FnvHashMap<u64, Vec<Mop>> {
    let mut writes: FnvHashMap<u64, Vec<Mop>> = FnvHashMap::default();
    for mop in txn {
        if mop.is_write() {
            writes.entry(mop.key).or_default().push(*mop);
        }
    }
    writes.retain(|_, mops| {
        mops.pop();
        !mops.is_empty()
    });
    writes
}

/// Fold `f(state, op, mop)` over every micro-op of every operation in
/// `history`, in history order, then in transaction order within each
/// operation. Operations without a transaction payload contribute nothing.
pub fn reduce_mops<T, F>(history: &History, init: T, mut f: F) -> T
where
    F: FnMut(T, &Op, &Mop) -> T,
{
    let mut state = init;
    for op in history.ops() {
        for mop in op_mops(op) {
            state = f(state, op, mop);
        }
    }
    state
}
