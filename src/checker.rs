//! Checker boundary.
//!
//! Consistency checking proper (cycle detection, model-based state
//! machines) lives outside the harness; this is the contract it is handed:
//! a sealed history plus the test metadata. One structural checker ships
//! here because the harness itself guarantees the property it verifies.

use serde::Serialize;
use serde_json::json;

use crate::db::Node;
use crate::history::{History, Kind, Op, Process};

/// Metadata describing the run a history came from.
#[derive(Debug, Clone, Serialize)]
pub struct TestMeta {
    pub name: String,
    pub nodes: Vec<Node>,
    pub concurrency: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub valid: bool,
    pub details: serde_json::Value,
}

impl CheckResult {
    pub fn valid() -> Self {
        CheckResult { valid: true, details: serde_json::Value::Null }
    }

    pub fn invalid(details: serde_json::Value) -> Self {
        CheckResult { valid: false, details }
    }
}

pub trait Checker: Send + Sync {
    fn check(&self, meta: &TestMeta, history: &History) -> CheckResult;
}

/// Verifies the single-outstanding-operation discipline: for every process,
/// invoke and terminal records strictly alternate, starting with an invoke.
pub struct AlternationChecker;

impl Checker for AlternationChecker {
    fn check(&self, _meta: &TestMeta, history: &History) -> CheckResult {
        let mut outstanding: fnv::FnvHashMap<Process, &Op> = fnv::FnvHashMap::default();
        let mut violations = Vec::new();

        for (index, op) in history.ops().iter().enumerate() {
            match op.kind {
                Kind::Invoke => {
                    if let Some(prior) = outstanding.insert(op.process, op) {
                        violations.push(json!({
                            "index": index,
                            "process": op.process,
                            "problem": "second invoke while one is outstanding",
                            "prior_f": prior.f,
                        }));
                    }
                }
                Kind::Ok | Kind::Fail | Kind::Info => {
                    if outstanding.remove(&op.process).is_none() {
                        violations.push(json!({
                            "index": index,
                            "process": op.process,
                            "problem": "terminal event without an invoke",
                            "f": op.f,
                        }));
                    }
                }
            }
        }

        for (process, op) in &outstanding {
            violations.push(json!({
                "process": process,
                "problem": "invoke never reached a terminal state",
                "f": op.f,
            }));
        }

        if violations.is_empty() {
            CheckResult::valid()
        } else {
            CheckResult::invalid(json!({ "violations": violations }))
        }
    }
}
