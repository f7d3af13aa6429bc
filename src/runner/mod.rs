//! Test orchestration.
//!
//! One run is a fixed state machine: set up every node, drive workers and
//! the nemesis off the shared schedule, heal, wait out the recovery window,
//! take the final client operations, and tear everything down. Teardown is
//! unconditional; a run that fails half way still cleans up every node.
//!
//! The runner builds the phased schedule itself, which is how the final
//! heal / recovery / read phases are barrier-ordered after the main load
//! without the workload author wiring that up by hand.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checker::{CheckResult, Checker, TestMeta};
use crate::client::{ClientError, ClientFactory};
use crate::config::RunConfig;
use crate::db::{Db, DbError, Node};
use crate::generator::{self, BoxGen, DeterministicRng, Scheduler};
use crate::history::{History, HistoryLog, Process};
use crate::nemesis::{Nemesis, NemesisError};

/// Everything needed to execute one test.
pub struct Test {
    pub name: String,
    pub nodes: Vec<Node>,
    /// Number of client worker slots. Each slot is one logical process with
    /// at most one operation in flight.
    pub concurrency: usize,
    pub db: Arc<dyn Db>,
    pub clients: Arc<dyn ClientFactory>,
    pub nemesis: Box<dyn Nemesis>,
    /// The main load: client operations and nemesis operations, typically
    /// under a time limit.
    pub generator: BoxGen,
    /// Closing client operations run after the cluster has healed and had
    /// its recovery window, e.g. one final read per key.
    pub final_generator: Option<BoxGen>,
    pub checker: Option<Box<dyn Checker>>,
    pub config: RunConfig,
}

/// The artifact of a finished run.
pub struct Completed {
    pub meta: TestMeta,
    pub history: History,
    pub check: Option<CheckResult>,
    pub log_files: Vec<(Node, PathBuf)>,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("setup failed on {} node(s)", .0.len())]
    Setup(Vec<DbError>),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Nemesis(#[from] NemesisError),
    #[error("worker thread panicked")]
    WorkerPanic,
}

/// Execute a test from setup through teardown, returning its history.
pub fn run(test: Test) -> Result<Completed, RunError> {
    let db = Arc::clone(&test.db);
    let nodes = test.nodes.clone();

    info!(test = %test.name, nodes = nodes.len(), "setting up nodes");
    let setup_errors = setup_all(db.as_ref(), &nodes);
    let outcome = if setup_errors.is_empty() {
        execute(test)
    } else {
        Err(RunError::Setup(setup_errors))
    };

    info!("tearing down nodes");
    for node in &nodes {
        if let Err(e) = db.teardown(node) {
            warn!(error = %e, "node teardown failed");
        }
    }
    outcome
}

/// Set up every node, collecting failures instead of stopping at the first.
fn setup_all(db: &dyn Db, nodes: &[Node]) -> Vec<DbError> {
    let mut errors = Vec::new();
    for node in nodes {
        if let Err(e) = db.setup(node) {
            warn!(error = %e, "node setup failed");
            errors.push(e);
        }
    }
    errors
}

fn execute(mut test: Test) -> Result<Completed, RunError> {
    let result = match test.nemesis.setup() {
        Ok(()) => drive(&mut test),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = test.nemesis.teardown() {
        warn!(error = %e, "nemesis teardown failed");
    }
    result
}

fn drive(test: &mut Test) -> Result<Completed, RunError> {
    let procs: Vec<Process> = (0..test.concurrency)
        .map(Process::Client)
        .chain([Process::Nemesis])
        .collect();

    // Main load, then final heal, then the recovery window, then the
    // closing client ops, each behind a phase barrier.
    let mut phase_list: Vec<BoxGen> =
        vec![std::mem::replace(&mut test.generator, generator::empty())];
    let heal_ops = test.nemesis.final_ops();
    if !heal_ops.is_empty() {
        phase_list.push(generator::nemesis(generator::seq(heal_ops)));
    }
    if !test.config.recovery_wait.is_zero() {
        phase_list.push(generator::sleep(test.config.recovery_wait));
    }
    if let Some(final_gen) = test.final_generator.take() {
        phase_list.push(generator::clients(final_gen));
    }

    let scheduler = Scheduler::new(
        generator::phases(phase_list),
        procs,
        test.config.seed,
        test.config.poll_interval,
    );
    let log = HistoryLog::new();
    let mut nemesis_rng = DeterministicRng::new(test.config.seed.wrapping_add(0x9E37_79B9_7F4A_7C15));

    info!(concurrency = test.concurrency, "starting workers and nemesis");
    let mut failures: Vec<RunError> = Vec::new();
    thread::scope(|s| {
        let mut handles = Vec::new();
        for i in 0..test.concurrency {
            let node = test.nodes[i % test.nodes.len()].clone();
            let clients = Arc::clone(&test.clients);
            let scheduler = &scheduler;
            let log = &log;
            handles.push(s.spawn(move || {
                worker_loop(Process::Client(i), &node, clients.as_ref(), scheduler, log)
            }));
        }

        let nemesis = test.nemesis.as_mut();
        let nemesis_rng = &mut nemesis_rng;
        let scheduler_ref = &scheduler;
        let log_ref = &log;
        let nemesis_handle =
            s.spawn(move || nemesis_loop(nemesis, nemesis_rng, scheduler_ref, log_ref));

        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e),
                Err(_) => failures.push(RunError::WorkerPanic),
            }
        }
        match nemesis_handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => failures.push(e),
            Err(_) => failures.push(RunError::WorkerPanic),
        }
    });
    if let Some(e) = failures.into_iter().next() {
        return Err(e);
    }

    let history = log.seal();
    let meta = TestMeta {
        name: test.name.clone(),
        nodes: test.nodes.clone(),
        concurrency: test.concurrency,
        seed: test.config.seed,
    };
    let check = test.checker.as_ref().map(|c| c.check(&meta, &history));

    let mut log_files = Vec::new();
    for node in &test.nodes {
        for path in test.db.log_files(node) {
            log_files.push((node.clone(), path));
        }
    }

    info!(
        ops = history.len(),
        valid = ?check.as_ref().map(|c| c.valid),
        "run complete"
    );
    Ok(Completed { meta, history, check, log_files })
}

fn worker_loop(
    process: Process,
    node: &str,
    clients: &dyn ClientFactory,
    scheduler: &Scheduler,
    log: &HistoryLog,
) -> Result<(), RunError> {
    let mut client = match clients.open(node) {
        Ok(client) => client,
        Err(e) => {
            scheduler.abort();
            return Err(e.into());
        }
    };
    if let Err(e) = client.setup() {
        scheduler.abort();
        return Err(e.into());
    }

    while let Some(op) = scheduler.next_for(process) {
        let invoked = log.append(op);
        let mut done = client.invoke(invoked.clone());
        done.process = process;
        done.f = invoked.f;
        if !done.kind.is_terminal() {
            done = done.info("client returned a non-terminal operation");
        }
        log.append(done);
    }

    if let Err(e) = client.teardown() {
        warn!(process = %process, error = %e, "client teardown failed");
    }
    client.close();
    Ok(())
}

fn nemesis_loop(
    nemesis: &mut dyn Nemesis,
    rng: &mut DeterministicRng,
    scheduler: &Scheduler,
    log: &HistoryLog,
) -> Result<(), RunError> {
    while let Some(op) = scheduler.next_for(Process::Nemesis) {
        let invoked = log.append(op);
        debug!(f = invoked.f, "injecting fault operation");
        match nemesis.invoke(rng, invoked.clone()) {
            Ok(mut done) => {
                done.process = Process::Nemesis;
                done.f = invoked.f;
                if !done.kind.is_terminal() {
                    done = done.info("nemesis returned a non-terminal operation");
                }
                log.append(done);
            }
            Err(e @ NemesisError::Unrouted { .. }) => {
                // A schedule naming a fault nobody implements is a bug in
                // the test, not a fault outcome. Stop the run.
                log.append(invoked.info(e.to_string()));
                scheduler.abort();
                return Err(e.into());
            }
            Err(e) => {
                warn!(error = %e, "fault injection failed");
                log.append(invoked.info(e.to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::AlternationChecker;
    use crate::client::Client;
    use crate::generator::{clients, repeat, seq, stagger, time_limit, OpSpec};
    use crate::history::{f, Op, OpValue};
    use crate::nemesis::NoopNemesis;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct EchoClient;

    impl Client for EchoClient {
        fn invoke(&mut self, op: Op) -> Op {
            op.ok(OpValue::None)
        }
    }

    struct EchoFactory;

    impl ClientFactory for EchoFactory {
        fn open(&self, _node: &str) -> Result<Box<dyn Client>, ClientError> {
            Ok(Box::new(EchoClient))
        }
    }

    #[derive(Default)]
    struct TrackingDb {
        setups: Mutex<Vec<String>>,
        teardowns: Mutex<Vec<String>>,
        fail_setup_on: Option<String>,
    }

    impl Db for TrackingDb {
        fn setup(&self, node: &str) -> Result<(), DbError> {
            self.setups.lock().push(node.to_string());
            if self.fail_setup_on.as_deref() == Some(node) {
                return Err(DbError::Setup { node: node.to_string(), message: "disk full".into() });
            }
            Ok(())
        }

        fn teardown(&self, node: &str) -> Result<(), DbError> {
            self.teardowns.lock().push(node.to_string());
            Ok(())
        }
    }

    fn nodes() -> Vec<Node> {
        vec!["n1".into(), "n2".into(), "n3".into()]
    }

    fn quick_config() -> RunConfig {
        RunConfig {
            seed: 1,
            poll_interval: Duration::from_millis(1),
            recovery_wait: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_happy_path_produces_alternating_history() {
        let db = Arc::new(TrackingDb::default());
        let test = Test {
            name: "happy".into(),
            nodes: nodes(),
            concurrency: 3,
            db: db.clone(),
            clients: Arc::new(EchoFactory),
            nemesis: Box::new(NoopNemesis),
            generator: time_limit(
                Duration::from_millis(50),
                clients(stagger(
                    Duration::from_millis(1),
                    repeat(OpSpec::new(f::READ, OpValue::None)),
                )),
            ),
            final_generator: Some(seq(vec![OpSpec::new(f::READ, OpValue::None)])),
            checker: Some(Box::new(AlternationChecker)),
            config: quick_config(),
        };

        let completed = run(test).unwrap();
        assert!(completed.check.unwrap().valid);
        assert!(completed.history.len() > 2);
        // Setup and teardown covered every node.
        assert_eq!(db.setups.lock().len(), 3);
        assert_eq!(db.teardowns.lock().len(), 3);
    }

    #[test]
    fn test_setup_failure_aborts_run_but_tears_down_all_nodes() {
        let db = Arc::new(TrackingDb {
            fail_setup_on: Some("n2".to_string()),
            ..Default::default()
        });
        let test = Test {
            name: "bad-setup".into(),
            nodes: nodes(),
            concurrency: 2,
            db: db.clone(),
            clients: Arc::new(EchoFactory),
            nemesis: Box::new(NoopNemesis),
            generator: clients(repeat(OpSpec::new(f::READ, OpValue::None))),
            final_generator: None,
            checker: None,
            config: quick_config(),
        };

        match run(test) {
            Err(RunError::Setup(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected setup error, got {:?}", other.err()),
        }
        // Setup was attempted on every node despite the n2 failure, and
        // teardown still covered all three.
        assert_eq!(db.setups.lock().len(), 3);
        assert_eq!(db.teardowns.lock().len(), 3);
    }

    #[test]
    fn test_unrouted_nemesis_op_is_fatal() {
        let db = Arc::new(TrackingDb::default());
        let test = Test {
            name: "unrouted".into(),
            nodes: nodes(),
            concurrency: 1,
            db: db.clone(),
            clients: Arc::new(EchoFactory),
            nemesis: Box::new(NoopNemesis),
            generator: generator::nemesis(seq(vec![OpSpec::new(f::KILL_START, OpValue::None)])),
            final_generator: None,
            checker: None,
            config: quick_config(),
        };

        match run(test) {
            Err(RunError::Nemesis(NemesisError::Unrouted { f: name })) => {
                assert_eq!(name, f::KILL_START)
            }
            other => panic!("expected unrouted error, got {:?}", other.err()),
        }
        // Teardown still ran.
        assert_eq!(db.teardowns.lock().len(), 3);
    }
}
