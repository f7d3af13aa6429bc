pub mod checker;
pub mod client;
pub mod config;
pub mod db;
pub mod generator;
pub mod history;
pub mod nemesis;
pub mod observability;
pub mod runner;
pub mod txn;

pub use checker::{AlternationChecker, CheckResult, Checker, TestMeta};
pub use config::RunConfig;
pub use history::{History, HistoryLog, Kind, Mop, MopKind, Op, OpValue, Process};
pub use runner::{run, Completed, RunError, Test};
