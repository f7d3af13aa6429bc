//! Client capability set.
//!
//! A client owns one connection to one node and turns invocations into
//! terminal operations. The harness never sees the transport: a timeout or
//! reset mid-request must come back as an info op, a definite rejection as a
//! fail op. Throwing is reserved for structural problems (cannot open or
//! set up at all), which abort the run.

use thiserror::Error;

use crate::history::Op;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("open failed on {node}: {message}")]
    Open { node: String, message: String },
    #[error("client setup failed: {0}")]
    Setup(String),
    #[error("client teardown failed: {0}")]
    Teardown(String),
}

pub trait Client: Send {
    fn setup(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    /// Execute `op` against the system under test and return it completed.
    /// The returned op's kind must be terminal: ok, fail, or info.
    fn invoke(&mut self, op: Op) -> Op;

    fn teardown(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// Opens one client per worker slot. Shared across worker threads.
pub trait ClientFactory: Send + Sync {
    fn open(&self, node: &str) -> Result<Box<dyn Client>, ClientError>;
}
