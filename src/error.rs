use std::io;

use thiserror::Error;

use crate::thread::{State, Tid};

/// Errors returned by the runtime and the free functions.
///
/// All of them are local and recoverable: none of them unwinds or ends the run.
/// A run that can no longer make progress is not an error, it is reported
/// through [`Exit`](crate::Exit) by [`Runtime::start`](crate::Runtime::start).
#[derive(Debug, Error)]
pub enum Error {
    /// The thread table is full.
    #[error("thread table is full ({capacity} threads)")]
    CapacityExceeded { capacity: usize },

    /// The tid was never handed out by this runtime.
    #[error("no such thread: {0}")]
    InvalidHandle(Tid),

    /// The operation is not allowed in the thread's current state.
    #[error("cannot {op} thread {tid} while it is {state:?}")]
    InvalidOperation {
        tid: Tid,
        op: &'static str,
        state: State,
    },

    /// A free function was called on an OS thread with no running runtime.
    #[error("no runtime is running on this OS thread")]
    NoRuntime,

    /// `start` was called while a runtime is already running on this OS thread.
    #[error("a runtime is already running on this OS thread")]
    AlreadyRunning,

    #[error("preemption interval must be greater than zero")]
    InvalidInterval,

    /// The OS refused to arm the preemption timer.
    #[error("failed to arm preemption timer: {0}")]
    Timer(#[source] io::Error),

    #[error("asynchronous read was canceled")]
    Canceled,

    #[error("asynchronous read failed: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
