//! User-level threads multiplexed on a single OS thread.
//!
//! Each thread gets its own heap-allocated stack. Switching between threads
//! saves and restores registers by hand, so no kernel thread is involved.
//! Threads give up the CPU when they [`yield_now`], [`join`] a thread that
//! has not completed, [`suspend`] themselves or finish. Once preemption is
//! armed with [`Runtime::init`], a periodic tick also makes the running
//! thread yield on its behalf.
//!
//! ```no_run
//! use uthread::{Exit, Runtime};
//!
//! fn child(x: usize) -> usize {
//!     x * 2
//! }
//!
//! fn parent(_: usize) -> usize {
//!     let tid = uthread::create(child, 5).unwrap();
//!     uthread::join(tid).unwrap().unwrap_or(0)
//! }
//!
//! let mut runtime = Runtime::new();
//! let tid = runtime.create(parent, 0).unwrap();
//! assert_eq!(runtime.start().unwrap(), Exit::Complete);
//! assert_eq!(runtime.join(tid).unwrap(), Some(10));
//! ```
//!
//! Only one flow of control exists at any time: the scheduler protects its
//! state by masking the preemption signal, never with locks.
//!
//! Threads never unwind. A panic inside a thread aborts the process, and a
//! thread that is terminated does not run its destructors.

#[cfg(not(all(target_arch = "x86_64", unix)))]
compile_error!("uthread only supports x86_64 unix targets");

pub mod aio;
mod config;
mod context;
mod error;
mod mask;
pub mod preempt;
mod queue;
mod runtime;
mod scheduler;
mod thread;

pub use aio::async_read;
pub use config::{Config, DEFAULT_CAPACITY, DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
pub use error::{Error, Result};
pub use mask::without_preemption;
pub use runtime::{create, current, join, resume, snapshot, suspend, terminate, yield_now, Runtime};
pub use scheduler::{Exit, Snapshot};
pub use thread::{State, ThreadFn, Tid};
