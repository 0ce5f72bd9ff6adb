use std::cell::Cell;
use std::ptr;
use std::time::Duration;

use log::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::preempt::{TickSource, VirtualTimer};
use crate::scheduler::{Exit, Scheduler, Snapshot};
use crate::thread::{State, ThreadFn, Tid};

// The scheduler of the run in progress on this OS thread. Set for the
// duration of `Runtime::start`, so that code running inside threads (and the
// preemption handler) can reach it without having the Runtime passed around.
thread_local! {
    static INSTALLED: Cell<*mut Scheduler> = const { Cell::new(ptr::null_mut()) };
}

pub(crate) fn installed() -> Option<*mut Scheduler> {
    let sched = INSTALLED.get();
    (!sched.is_null()).then_some(sched)
}

/// Owns a scheduler and everything it needs for a run.
///
/// Threads are created with [`create`](Runtime::create) and run by
/// [`start`](Runtime::start), which returns once no thread can make
/// progress. Code running inside a thread uses the free functions of this
/// crate ([`yield_now`], [`join`], ...) instead: they reach the runtime that
/// is running on the current OS thread.
///
/// The scheduler lives on the heap, so a `Runtime` may be moved between runs
/// even if threads are parked in the middle of one.
pub struct Runtime {
    sched: Box<Scheduler>,
    ticks: Option<Box<dyn TickSource>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Runtime {
            sched: Box::new(Scheduler::new(config)),
            ticks: None,
        }
    }

    pub fn config(&self) -> &Config {
        self.sched.config()
    }

    /// Creates a thread that will run `entry(arg)`, and queues it.
    ///
    /// `entry` must not panic: a panic cannot unwind out of a thread's
    /// stack, so it aborts the process.
    pub fn create(&mut self, entry: ThreadFn, arg: usize) -> Result<Tid> {
        self.sched.create(entry, arg)
    }

    /// Returns the result of a completed thread.
    ///
    /// Outside of a run there is nothing to block, so joining a thread that
    /// has not completed is an error here.
    pub fn join(&mut self, tid: Tid) -> Result<Option<usize>> {
        unsafe { Scheduler::join(&mut *self.sched, tid) }
    }

    pub fn suspend(&mut self, tid: Tid) -> Result<()> {
        unsafe { Scheduler::suspend(&mut *self.sched, tid) }
    }

    pub fn resume(&mut self, tid: Tid) -> Result<()> {
        self.sched.resume(tid)
    }

    pub fn terminate(&mut self, tid: Tid) -> Result<()> {
        unsafe { Scheduler::terminate(&mut *self.sched, tid) }
    }

    pub fn state(&self, tid: Tid) -> Result<State> {
        self.sched.state(tid)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.sched.snapshot()
    }

    /// Number of threads created so far.
    pub fn len(&self) -> usize {
        self.sched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of context switches performed, counting the switches into and
    /// out of each run.
    pub fn context_switches(&self) -> u64 {
        self.sched.switches()
    }

    /// Arms preemption: from now on the running thread yields every
    /// `interval` of CPU time, whether it cooperates or not.
    pub fn init(&mut self, interval: Duration) -> Result<()> {
        self.init_with(interval, VirtualTimer::new())
    }

    /// Like [`init`](Runtime::init), with a custom tick source.
    pub fn init_with<T: TickSource + 'static>(&mut self, interval: Duration, source: T) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::InvalidInterval);
        }

        if let Some(mut old) = self.ticks.take() {
            if let Err(err) = old.disarm() {
                warn!("failed to disarm previous tick source: {}", err);
            }
        }

        let mut source: Box<dyn TickSource> = Box::new(source);
        source.arm(interval)?;
        self.ticks = Some(source);

        debug!("preemption armed every {:?}", interval);

        Ok(())
    }

    /// Runs the ready threads until none is left, then reports why.
    ///
    /// Can be called again after it returns: threads that were parked in an
    /// earlier run carry on from where they stopped once they are ready.
    pub fn start(&mut self) -> Result<Exit> {
        if installed().is_some() {
            return Err(Error::AlreadyRunning);
        }

        let sched: *mut Scheduler = &mut *self.sched;
        INSTALLED.set(sched);
        let exit = unsafe { Scheduler::run(sched) };
        INSTALLED.set(ptr::null_mut());

        Ok(exit)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some(mut ticks) = self.ticks.take() {
            if let Err(err) = ticks.disarm() {
                warn!("failed to disarm tick source: {}", err);
            }
        }
    }
}

/// Creates a thread from inside a running thread. As with
/// [`Runtime::create`], a panic in `entry` aborts the process.
pub fn create(entry: ThreadFn, arg: usize) -> Result<Tid> {
    let sched = installed().ok_or(Error::NoRuntime)?;
    unsafe { (*sched).create(entry, arg) }
}

/// Gives control to the next ready thread, if there is one.
///
/// Outside of a run, or when no other thread is ready, this returns
/// immediately.
pub fn yield_now() {
    if let Some(sched) = installed() {
        unsafe { Scheduler::yield_now(sched) }
    }
}

/// The thread that is running, `None` outside of a run.
pub fn current() -> Option<Tid> {
    installed().and_then(|sched| unsafe { (*sched).current() })
}

/// Waits for `tid` to complete and returns its result.
///
/// The result is `None` for a thread that was terminated and for a thread
/// joining itself, which returns immediately.
pub fn join(tid: Tid) -> Result<Option<usize>> {
    let sched = installed().ok_or(Error::NoRuntime)?;
    unsafe { Scheduler::join(sched, tid) }
}

/// Pauses `tid` until it is resumed. Suspending the running thread switches
/// away from it immediately.
pub fn suspend(tid: Tid) -> Result<()> {
    let sched = installed().ok_or(Error::NoRuntime)?;
    unsafe { Scheduler::suspend(sched, tid) }
}

pub fn resume(tid: Tid) -> Result<()> {
    let sched = installed().ok_or(Error::NoRuntime)?;
    unsafe { (*sched).resume(tid) }
}

/// Completes `tid` on the spot. Nothing that thread would have done
/// afterwards runs, destructors included. Terminating the running thread
/// does not return.
pub fn terminate(tid: Tid) -> Result<()> {
    let sched = installed().ok_or(Error::NoRuntime)?;
    unsafe { Scheduler::terminate(sched, tid) }
}

pub fn snapshot() -> Option<Snapshot> {
    installed().map(|sched| unsafe { (*sched).snapshot() })
}
