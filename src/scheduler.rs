//! The scheduler core: the one place where threads change queues and where
//! context switches happen.
//!
//! Every operation runs inside a [`Masked`] critical section. The switching
//! operations keep their guard alive across the switch: the thread that is
//! switched out gets it back when it is resumed, drops it on the way out of
//! the scheduler, and so leaves with the signal mask it came in with.
//!
//! The operations that may switch take the scheduler as a raw pointer
//! instead of `&mut self`. While a thread is switched out, other threads
//! mutate the scheduler through the same pointer, so no reference to it may
//! be held across a switch.

use std::mem;
use std::process;
use std::ptr;

use log::{debug, error, trace, warn};

use crate::config::Config;
use crate::context::{self, Context};
use crate::error::{Error, Result};
use crate::mask::{self, Masked};
use crate::queue::TidQueue;
use crate::runtime;
use crate::thread::{Stack, State, Thread, ThreadFn, Tid};

/// Why a run ended, as reported by [`Runtime::start`](crate::Runtime::start).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// Every thread created so far has completed.
    Complete,
    /// Nothing is ready and some threads are blocked in `join`: they cannot
    /// make progress unless the embedding code intervenes.
    Deadlock {
        waiting: Vec<Tid>,
        suspended: Vec<Tid>,
    },
    /// Nothing is ready and nothing is joining, but some threads are
    /// suspended. Resuming them and starting again continues the work.
    Suspended { suspended: Vec<Tid> },
}

/// Where every live thread is at a given moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub current: Option<Tid>,
    pub ready: Vec<Tid>,
    pub waiting: Vec<Tid>,
    pub suspended: Vec<Tid>,
}

/// Queue a thread is parked on when it blocks.
#[derive(Debug, Clone, Copy)]
enum Blocked {
    Waiting,
    Suspended,
}

pub(crate) struct Scheduler {
    config: Config,
    /// Thread table, indexed by tid. Its capacity is reserved up front and
    /// never exceeded, so the contexts inside it never move.
    threads: Vec<Thread>,
    ready: TidQueue,
    waiting: TidQueue,
    suspended: TidQueue,
    /// Thread that is currently running, `None` outside a run.
    current: Option<Tid>,
    /// Context of whoever called `start`, resumed when the run ends.
    main: Context,
    /// Stack of a thread that completed itself. It was still in use when the
    /// thread finished, so it is released by the next context to run.
    parked: Option<Stack>,
    switches: u64,
}

fn enqueue(queue: &mut TidQueue, tid: Tid) {
    debug_assert!(!queue.contains(tid), "{} queued twice", tid);
    // every queue can hold the whole thread table
    let pushed = queue.push(tid);
    debug_assert!(pushed.is_ok(), "queue overflow on {}", tid);
}

impl Scheduler {
    pub(crate) fn new(config: Config) -> Self {
        Scheduler {
            config,
            threads: Vec::with_capacity(config.capacity),
            ready: TidQueue::new(config.capacity),
            waiting: TidQueue::new(config.capacity),
            suspended: TidQueue::new(config.capacity),
            current: None,
            main: Context::default(),
            parked: None,
            switches: 0,
        }
    }

    fn thread(&self, tid: Tid) -> Result<&Thread> {
        self.threads.get(tid.0).ok_or(Error::InvalidHandle(tid))
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn current(&self) -> Option<Tid> {
        self.current
    }

    pub(crate) fn len(&self) -> usize {
        self.threads.len()
    }

    pub(crate) fn switches(&self) -> u64 {
        self.switches
    }

    pub(crate) fn state(&self, tid: Tid) -> Result<State> {
        self.thread(tid).map(|t| t.state)
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let _masked = Masked::new();
        Snapshot {
            current: self.current,
            ready: self.ready.to_vec(),
            waiting: self.waiting.to_vec(),
            suspended: self.suspended.to_vec(),
        }
    }

    fn release_parked(&mut self) {
        self.parked = None;
    }

    pub(crate) fn create(&mut self, entry: ThreadFn, arg: usize) -> Result<Tid> {
        let _masked = Masked::new();

        if self.threads.len() >= self.config.capacity {
            return Err(Error::CapacityExceeded {
                capacity: self.config.capacity,
            });
        }

        let tid = Tid(self.threads.len());
        let mut thread = Thread::new(tid, entry, arg, self.config.stack_size);
        if let Some(stack) = thread.stack.as_mut() {
            thread.ctx = Context::fresh(stack.as_mut_slice(), trampoline);
        }

        debug!("spawned new thread: {}", thread.id);

        self.threads.push(thread);
        enqueue(&mut self.ready, tid);

        Ok(tid)
    }

    /// Marks `tid` complete, gives back its stack and readies its joiners.
    ///
    /// `on_own_stack` is set when `tid` is the thread calling this: its
    /// stack cannot be freed until another context is running.
    fn finish(&mut self, tid: Tid, on_own_stack: bool) {
        let thread = &mut self.threads[tid.0];
        thread.state = State::Complete;
        thread.entry = None;
        thread.waiting_for = None;
        let stack = thread.stack.take();
        if on_own_stack {
            self.parked = stack;
        } else {
            drop(stack);
        }

        let Scheduler {
            threads,
            ready,
            waiting,
            suspended,
            ..
        } = self;

        waiting.retain(|w| {
            let waiter = &mut threads[w.0];
            if waiter.waiting_for != Some(tid) {
                return true;
            }
            waiter.waiting_for = None;
            waiter.state = State::Ready;
            enqueue(ready, w);
            false
        });

        // A suspended joiner no longer has anything to wait for: resuming it
        // must put it in the ready queue.
        for s in suspended.iter() {
            let waiter = &mut threads[s.0];
            if waiter.waiting_for == Some(tid) {
                waiter.waiting_for = None;
            }
        }

        debug!("thread {} complete", tid);
    }

    /// Pops the next ready thread and makes it current, returning the
    /// context to switch to. With nothing ready the run is over and the
    /// context of the caller of `start` is returned instead.
    fn dispatch(&mut self) -> *const Context {
        match self.ready.pop() {
            Some(next) => {
                self.threads[next.0].state = State::Running;
                self.current = Some(next);
                &self.threads[next.0].ctx as *const Context
            }
            None => {
                self.current = None;
                &self.main as *const Context
            }
        }
    }

    /// Moves the current thread to the back of the ready queue and runs the
    /// front one. Does nothing if no other thread is ready.
    pub(crate) unsafe fn yield_now(this: *mut Scheduler) {
        Self::rotate(this, true);
    }

    /// Same as [`yield_now`](Self::yield_now), on behalf of the preemption
    /// tick. This path does not log: it can interrupt any code, including
    /// the logger itself.
    pub(crate) unsafe fn preempt(this: *mut Scheduler) {
        Self::rotate(this, false);
    }

    unsafe fn rotate(this: *mut Scheduler, log: bool) {
        let _masked = Masked::new();

        let (old, new) = {
            let s = &mut *this;
            let Some(cur) = s.current else {
                return;
            };
            let Some(next) = s.ready.pop() else {
                return;
            };

            if log {
                trace!("switching from {} to {}", cur, next);
            }

            enqueue(&mut s.ready, cur);
            s.threads[cur.0].state = State::Ready;
            s.threads[next.0].state = State::Running;
            s.current = Some(next);
            s.switches += 1;

            let old: *mut Context = &mut s.threads[cur.0].ctx;
            let new: *const Context = &s.threads[next.0].ctx;
            (old, new)
        };

        context::switch(old, new);

        // resumed: we are current again
        (*this).release_parked();
    }

    /// Parks the current thread on `queue` and switches to the next ready
    /// thread, ending the run if there is none. Returns once the thread is
    /// picked again. The caller holds the critical section.
    unsafe fn park(this: *mut Scheduler, queue: Blocked) {
        let (old, new) = {
            let s = &mut *this;
            let Some(cur) = s.current else {
                return;
            };

            match queue {
                Blocked::Waiting => {
                    enqueue(&mut s.waiting, cur);
                    s.threads[cur.0].state = State::Waiting;
                }
                Blocked::Suspended => {
                    enqueue(&mut s.suspended, cur);
                    s.threads[cur.0].state = State::Suspended;
                }
            }

            let new = s.dispatch();
            match s.current {
                Some(next) => trace!("{} blocked ({:?}), switching to {}", cur, queue, next),
                None => debug!("{} blocked ({:?}) with nothing ready, ending the run", cur, queue),
            }
            s.switches += 1;

            let old: *mut Context = &mut s.threads[cur.0].ctx;
            (old, new)
        };

        context::switch(old, new);

        (*this).release_parked();
    }

    /// Completes the running thread `tid` with `result` and switches away
    /// for good.
    pub(crate) unsafe fn exit(this: *mut Scheduler, tid: Tid, result: Option<usize>) -> ! {
        // Never dropped: the context we restore puts back its own mask.
        mem::forget(Masked::new());

        let new = {
            let s = &mut *this;
            s.threads[tid.0].result = result;
            s.current = None;
            s.finish(tid, true);
            let new = s.dispatch();
            s.switches += 1;
            new
        };

        context::restore(new)
    }

    pub(crate) unsafe fn join(this: *mut Scheduler, tid: Tid) -> Result<Option<usize>> {
        let masked = Masked::new();

        {
            let s = &mut *this;
            let target = s.thread(tid)?;
            if target.is_complete() {
                return Ok(target.result);
            }

            let Some(cur) = s.current else {
                // nothing to block outside of a run
                return Err(Error::InvalidOperation {
                    tid,
                    op: "join",
                    state: target.state,
                });
            };
            if cur == tid {
                return Ok(None);
            }

            debug!("thread {} joins {}", cur, tid);
            s.threads[cur.0].waiting_for = Some(tid);
        }

        Self::park(this, Blocked::Waiting);
        drop(masked);

        // We are only made ready again once the target has completed.
        let s = &*this;
        Ok(s.threads[tid.0].result)
    }

    pub(crate) unsafe fn suspend(this: *mut Scheduler, tid: Tid) -> Result<()> {
        let _masked = Masked::new();
        let s = &mut *this;

        let state = s.thread(tid)?.state;
        match state {
            State::Complete | State::Suspended => {
                return Err(Error::InvalidOperation {
                    tid,
                    op: "suspend",
                    state,
                });
            }
            State::Running => {
                debug!("thread {} suspends itself", tid);
                Self::park(this, Blocked::Suspended);
                return Ok(());
            }
            State::Ready => {
                s.ready.remove(tid);
            }
            State::Waiting => {
                s.waiting.remove(tid);
            }
        }

        enqueue(&mut s.suspended, tid);
        s.threads[tid.0].state = State::Suspended;
        debug!("thread {} suspended ({:?} before)", tid, state);

        Ok(())
    }

    pub(crate) fn resume(&mut self, tid: Tid) -> Result<()> {
        let _masked = Masked::new();

        let state = self.thread(tid)?.state;
        if state != State::Suspended {
            return Err(Error::InvalidOperation {
                tid,
                op: "resume",
                state,
            });
        }

        self.suspended.remove(tid);
        let thread = &mut self.threads[tid.0];
        if thread.waiting_for.is_some() {
            thread.state = State::Waiting;
            enqueue(&mut self.waiting, tid);
        } else {
            thread.state = State::Ready;
            enqueue(&mut self.ready, tid);
        }

        debug!("thread {} resumed as {:?}", tid, self.threads[tid.0].state);

        Ok(())
    }

    pub(crate) unsafe fn terminate(this: *mut Scheduler, tid: Tid) -> Result<()> {
        let _masked = Masked::new();
        let s = &mut *this;

        let state = s.thread(tid)?.state;
        match state {
            State::Complete => {
                return Err(Error::InvalidOperation {
                    tid,
                    op: "terminate",
                    state,
                });
            }
            State::Running => {
                debug!("thread {} terminates itself", tid);
                Self::exit(this, tid, None);
            }
            State::Ready => {
                s.ready.remove(tid);
            }
            State::Waiting => {
                s.waiting.remove(tid);
            }
            State::Suspended => {
                s.suspended.remove(tid);
            }
        }

        debug!("terminating thread {} ({:?})", tid, state);
        s.finish(tid, false);

        Ok(())
    }

    /// Runs ready threads until none is left and reports why it stopped.
    /// Only called through `Runtime::start`, with the scheduler installed.
    pub(crate) unsafe fn run(this: *mut Scheduler) -> Exit {
        let _masked = Masked::new();

        let new = {
            let s = &mut *this;
            if s.ready.is_empty() {
                return s.exit_status();
            }
            let new = s.dispatch();
            debug!("started running with thread {:?}", s.current);
            s.switches += 1;
            new
        };

        context::switch(ptr::addr_of_mut!((*this).main), new);

        let s = &mut *this;
        s.release_parked();
        let exit = s.exit_status();
        match &exit {
            Exit::Deadlock { waiting, .. } => warn!("run deadlocked, threads {:?} wait forever", waiting),
            exit => debug!("run ended: {:?}", exit),
        }
        exit
    }

    fn exit_status(&self) -> Exit {
        if !self.waiting.is_empty() {
            Exit::Deadlock {
                waiting: self.waiting.to_vec(),
                suspended: self.suspended.to_vec(),
            }
        } else if !self.suspended.is_empty() {
            Exit::Suspended {
                suspended: self.suspended.to_vec(),
            }
        } else {
            Exit::Complete
        }
    }
}

/// Where every fresh context starts.
///
/// The thread to run is whichever one the scheduler just made current; its
/// entry is called with the tick unmasked, and its return value completes
/// the thread.
extern "C" fn trampoline() -> ! {
    let Some(this) = runtime::installed() else {
        error!("thread started without an installed scheduler");
        process::abort();
    };

    unsafe {
        // Still inside the critical section of whoever switched to us.
        let s = &mut *this;
        s.release_parked();
        let Some(tid) = s.current else {
            error!("thread started with no current tid");
            process::abort();
        };
        let entry = s.threads[tid.0].entry.take();

        mask::unmask();
        let result = entry.map(|(f, arg)| f(arg));

        Scheduler::exit(this, tid, result)
    }
}
