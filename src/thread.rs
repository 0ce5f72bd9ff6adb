use std::fmt;

use crate::context::Context;

/// Entry point of a thread: takes one opaque argument and produces one
/// opaque result.
pub type ThreadFn = fn(usize) -> usize;

/// Uniquely identifies a thread within a runtime.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
#[repr(transparent)]
pub struct Tid(pub usize);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Possible states that a thread can be in during its lifetime.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum State {
    /// Thread is in the ready queue, waiting to be picked.
    Ready,
    /// Thread is making progress.
    Running,
    /// Thread is blocked in a join until another thread completes.
    Waiting,
    /// Thread was paused by `suspend` and will not run until resumed.
    Suspended,
    /// Thread has returned or was terminated. This is final.
    Complete,
}

/// A fixed-size stack owned by one thread.
pub struct Stack(Box<[u8]>);

impl Stack {
    pub fn new(size: usize) -> Self {
        Stack(vec![0_u8; size].into_boxed_slice())
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.0.as_ptr())
            .field("len", &self.len())
            .finish()
    }
}

/// Represents a thread in our runtime: its thread control block.
#[derive(Debug)]
pub struct Thread {
    /// Uniquely identifies a thread.
    pub id: Tid,
    /// Stack used by the thread to run the function passed.
    /// `None` once the thread is complete and the stack was handed back.
    pub stack: Option<Stack>,
    /// Stores the thread context between successive runs.
    pub ctx: Context,
    /// Represents the current state of the thread.
    pub state: State,
    /// Function and argument to run, taken when the thread first runs.
    pub entry: Option<(ThreadFn, usize)>,
    /// Value returned by the entry function. Stays `None` if the thread
    /// was terminated before returning.
    pub result: Option<usize>,
    /// Thread this one is joining, if any.
    pub waiting_for: Option<Tid>,
}

impl Thread {
    pub fn new(id: Tid, entry: ThreadFn, arg: usize, stack_size: usize) -> Self {
        Thread {
            id,
            stack: Some(Stack::new(stack_size)),
            ctx: Context::default(),
            state: State::Ready,
            entry: Some((entry, arg)),
            result: None,
            waiting_for: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }
}
