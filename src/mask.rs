//! Critical sections against the preemption tick.
//!
//! Blocking the tick signal is the only lock the scheduler needs: there is a
//! single flow of control, and the tick handler is the only thing that can
//! interleave with it.

use std::mem::MaybeUninit;
use std::ptr;

use log::error;

/// The signal that delivers preemption ticks.
pub(crate) const TICK_SIGNAL: libc::c_int = libc::SIGVTALRM;

fn tick_set() -> libc::sigset_t {
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), TICK_SIGNAL);
        set.assume_init()
    }
}

fn sigmask(how: libc::c_int, set: *const libc::sigset_t, old: *mut libc::sigset_t) {
    let rc = unsafe { libc::pthread_sigmask(how, set, old) };
    if rc != 0 {
        // Without masking the scheduler cannot protect its queues.
        error!("pthread_sigmask failed with {}", rc);
        std::process::abort();
    }
}

/// Blocks the tick while alive and puts back the previous mask on drop.
///
/// A guard held across a context switch is dropped by the same thread once
/// it is resumed, so each thread gets back the mask it had when it entered
/// the scheduler. Inside the tick handler that mask still blocks the tick,
/// and returning from the handler unblocks it.
pub(crate) struct Masked {
    old: libc::sigset_t,
}

impl Masked {
    pub(crate) fn new() -> Self {
        let set = tick_set();
        let mut old = MaybeUninit::<libc::sigset_t>::uninit();
        sigmask(libc::SIG_BLOCK, &set, old.as_mut_ptr());
        Masked {
            old: unsafe { old.assume_init() },
        }
    }
}

impl Drop for Masked {
    fn drop(&mut self) {
        sigmask(libc::SIG_SETMASK, &self.old, ptr::null_mut());
    }
}

/// Unblocks the tick. Fresh threads start with it unblocked.
pub(crate) fn unmask() {
    let set = tick_set();
    sigmask(libc::SIG_UNBLOCK, &set, ptr::null_mut());
}

/// Runs `f` with preemption disabled.
///
/// Code that must not be interrupted by a tick, such as allocating or
/// writing to stdout from a preemptible thread, belongs in here.
pub fn without_preemption<R>(f: impl FnOnce() -> R) -> R {
    let _masked = Masked::new();
    f()
}

#[cfg(test)]
pub(crate) fn is_masked() -> bool {
    unsafe {
        let mut cur = MaybeUninit::<libc::sigset_t>::uninit();
        sigmask(libc::SIG_BLOCK, ptr::null(), cur.as_mut_ptr());
        libc::sigismember(cur.as_ptr(), TICK_SIGNAL) == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_masks_and_restores() {
        unmask();
        assert!(!is_masked());
        {
            let _outer = Masked::new();
            assert!(is_masked());
            {
                let _inner = Masked::new();
                assert!(is_masked());
            }
            // the inner guard found the tick already blocked
            assert!(is_masked());
        }
        assert!(!is_masked());
    }

    #[test]
    fn without_preemption_masks_the_closure() {
        unmask();
        assert!(without_preemption(is_masked));
        assert!(!is_masked());
    }
}
