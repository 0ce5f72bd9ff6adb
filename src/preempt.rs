//! Timer driven preemption.
//!
//! A [`TickSource`] calls [`tick`] periodically. A tick that lands while a
//! thread is running makes that thread yield, exactly as if it had called
//! [`yield_now`](crate::yield_now) itself. The scheduler masks ticks while it
//! updates its queues, so a tick only ever lands in thread code.
//!
//! The default source is [`VirtualTimer`], which uses `setitimer` with
//! `ITIMER_VIRTUAL` and delivers ticks through a `SIGVTALRM` handler. The
//! timer counts CPU time consumed by the process, so threads that are
//! blocked in the kernel do not get preempted.

use std::io;
use std::mem;
use std::ptr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mask::TICK_SIGNAL;
use crate::runtime;
use crate::scheduler::Scheduler;

/// Something that calls [`tick`] periodically once armed.
pub trait TickSource {
    /// Starts ticking every `interval`, replacing any earlier period.
    fn arm(&mut self, interval: Duration) -> Result<()>;

    /// Stops ticking.
    fn disarm(&mut self) -> Result<()>;
}

/// Preempts the running thread, if any.
///
/// Called by tick sources. Outside of a run, or on an OS thread with no
/// runtime, it does nothing.
pub fn tick() {
    if let Some(sched) = runtime::installed() {
        unsafe { Scheduler::preempt(sched) }
    }
}

extern "C" fn on_tick(_signum: libc::c_int) {
    tick();
}

/// Ticks on `SIGVTALRM`, driven by the process's virtual interval timer.
///
/// The timer and the signal disposition are process wide. Each OS thread
/// only ever preempts its own runtime, so ticks received by OS threads that
/// are not running one are ignored.
#[derive(Default)]
pub struct VirtualTimer {
    previous: Option<libc::sigaction>,
}

impl VirtualTimer {
    pub fn new() -> Self {
        VirtualTimer { previous: None }
    }

    fn install_handler(&mut self) -> io::Result<()> {
        if self.previous.is_some() {
            return Ok(());
        }

        unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = on_tick as extern "C" fn(libc::c_int) as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = libc::SA_RESTART;

            let mut previous: libc::sigaction = mem::zeroed();
            if libc::sigaction(TICK_SIGNAL, &action, &mut previous) != 0 {
                return Err(io::Error::last_os_error());
            }
            self.previous = Some(previous);
        }

        Ok(())
    }

    fn set_timer(period: libc::timeval) -> io::Result<()> {
        let timer = libc::itimerval {
            it_interval: period,
            it_value: period,
        };
        if unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &timer, ptr::null_mut()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Converts `interval` to a timeval, rounding sub-microsecond periods up
/// so that they do not read as "disarmed".
fn timeval(interval: Duration) -> libc::timeval {
    let micros = interval.as_micros().max(1);
    libc::timeval {
        tv_sec: (micros / 1_000_000) as libc::time_t,
        tv_usec: (micros % 1_000_000) as libc::suseconds_t,
    }
}

impl TickSource for VirtualTimer {
    fn arm(&mut self, interval: Duration) -> Result<()> {
        self.install_handler().map_err(Error::Timer)?;
        Self::set_timer(timeval(interval)).map_err(Error::Timer)
    }

    fn disarm(&mut self) -> Result<()> {
        Self::set_timer(libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        })
        .map_err(Error::Timer)?;

        if let Some(previous) = self.previous.take() {
            if unsafe { libc::sigaction(TICK_SIGNAL, &previous, ptr::null_mut()) } != 0 {
                return Err(Error::Timer(io::Error::last_os_error()));
            }
        }

        Ok(())
    }
}
