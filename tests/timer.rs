//! Preemption by the real virtual timer. The timer and the SIGVTALRM
//! disposition are process wide, so these tests take turns.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uthread::{Exit, Runtime};

static TIMER: Mutex<()> = Mutex::new(());
static FLAG: AtomicBool = AtomicBool::new(false);

thread_local! {
    static TRACE: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

fn record(event: &'static str) {
    TRACE.with(|t| t.borrow_mut().push(event));
}

/// Spins until the flag is raised, without ever yielding. Only preemption
/// lets the other thread run.
fn spin_until_flag(_: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if FLAG.load(Ordering::SeqCst) {
            return 1;
        }
        std::hint::spin_loop();
    }
    0
}

fn raise_flag(_: usize) -> usize {
    FLAG.store(true, Ordering::SeqCst);
    0
}

#[test]
fn timer_preempts_a_busy_thread() {
    let _turn = TIMER.lock().unwrap_or_else(|e| e.into_inner());
    FLAG.store(false, Ordering::SeqCst);

    let mut rt = Runtime::new();
    let spinner = rt.create(spin_until_flag, 0).unwrap();
    rt.create(raise_flag, 0).unwrap();
    rt.init(Duration::from_millis(1)).unwrap();

    assert_eq!(rt.start().unwrap(), Exit::Complete);
    assert_eq!(rt.join(spinner).unwrap(), Some(1));
    assert!(rt.context_switches() >= 4);
}

fn interrupted(_: usize) -> usize {
    record("A1");
    unsafe { libc::raise(libc::SIGVTALRM) };
    record("A2");
    0
}

fn other(_: usize) -> usize {
    record("B");
    0
}

#[test]
fn tick_signal_switches_threads() {
    let _turn = TIMER.lock().unwrap_or_else(|e| e.into_inner());

    let mut rt = Runtime::new();
    rt.create(interrupted, 0).unwrap();
    rt.create(other, 0).unwrap();
    // long enough that only the raised signal preempts
    rt.init(Duration::from_secs(3600)).unwrap();

    assert_eq!(rt.start().unwrap(), Exit::Complete);
    assert_eq!(TRACE.with(|t| t.borrow().clone()), ["A1", "B", "A2"]);
}
