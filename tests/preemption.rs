use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use uthread::preempt::{tick, TickSource};
use uthread::{current, Error, Exit, Runtime, Result};

thread_local! {
    static TRACE: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn record(event: impl Into<String>) {
    TRACE.with(|t| t.borrow_mut().push(event.into()));
}

fn take_trace() -> Vec<String> {
    TRACE.with(|t| std::mem::take(&mut *t.borrow_mut()))
}

/// Tick source driven by hand: it only logs what the runtime asks of it.
struct Manual {
    name: &'static str,
    calls: Rc<RefCell<Vec<String>>>,
}

impl Manual {
    fn new(name: &'static str, calls: &Rc<RefCell<Vec<String>>>) -> Self {
        Manual {
            name,
            calls: Rc::clone(calls),
        }
    }
}

impl TickSource for Manual {
    fn arm(&mut self, interval: Duration) -> Result<()> {
        self.calls.borrow_mut().push(format!("{} arm {:?}", self.name, interval));
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        self.calls.borrow_mut().push(format!("{} disarm", self.name));
        Ok(())
    }
}

struct Broken;

impl TickSource for Broken {
    fn arm(&mut self, _: Duration) -> Result<()> {
        Err(Error::Timer(io::Error::other("no timer available")))
    }

    fn disarm(&mut self) -> Result<()> {
        panic!("a source that failed to arm is never disarmed");
    }
}

#[test]
fn source_is_armed_then_disarmed_on_drop() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut rt = Runtime::new();
    rt.init_with(Duration::from_millis(10), Manual::new("first", &calls)).unwrap();
    assert_eq!(*calls.borrow(), ["first arm 10ms"]);

    drop(rt);
    assert_eq!(*calls.borrow(), ["first arm 10ms", "first disarm"]);
}

#[test]
fn rearming_replaces_the_previous_source() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut rt = Runtime::new();
    rt.init_with(Duration::from_millis(10), Manual::new("first", &calls)).unwrap();
    rt.init_with(Duration::from_millis(2), Manual::new("second", &calls)).unwrap();

    drop(rt);
    assert_eq!(
        *calls.borrow(),
        ["first arm 10ms", "first disarm", "second arm 2ms", "second disarm"]
    );
}

#[test]
fn zero_interval_is_rejected() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut rt = Runtime::new();
    assert!(matches!(
        rt.init_with(Duration::ZERO, Manual::new("first", &calls)),
        Err(Error::InvalidInterval)
    ));
    assert!(matches!(rt.init(Duration::ZERO), Err(Error::InvalidInterval)));

    drop(rt);
    assert!(calls.borrow().is_empty());
}

#[test]
fn arm_failure_is_reported() {
    let mut rt = Runtime::new();
    assert!(matches!(
        rt.init_with(Duration::from_millis(1), Broken),
        Err(Error::Timer(_))
    ));
}

fn ticking(rounds: usize) -> usize {
    let id = current().map_or(usize::MAX, |t| t.0);
    for _ in 0..rounds {
        record(id.to_string());
        // what the tick handler does when the timer fires
        tick();
    }
    rounds
}

#[test]
fn tick_preempts_the_running_thread() {
    take_trace();
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut rt = Runtime::new();
    rt.init_with(Duration::from_millis(1), Manual::new("manual", &calls)).unwrap();
    rt.create(ticking, 3).unwrap();
    rt.create(ticking, 3).unwrap();

    assert_eq!(rt.start().unwrap(), Exit::Complete);
    assert_eq!(take_trace(), ["0", "1", "0", "1", "0", "1"]);
}

#[test]
fn tick_with_nothing_else_ready_keeps_running() {
    take_trace();
    let mut rt = Runtime::new();
    rt.create(ticking, 3).unwrap();

    assert_eq!(rt.start().unwrap(), Exit::Complete);
    assert_eq!(take_trace(), ["0", "0", "0"]);
    assert_eq!(rt.context_switches(), 2);
}

#[test]
fn tick_outside_a_run_does_nothing() {
    let mut rt = Runtime::new();
    rt.create(ticking, 1).unwrap();
    tick();
    assert_eq!(rt.context_switches(), 0);
    assert_eq!(rt.snapshot().current, None);
}
