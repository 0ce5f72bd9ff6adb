use std::time::Duration;

use log::info;
use uthread::{without_preemption, Config, Exit, Runtime, ThreadFn, Tid};

// Demo scenarios: plain interleaving, create-and-join, and a merge sort that
// spawns a thread per half while preemption is armed.

const SORT_LEN: usize = 256;
const TIME_SLICE: Duration = Duration::from_micros(500);

fn say_hello(_: usize) -> usize {
    let id = uthread::current().map_or(usize::MAX, |t| t.0);
    println!("hello from thread {}", id);
    id
}

fn counter(rounds: usize) -> usize {
    let id = uthread::current().map_or(usize::MAX, |t| t.0);
    for i in 0..rounds {
        println!("thread: {} counter: {}", id, i);
        uthread::yield_now();
    }
    rounds
}

fn ten(_: usize) -> usize {
    10
}

fn spawn_and_join(_: usize) -> usize {
    let child = match uthread::create(ten, 0) {
        Ok(tid) => tid,
        Err(err) => {
            println!("could not create child: {}", err);
            return 0;
        }
    };
    match uthread::join(child) {
        Ok(value) => {
            println!("child {} returned {:?}", child, value);
            value.unwrap_or(0)
        }
        Err(err) => {
            println!("join failed: {}", err);
            0
        }
    }
}

/// Half-open range of the array to sort, handed to a thread as its argument.
struct Span {
    data: *mut i64,
    lo: usize,
    hi: usize,
}

fn spawn_sort(data: *mut i64, lo: usize, hi: usize) -> Option<Tid> {
    let span = without_preemption(|| Box::into_raw(Box::new(Span { data, lo, hi })));
    match uthread::create(sort_thread, span as usize) {
        Ok(tid) => Some(tid),
        Err(err) => {
            without_preemption(|| drop(unsafe { Box::from_raw(span) }));
            println!("could not spawn sort thread: {}", err);
            None
        }
    }
}

fn sort_thread(arg: usize) -> usize {
    let Span { data, lo, hi } = without_preemption(|| *unsafe { Box::from_raw(arg as *mut Span) });
    if hi - lo < 2 {
        return 0;
    }

    let mid = lo + (hi - lo) / 2;
    let left = spawn_sort(data, lo, mid);
    let right = spawn_sort(data, mid, hi);
    for tid in [left, right].into_iter().flatten() {
        if let Err(err) = uthread::join(tid) {
            println!("join of sort thread {} failed: {}", tid, err);
        }
    }

    // SAFETY: the array outlives the run and sibling threads work on
    // disjoint ranges; both halves are done at this point.
    let slice = unsafe { std::slice::from_raw_parts_mut(data.add(lo), hi - lo) };
    without_preemption(|| merge(slice, mid - lo));
    0
}

fn merge(slice: &mut [i64], mid: usize) {
    let left = slice[..mid].to_vec();
    let right = slice[mid..].to_vec();
    let (mut i, mut j) = (0, 0);
    for slot in slice.iter_mut() {
        if j >= right.len() || (i < left.len() && left[i] <= right[j]) {
            *slot = left[i];
            i += 1;
        } else {
            *slot = right[j];
            j += 1;
        }
    }
}

fn main() {
    env_logger::init();

    // Round robin between a few threads.
    let mut runtime = Runtime::new();
    let entries: [(ThreadFn, usize); 5] = [
        (say_hello, 0),
        (say_hello, 0),
        (say_hello, 0),
        (counter, 3),
        (counter, 3),
    ];
    for (entry, arg) in entries {
        if let Err(err) = runtime.create(entry, arg) {
            println!("create failed: {}", err);
        }
    }
    match runtime.start() {
        Ok(exit) => info!("first run: {:?}", exit),
        Err(err) => println!("start failed: {}", err),
    }

    // A thread creating another one and joining it.
    let mut runtime = Runtime::new();
    if let Ok(parent) = runtime.create(spawn_and_join, 0) {
        if let Ok(Exit::Complete) = runtime.start() {
            println!(
                "parent {} got {:?} after {} context switches",
                parent,
                runtime.join(parent).ok().flatten(),
                runtime.context_switches()
            );
        }
    }

    // Merge sort, one thread per half, preempted every TIME_SLICE.
    let mut data: Vec<i64> = (0..SORT_LEN as i64).map(|i| (i * 7919 + 13) % 1009).collect();
    println!("Given array is\n{:?}", data);

    let config = Config::default().with_capacity(2 * SORT_LEN);
    let mut runtime = Runtime::with_config(config);
    if spawn_sort_root(&mut runtime, &mut data).is_none() {
        return;
    }
    if let Err(err) = runtime.init(TIME_SLICE) {
        println!("running without preemption: {}", err);
    }
    match runtime.start() {
        Ok(exit) => info!("sort run: {:?} ({} switches)", exit, runtime.context_switches()),
        Err(err) => println!("start failed: {}", err),
    }
    println!("Sorted array is\n{:?}", data);
}

fn spawn_sort_root(runtime: &mut Runtime, data: &mut [i64]) -> Option<Tid> {
    let span = Box::into_raw(Box::new(Span {
        data: data.as_mut_ptr(),
        lo: 0,
        hi: data.len(),
    }));
    match runtime.create(sort_thread, span as usize) {
        Ok(tid) => Some(tid),
        Err(err) => {
            drop(unsafe { Box::from_raw(span) });
            println!("could not spawn sort thread: {}", err);
            None
        }
    }
}
