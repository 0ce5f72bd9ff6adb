use std::cmp::Ordering;

use crate::thread::Tid;

/// A fixed-capacity FIFO of thread ids.
///
/// The storage is allocated once, up front, so pushing and popping never
/// allocate. That matters because the scheduler may run from inside the
/// preemption handler.
#[derive(Debug)]
pub struct TidQueue {
    inner: Box<[Tid]>,
    write: usize,
    read: usize,
    full: bool,
}

impl TidQueue {
    pub fn new(size: usize) -> Self {
        TidQueue {
            inner: vec![Tid(0); size].into_boxed_slice(),
            write: 0,
            read: 0,
            full: size == 0,
        }
    }

    fn size(&self) -> usize {
        self.inner.len()
    }

    pub fn len(&self) -> usize {
        if self.full {
            return self.size();
        }

        match self.write.cmp(&self.read) {
            Ordering::Equal => 0,
            Ordering::Greater => self.write - self.read,
            Ordering::Less => self.size() + self.write - self.read,
        }
    }

    fn inc_write(&mut self) {
        self.write = (self.write + 1) % self.size();
        self.full = self.write == self.read;
    }

    fn inc_read(&mut self) {
        self.read = (self.read + 1) % self.size();
        self.full = false;
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Removes the id at the front.
    pub fn pop(&mut self) -> Option<Tid> {
        if self.is_empty() {
            return None;
        }

        let ret = self.inner[self.read];
        self.inc_read();

        Some(ret)
    }

    /// Appends an id at the back, handing it back if the queue is full.
    pub fn push(&mut self, tid: Tid) -> Result<(), Tid> {
        if self.is_full() {
            return Err(tid);
        }

        self.inner[self.write] = tid;
        self.inc_write();

        Ok(())
    }

    /// Iterates from front to back.
    pub fn iter(&self) -> impl Iterator<Item = Tid> + '_ {
        (0..self.len()).map(move |i| self.inner[(self.read + i) % self.size()])
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.iter().any(|t| t == tid)
    }

    /// Keeps only the ids for which `keep` returns true, preserving order.
    pub fn retain(&mut self, mut keep: impl FnMut(Tid) -> bool) {
        for _ in 0..self.len() {
            if let Some(tid) = self.pop() {
                if keep(tid) {
                    // a slot was just freed by the pop
                    let _ = self.push(tid);
                }
            }
        }
    }

    /// Removes `tid` wherever it is. Returns whether it was present.
    pub fn remove(&mut self, tid: Tid) -> bool {
        let before = self.len();
        self.retain(|t| t != tid);
        self.len() != before
    }

    pub fn to_vec(&self) -> Vec<Tid> {
        self.iter().collect()
    }
}
