//! Reads that block the calling thread without blocking the OS thread.
//!
//! A read is submitted to a [`ReadSource`], then polled. While the poll says
//! the read is in progress, the calling thread yields, so every other ready
//! thread gets to run between two polls.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

use log::warn;

use crate::error::{Error, Result};
use crate::runtime::yield_now;

/// Progress of a submitted read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    InProgress,
    Canceled,
    /// The read finished with this many bytes.
    Done(usize),
}

/// A non-blocking read primitive.
pub trait ReadSource {
    /// Starts reading up to `len` bytes into `buf`.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for `len` bytes of writes until [`poll`] stops
    /// returning [`ReadStatus::InProgress`].
    ///
    /// [`poll`]: ReadSource::poll
    unsafe fn submit(&mut self, buf: *mut u8, len: usize) -> io::Result<()>;

    fn poll(&mut self) -> io::Result<ReadStatus>;
}

/// Reads into `buf` from `source`, yielding until the read is over.
///
/// If the calling thread is terminated while the read is in flight the
/// source is leaked along with the rest of the thread, and a kernel-side
/// read may still land in `buf`.
pub fn read<S: ReadSource + ?Sized>(source: &mut S, buf: &mut [u8]) -> Result<usize> {
    unsafe { source.submit(buf.as_mut_ptr(), buf.len())? };

    loop {
        match source.poll()? {
            ReadStatus::InProgress => yield_now(),
            ReadStatus::Canceled => return Err(Error::Canceled),
            ReadStatus::Done(n) => return Ok(n),
        }
    }
}

/// Reads up to `buf.len()` bytes from the start of `fd` with POSIX aio.
pub fn async_read(fd: RawFd, buf: &mut [u8]) -> Result<usize> {
    read(&mut Aio::new(fd), buf)
}

/// POSIX asynchronous I/O (`aio_read`) on a file descriptor.
pub struct Aio {
    // The kernel or the aio helper threads keep a pointer to the control
    // block while a request is in flight, so it lives on the heap.
    cb: Box<libc::aiocb>,
    in_flight: bool,
}

impl Aio {
    pub fn new(fd: RawFd) -> Self {
        Self::at(fd, 0)
    }

    /// Reads from `offset` instead of the start of the file.
    pub fn at(fd: RawFd, offset: u64) -> Self {
        let mut cb: Box<libc::aiocb> = Box::new(unsafe { mem::zeroed() });
        cb.aio_fildes = fd;
        cb.aio_offset = offset as libc::off_t;
        cb.aio_sigevent.sigev_notify = libc::SIGEV_NONE;
        Aio {
            cb,
            in_flight: false,
        }
    }
}

impl ReadSource for Aio {
    unsafe fn submit(&mut self, buf: *mut u8, len: usize) -> io::Result<()> {
        self.cb.aio_buf = buf.cast();
        self.cb.aio_nbytes = len;
        if libc::aio_read(&mut *self.cb) != 0 {
            return Err(io::Error::last_os_error());
        }
        self.in_flight = true;
        Ok(())
    }

    fn poll(&mut self) -> io::Result<ReadStatus> {
        match unsafe { libc::aio_error(&*self.cb) } {
            libc::EINPROGRESS => Ok(ReadStatus::InProgress),
            libc::ECANCELED => {
                self.in_flight = false;
                Ok(ReadStatus::Canceled)
            }
            0 => {
                self.in_flight = false;
                let n = unsafe { libc::aio_return(&mut *self.cb) };
                Ok(ReadStatus::Done(n as usize))
            }
            -1 => Err(io::Error::last_os_error()),
            errno => {
                self.in_flight = false;
                // reap the request
                unsafe { libc::aio_return(&mut *self.cb) };
                Err(io::Error::from_raw_os_error(errno))
            }
        }
    }
}

impl Drop for Aio {
    fn drop(&mut self) {
        if !self.in_flight {
            return;
        }

        // The control block must outlive the request: cancel it and wait.
        unsafe {
            libc::aio_cancel(self.cb.aio_fildes, &mut *self.cb);
            while libc::aio_error(&*self.cb) == libc::EINPROGRESS {
                yield_now();
            }
            libc::aio_return(&mut *self.cb);
        }
    }
}

/// `read(2)` on a non-blocking descriptor, such as a pipe or a socket.
pub struct NonBlocking {
    fd: RawFd,
    buf: *mut u8,
    len: usize,
}

impl NonBlocking {
    /// Wraps `fd`, switching it to non-blocking mode.
    pub fn new(fd: RawFd) -> io::Result<Self> {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 {
                return Err(io::Error::last_os_error());
            }
            if flags & libc::O_NONBLOCK == 0 && libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(NonBlocking {
            fd,
            buf: ptr::null_mut(),
            len: 0,
        })
    }
}

impl ReadSource for NonBlocking {
    unsafe fn submit(&mut self, buf: *mut u8, len: usize) -> io::Result<()> {
        self.buf = buf;
        self.len = len;
        Ok(())
    }

    fn poll(&mut self) -> io::Result<ReadStatus> {
        if self.buf.is_null() {
            warn!("poll on fd {} before any read was submitted", self.fd);
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }

        let n = unsafe { libc::read(self.fd, self.buf.cast(), self.len) };
        if n >= 0 {
            self.buf = ptr::null_mut();
            return Ok(ReadStatus::Done(n as usize));
        }

        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(ReadStatus::InProgress),
            _ => Err(err),
        }
    }
}
