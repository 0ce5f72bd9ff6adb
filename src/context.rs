//! Saving and restoring execution contexts.
//!
//! This is the only module that touches registers and raw stack memory. A
//! context is captured by [`switch`], which stores the current thread's
//! callee-saved registers and stack pointer and loads another context. The
//! call to `switch` "returns" only when some later switch loads the saved
//! context again, so the code after it is the resumed path.
//!
//! Fresh contexts are synthesized by [`Context::fresh`]: the new stack is
//! prepared so that the first `switch` into it lands in an entry function.

use core::arch::naked_asm;
use std::ptr;

/// Stores information about a thread that we want preserved between thread switches.
/// Only the callee saved registers of the System V ABI are kept: everything
/// else is saved by the compiler around the call to [`switch`].
#[derive(Debug, Default)]
#[repr(C)]
pub struct Context {
    pub rsp: u64,
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,
}

impl Context {
    /// Prepares `stack` so that switching to the returned context starts
    /// executing `entry` on it.
    ///
    /// The stack must stay alive and must not move for as long as the
    /// context can be switched to.
    pub fn fresh(stack: &mut [u8], entry: extern "C" fn() -> !) -> Self {
        debug_assert!(stack.len() >= 64);

        let mut ctx = Context::default();
        unsafe {
            let s_ptr = stack.as_mut_ptr().add(stack.len());
            let s_ptr = (s_ptr as usize & !15) as *mut u8;
            // fake return address: entry never returns, but its frame
            // must look like it was called.
            ptr::write(s_ptr.offset(-8) as *mut usize, 0);
            // popped by the `ret` at the end of `switch`. After that pop
            // rsp is 8 modulo 16, which is what a function expects on entry.
            ptr::write(s_ptr.offset(-16) as *mut usize, entry as usize);
            ctx.rsp = s_ptr.offset(-16) as u64;
        }

        ctx
    }
}

/// Saves the current context into `old` and jumps to `new`.
///
/// # Safety
///
/// `old` must be valid for writes and `new` must hold a context produced by
/// [`Context::fresh`] or by an earlier `switch`, whose stack is still alive.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(old: *mut Context, new: *const Context) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], r15",
        "mov [rdi + 0x10], r14",
        "mov [rdi + 0x18], r13",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], rbx",
        "mov [rdi + 0x30], rbp",
        "mov rsp, [rsi + 0x00]",
        "mov r15, [rsi + 0x08]",
        "mov r14, [rsi + 0x10]",
        "mov r13, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov rbx, [rsi + 0x28]",
        "mov rbp, [rsi + 0x30]",
        "ret",
    );
}

/// Jumps to `new` without saving the current context.
///
/// Used by a thread that has finished: nothing will ever resume it.
///
/// # Safety
///
/// Same requirements on `new` as [`switch`].
#[unsafe(naked)]
pub unsafe extern "C" fn restore(new: *const Context) -> ! {
    naked_asm!(
        "mov rsp, [rdi + 0x00]",
        "mov r15, [rdi + 0x08]",
        "mov r14, [rdi + 0x10]",
        "mov r13, [rdi + 0x18]",
        "mov r12, [rdi + 0x20]",
        "mov rbx, [rdi + 0x28]",
        "mov rbp, [rdi + 0x30]",
        "ret",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static MAIN: Cell<*mut Context> = const { Cell::new(ptr::null_mut()) };
        static CHILD: Cell<*mut Context> = const { Cell::new(ptr::null_mut()) };
        static BOUNCES: Cell<usize> = const { Cell::new(0) };
        static SEEN: Cell<u64> = const { Cell::new(0) };
    }

    extern "C" fn bounce() -> ! {
        loop {
            BOUNCES.set(BOUNCES.get() + 1);
            unsafe { switch(CHILD.get(), MAIN.get()) };
        }
    }

    #[test]
    fn fresh_context_runs_and_resumes() {
        let mut stack = vec![0_u8; 16 * 1024].into_boxed_slice();
        let mut main = Context::default();
        let mut child = Context::fresh(&mut stack, bounce);
        let main_ptr: *mut Context = &mut main;
        let child_ptr: *mut Context = &mut child;
        MAIN.set(main_ptr);
        CHILD.set(child_ptr);

        for i in 1..=3 {
            unsafe { switch(main_ptr, child_ptr) };
            assert_eq!(BOUNCES.get(), i);
        }
    }

    extern "C" fn finish() -> ! {
        SEEN.set(0xfeed);
        unsafe { restore(MAIN.get()) }
    }

    #[test]
    fn restore_abandons_the_current_context() {
        let mut stack = vec![0_u8; 16 * 1024].into_boxed_slice();
        let mut main = Context::default();
        let mut child = Context::fresh(&mut stack, finish);
        let main_ptr: *mut Context = &mut main;
        MAIN.set(main_ptr);

        unsafe { switch(main_ptr, &mut child) };
        assert_eq!(SEEN.get(), 0xfeed);
    }

    #[test]
    fn fresh_stack_is_aligned() {
        let mut stack = vec![0_u8; 16 * 1024 + 3].into_boxed_slice();
        let ctx = Context::fresh(&mut stack, bounce);
        assert_eq!(ctx.rsp % 16, 0);
        let top = stack.as_ptr() as u64 + stack.len() as u64;
        assert!(ctx.rsp < top && ctx.rsp >= top - 32);
    }
}
