//! Cooperative + preemptive round-robin scheduler. A single, statically allocated
//! `Scheduler` owns the run queue; `task_switch` is the only place execution actually
//! moves from one `Thread`'s kernel stack to another's.
//!
//! Threads leave the run queue three ways: they finish (-> `dying_threads`, reaped by
//! the finalizer thread), they're preempted or yield (-> back onto `ready_threads`), or
//! they block on a semaphore/monitor/timer (-> the caller's own wait queue, via
//! `block_current_on`). The third case is why `Thread` values move between data
//! structures instead of living behind `Arc`s: whichever queue currently owns a
//! `Thread` is, by construction, the only thing that can make it runnable again.

use super::thread::{Thread, ThreadRunState};
use alloc::collections::VecDeque;
use core::{
    arch::asm,
    ptr::addr_of_mut,
    sync::atomic::{AtomicBool, Ordering},
};
use util::mutex::Mutex;
use x86_64::{instructions::hlt, register::Cr3};

static mut SCHEDULER: Scheduler = Scheduler {
    ready_threads: VecDeque::new(),
    dying_threads: DyingThreadsQueue::new(),
    running_thread: None,
    running_thread_is_finished: AtomicBool::new(false),
    need_resched: AtomicBool::new(false),
};

/// Single-consumer queue of threads that finished running and are waiting for the
/// finalizer thread to tear down their remaining resources. Modeled after
/// `util::rwlock`'s single-writer discipline: only one consumer handle can exist at a
/// time, so the finalizer can drain it without a lock held across the whole loop.
pub struct DyingThreadsQueue {
    inner: Mutex<VecDeque<Thread>>,
    consumed: AtomicBool,
}

impl DyingThreadsQueue {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            consumed: AtomicBool::new(false),
        }
    }

    /// Pushes `thread` and returns a pointer at its stack-pointer slot, valid for as
    /// long as nothing else pushes into this queue (true here: called with interrupts
    /// disabled, immediately before a `task_switch` away from `thread`).
    fn push(&self, thread: Thread) -> *mut u64 {
        let mut guard = self.inner.lock();
        guard.push_back(thread);
        guard.back_mut().unwrap().last_stack_ptr_mut() as *mut u64
    }

    pub fn try_consume(&self) -> Option<DyingThreadsConsumer<'_>> {
        if self
            .consumed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            Some(DyingThreadsConsumer { queue: self })
        } else {
            None
        }
    }
}

pub struct DyingThreadsConsumer<'a> {
    queue: &'a DyingThreadsQueue,
}

impl<'a> DyingThreadsConsumer<'a> {
    pub fn dequeue(&self) -> Option<Thread> {
        self.queue.inner.lock().pop_front()
    }
}

impl<'a> Drop for DyingThreadsConsumer<'a> {
    fn drop(&mut self) {
        self.queue.consumed.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    ready_threads: VecDeque<Thread>,
    pub dying_threads: DyingThreadsQueue,
    running_thread: Option<Thread>,
    running_thread_is_finished: AtomicBool,
    /// Set by the timer interrupt handler; consulted (and cleared) the next time a
    /// suspension point or the timer handler itself calls `schedule`. Lets the timer
    /// ISR drive preemption without forcing a `task_switch` from inside interrupt
    /// context before its `iretq` epilogue has run.
    need_resched: AtomicBool,
}

pub fn schedule() {
    unsafe { Scheduler::the().schedule() }
}

impl Scheduler {
    pub fn add_thread(&mut self, thread: Thread) {
        self.ready_threads.push_back(thread);
    }

    pub fn finish_current_thread(&mut self) -> ! {
        self.running_thread_is_finished
            .store(true, Ordering::Relaxed);
        self.schedule();
        unreachable!("scheduled back into a thread marked finished");
    }

    pub fn init(mut thread: Thread) {
        let scheduler = unsafe { Self::the() };
        thread.set_state(ThreadRunState::Running);
        scheduler.running_thread = Some(thread);
    }

    pub(crate) unsafe fn the() -> &'static mut Scheduler {
        unsafe { &mut *addr_of_mut!(SCHEDULER) }
    }

    pub fn request_resched(&self) {
        self.need_resched.store(true, Ordering::Relaxed);
    }

    pub fn take_resched_request(&self) -> bool {
        self.need_resched.swap(false, Ordering::Relaxed)
    }

    fn pick_next(&mut self) -> Thread {
        self.ready_threads
            .pop_front()
            .expect("no runnable thread (idle thread should always be ready)")
    }

    /// Switches the CPU onto the next runnable thread. `old_rsp` must point at the
    /// `last_stack_ptr` slot of wherever the thread currently leaving the CPU now
    /// lives (`ready_threads`, `dying_threads`, or a sync primitive's own wait queue).
    unsafe fn switch_to_next(&mut self, old_rsp: *mut u64) {
        let mut new_thread = self.pick_next();
        new_thread.set_state(ThreadRunState::Running);

        let old_cr3 = Cr3::read_raw();
        let new_cr3 = new_thread.cr3();
        let new_rsp = new_thread.last_stack_ptr();

        self.running_thread = Some(new_thread);

        unsafe { task_switch(old_rsp, new_rsp, old_cr3, new_cr3) };
    }

    /// Cooperative yield / preemption tick: the current thread goes back onto
    /// `ready_threads` (or `dying_threads`, if it just called `finish_current_thread`)
    /// and the next ready thread runs.
    pub fn schedule(&mut self) {
        if self.ready_threads.is_empty() {
            self.need_resched.store(false, Ordering::Relaxed);
            return;
        }

        let mut old_thread = self.running_thread.take().expect("no running thread");
        let old_rsp = if self.running_thread_is_finished.swap(false, Ordering::SeqCst) {
            old_thread.set_state(ThreadRunState::Finished);
            self.dying_threads.push(old_thread)
        } else {
            old_thread.set_state(ThreadRunState::Ready);
            self.ready_threads.push_back(old_thread);
            self.ready_threads.back_mut().unwrap().last_stack_ptr_mut() as *mut u64
        };

        unsafe { self.switch_to_next(old_rsp) };
    }

    /// Parks the current thread onto `queue` (a semaphore/monitor/timer wait list)
    /// instead of the run queue, then switches to the next runnable thread. Returns
    /// once something calls `wake` with this same thread and the scheduler picks it
    /// to run again.
    pub fn block_current_on(&mut self, cause: ThreadRunState, queue: &Mutex<VecDeque<Thread>>) {
        let mut thread = self
            .running_thread
            .take()
            .expect("no running thread to block");
        thread.set_state(cause);

        let old_rsp = {
            let mut guard = queue.lock();
            guard.push_back(thread);
            guard.back_mut().unwrap().last_stack_ptr_mut() as *mut u64
        };

        unsafe { self.switch_to_next(old_rsp) };
    }

    /// Moves `thread` (pulled off a wait queue by the caller) back onto the run queue.
    /// Does not itself switch to it; the normal scheduling rotation reaches it in turn.
    pub fn wake(&mut self, mut thread: Thread) {
        thread.set_state(ThreadRunState::Ready);
        self.ready_threads.push_back(thread);
    }

    pub fn current_thread(&self) -> &Thread {
        self.running_thread.as_ref().unwrap()
    }

    pub fn current_thread_mut(&mut self) -> &mut Thread {
        self.running_thread.as_mut().unwrap()
    }
}

macro_rules! save_state {
    () => {
        "pushfq; push rax; push rcx; push rdx; push rbx; sub rsp, 8; push rbp; push rsi; push rdi; push r8; push r9; push r10; push r11; push r12; push r13; push r14; push r15"
    };
}

// skip rsp because we cant pop it as this would corrupt the stack layout
macro_rules! restore_state {
    () => {
        "pop r15; pop r14; pop r13; pop r12; pop r11; pop r10; pop r9; pop r8; pop rdi; pop rsi; pop rbp; add rsp, 8; pop rbx; pop rdx; pop rcx; pop rax; popfq"
    };
}

#[naked]
unsafe extern "C" fn task_switch(old_rsp: *mut u64, new_rsp: u64, old_cr3: u64, new_cr3: u64) {
    asm!(
        save_state!(),
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "cmp rdx, rcx",
        "je 1f",
        "mov cr3, rcx",
        "1:",
        restore_state!(),
        "ret",
        options(noreturn)
    )
}
