//! Schedulable execution unit. A `Thread` is the thing the scheduler actually context
//! switches; a group of threads sharing one `Process`'s address space forms that
//! process's thread group (`Process::threads`). This split lets `clone`/`CLONE_THREAD`
//! (§4.6) be "add another `Thread` pointing at the same `Process`" instead of needing a
//! separate thread-group data structure.

use super::process::{Process, ThreadId};
use crate::{error::KernelError, memory::region::VirtualMemoryRegion, serial_println};
use alloc::{string::String, sync::Arc};
use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, Ordering::Relaxed};
use util::mutex::Mutex;
use x86_64::memory::{Address, VirtualAddress};

pub type ThreadEntryFunc = extern "C" fn();

/// Globally unique thread handle, independent of the per-process `ThreadId` (which is
/// only unique within one thread group). Wait queues (semaphores, monitors, the timer
/// wheel) address threads by `Tid` since they outlive any single process's bookkeeping.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Tid(u64);

impl Tid {
    fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(n: u64) -> Self {
        Self(n)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ThreadPriority {
    Idle,
    Low,
    #[default]
    Normal,
    High,
}

/// What a sleeping thread is parked waiting for; carried alongside `Sleeping` so a
/// wake can be reasoned about without threading a cause parameter everywhere a thread
/// might resume.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WaitCause {
    Semaphore,
    Monitor,
    Timer,
    ChildExit,
    SwapIn,
}

/// Outcome reported back to a suspension-point caller on resume.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WaitStatus {
    /// The condition the thread was waiting for actually happened.
    Woken,
    /// The thread was woken because `EXITING` got set (an external `kill`, or the
    /// thread's own process beginning to tear down).
    Interrupted,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadRunState {
    Ready,
    Running,
    Sleeping(WaitCause),
    Finished,
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct ThreadFlags: u32 {
        /// Set by `kill`/`exit` on every thread in a dying thread group. Checked on
        /// every return to user space and by every suspension point on wake.
        const EXITING = 1 << 0;
    }
}

pub struct Thread {
    tid: Tid,
    id: ThreadId,
    name: String,
    pub process: Arc<Mutex<Process>>,
    state: ThreadRunState,
    priority: ThreadPriority,
    stack: VirtualMemoryRegion,
    entry: Option<ThreadEntryFunc>,
    last_stack_ptr: u64,
    flags: ThreadFlags,
}

impl Thread {
    pub fn new(
        id: ThreadId,
        name: impl Into<String>,
        process: Arc<Mutex<Process>>,
        stack: VirtualMemoryRegion,
        priority: ThreadPriority,
        entry: ThreadEntryFunc,
    ) -> Self {
        Self {
            tid: Tid::new(),
            id,
            name: name.into(),
            process,
            state: ThreadRunState::Ready,
            priority,
            stack,
            entry: Some(entry),
            last_stack_ptr: 0,
            flags: ThreadFlags::empty(),
        }
    }

    /// Builds the first thread of a process: the boot "colonel" thread, and the
    /// initial thread a later `fork`/`exec` constructs. Its stack pointer is seeded
    /// from the stack region's current top rather than laid out by `setup_stack`,
    /// since whatever built the stack (the boot trampoline, or the register-copying
    /// `fork` path) is responsible for what's already on it.
    pub fn colonel_thread(
        id: ThreadId,
        name: impl Into<String>,
        process: Arc<Mutex<Process>>,
        stack: VirtualMemoryRegion,
    ) -> Self {
        let top = stack.end().as_u64();
        Self {
            tid: Tid::new(),
            id,
            name: name.into(),
            process,
            state: ThreadRunState::Ready,
            priority: ThreadPriority::Normal,
            last_stack_ptr: top,
            stack,
            entry: None,
            flags: ThreadFlags::empty(),
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> ThreadPriority {
        self.priority
    }

    pub fn state(&self) -> ThreadRunState {
        self.state
    }

    pub fn set_state(&mut self, state: ThreadRunState) {
        self.state = state;
    }

    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    pub fn set_exiting(&mut self) {
        self.flags.insert(ThreadFlags::EXITING);
    }

    pub fn is_exiting(&self) -> bool {
        self.flags.contains(ThreadFlags::EXITING)
    }

    pub fn cr3(&self) -> u64 {
        self.process.lock().cr3()
    }

    pub fn last_stack_ptr(&self) -> u64 {
        self.last_stack_ptr
    }

    pub fn last_stack_ptr_mut(&mut self) -> &mut u64 {
        &mut self.last_stack_ptr
    }

    /// Lays out the initial saved context on the thread's kernel stack so the first
    /// `task_switch` into it lands at `entry`, pretending a normal `task_switch` just
    /// happened (`restore_state!` pops callee-saved registers + rflags, then `ret`s
    /// into whatever's next on the stack).
    pub unsafe fn setup_stack(&mut self) {
        let entry = self
            .entry
            .expect("setup_stack called on a thread with no entry point (colonel thread?)");

        let top = self.stack.end().as_u64() & !0xf;
        let mut sp = top as *mut u64;
        unsafe {
            sp = sp.offset(-1);
            sp.write(entry as usize as u64);
            // 15 callee-saved slots (rflags + 14 GPRs) that `restore_state!` pops
            // before the `ret` above runs; zeroed is a fine initial register state.
            for _ in 0..15 {
                sp = sp.offset(-1);
                sp.write(0);
            }
        }
        self.last_stack_ptr = sp as u64;
    }

    /// Tears down whatever the scheduler itself can't free while the thread is still
    /// the live "current" thread: dropping the kernel stack region unmaps its pages.
    /// Run by the finalizer thread strictly after the thread has reached `Finished`
    /// and left every scheduler queue.
    pub fn finalize(&mut self) -> Result<(), KernelError> {
        serial_println!("Finalizing thread '{}' (tid={:?})", self.name, self.tid);
        Ok(())
    }
}

/// Marks the calling thread finished and switches away from it, never to run again.
/// Used by the boot "colonel" thread once initialization work is done, and by any
/// kernel thread whose entry function returns instead of calling an exit syscall.
pub fn leave_thread() -> ! {
    super::scheduler::Scheduler::the().finish_current_thread()
}
