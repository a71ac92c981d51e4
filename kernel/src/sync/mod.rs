//! Task-blocking synchronization primitives (§4.8): a counting semaphore and, in
//! [`monitor`], a Hoare-style monitor. Both park the calling thread on their own wait
//! queue via `Scheduler::block_current_on` instead of spinning, unlike
//! `util::mutex::Mutex`/`util::semaphore::Semaphore` (busy-wait primitives used for the
//! short, non-sleeping critical sections those modules protect).

pub mod monitor;

use crate::multitasking::{
    scheduler::Scheduler,
    thread::{Thread, ThreadRunState, WaitCause, WaitStatus},
};
use alloc::collections::VecDeque;
use util::mutex::Mutex;
use x86_64::interrupts::without_interrupts;

pub use monitor::Monitor;

fn wait_result() -> WaitStatus {
    if unsafe { Scheduler::the().current_thread().is_exiting() } {
        WaitStatus::Interrupted
    } else {
        WaitStatus::Woken
    }
}

/// Classic counting semaphore. `down` can drive the value negative; its magnitude is
/// then the number of threads parked on `waiters`, woken in FIFO order by `up`.
pub struct Semaphore {
    value: Mutex<i64>,
    waiters: Mutex<VecDeque<Thread>>,
}

impl Semaphore {
    pub const fn new(initial: i64) -> Self {
        Self {
            value: Mutex::new(initial),
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    pub fn value(&self) -> i64 {
        *self.value.lock()
    }

    /// Decrements the value; blocks if it went negative. Returns `Interrupted` rather
    /// than `Woken` if `kill` tore down the caller's process while it waited.
    pub fn down(&self) -> WaitStatus {
        without_interrupts(|| {
            let mut value = self.value.lock();
            *value -= 1;
            if *value >= 0 {
                return WaitStatus::Woken;
            }
            drop(value);

            unsafe {
                Scheduler::the().block_current_on(
                    ThreadRunState::Sleeping(WaitCause::Semaphore),
                    &self.waiters,
                )
            };

            wait_result()
        })
    }

    /// Increments the value; wakes the longest-waiting parked thread, if any.
    pub fn up(&self) {
        without_interrupts(|| {
            let mut value = self.value.lock();
            *value += 1;
            let should_wake = *value <= 0;
            drop(value);

            if should_wake {
                if let Some(thread) = self.waiters.lock().pop_front() {
                    unsafe { Scheduler::the().wake(thread) };
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn new_semaphore_reports_its_initial_value() {
        let sem = Semaphore::new(3);
        assert_eq!(sem.value(), 3);
    }
}
