//! Hoare-style monitor (§4.8): mutual exclusion plus condition variables where
//! `cond_signal` hands the monitor directly to the signalee rather than merely making
//! it runnable again. The signaler is parked on `urgent_queue` and doesn't resume until
//! whoever it woke calls `leave` or `cond_wait` again — `urgent_queue` is always
//! drained before `entry_queue` on both of those paths, which is what gives signalers
//! priority over ordinary would-be enterers.

use crate::multitasking::{
    scheduler::Scheduler,
    thread::{Thread, ThreadRunState, WaitCause, WaitStatus},
};
use crate::error::SyncError;
use alloc::{collections::VecDeque, vec::Vec};
use util::mutex::Mutex;
use x86_64::interrupts::without_interrupts;

/// Picks the next owner on `leave`/`cond_wait`: urgent-queue waiters (threads mid
/// Hoare-signal handoff) always precede entry-queue ones, FIFO within each. Split out
/// as a pure function so the preference order is testable without a live scheduler.
fn pop_next_owner<T>(urgent: &mut VecDeque<T>, entry: &mut VecDeque<T>) -> Option<T> {
    urgent.pop_front().or_else(|| entry.pop_front())
}

fn wait_result() -> WaitStatus {
    if unsafe { Scheduler::the().current_thread().is_exiting() } {
        WaitStatus::Interrupted
    } else {
        WaitStatus::Woken
    }
}

pub struct Monitor {
    occupied: Mutex<bool>,
    entry_queue: Mutex<VecDeque<Thread>>,
    urgent_queue: Mutex<VecDeque<Thread>>,
    condition_queues: Vec<Mutex<VecDeque<Thread>>>,
}

impl Monitor {
    pub fn new(condition_count: usize) -> Self {
        let mut condition_queues = Vec::with_capacity(condition_count);
        for _ in 0..condition_count {
            condition_queues.push(Mutex::new(VecDeque::new()));
        }

        Self {
            occupied: Mutex::new(false),
            entry_queue: Mutex::new(VecDeque::new()),
            urgent_queue: Mutex::new(VecDeque::new()),
            condition_queues,
        }
    }

    /// Blocks until the monitor is free, then takes ownership of it.
    pub fn enter(&self) -> WaitStatus {
        without_interrupts(|| {
            let mut occupied = self.occupied.lock();
            if !*occupied {
                *occupied = true;
                return WaitStatus::Woken;
            }
            drop(occupied);

            unsafe {
                Scheduler::the().block_current_on(
                    ThreadRunState::Sleeping(WaitCause::Monitor),
                    &self.entry_queue,
                )
            };

            wait_result()
        })
    }

    /// Gives up ownership, handing it to the next urgent waiter (a signaler resuming
    /// its own `cond_signal` call) or, failing that, the next entry waiter. Marks the
    /// monitor free if nobody is waiting.
    pub fn leave(&self) {
        without_interrupts(|| self.hand_off());
    }

    fn hand_off(&self) {
        let next = pop_next_owner(
            &mut self.urgent_queue.lock(),
            &mut self.entry_queue.lock(),
        );

        match next {
            Some(thread) => unsafe { Scheduler::the().wake(thread) },
            None => *self.occupied.lock() = false,
        }
    }

    /// Releases the monitor (per `hand_off`) and blocks the caller on `cond`'s queue.
    /// The caller must already hold the monitor.
    pub fn cond_wait(&self, cond: usize) -> WaitStatus {
        without_interrupts(|| {
            self.hand_off();

            unsafe {
                Scheduler::the().block_current_on(
                    ThreadRunState::Sleeping(WaitCause::Monitor),
                    &self.condition_queues[cond],
                )
            };

            wait_result()
        })
    }

    /// Wakes the longest-waiting thread on `cond`'s queue and gives it the monitor
    /// immediately: the signaler itself blocks on `urgent_queue` until the signalee
    /// releases the monitor again. A no-op (returns `NoWaiters`) if nobody is waiting on
    /// `cond` — the signaler keeps the monitor and keeps running.
    pub fn cond_signal(&self, cond: usize) -> Result<WaitStatus, SyncError> {
        without_interrupts(|| {
            let signalee = self.condition_queues[cond].lock().pop_front();
            let Some(signalee) = signalee else {
                return Err(SyncError::NoWaiters);
            };

            unsafe { Scheduler::the().wake(signalee) };
            unsafe {
                Scheduler::the().block_current_on(
                    ThreadRunState::Sleeping(WaitCause::Monitor),
                    &self.urgent_queue,
                )
            };

            Ok(wait_result())
        })
    }

    /// Wakes every thread waiting on `cond`, each taking its turn at the monitor via the
    /// same urgent-queue handoff `cond_signal` uses. Unlike repeated `cond_signal`
    /// calls, broadcasting never blocks the caller on an empty condition.
    pub fn cond_broadcast(&self, cond: usize) {
        without_interrupts(|| {
            let woken: Vec<Thread> = self.condition_queues[cond].lock().drain(..).collect();
            if woken.is_empty() {
                return;
            }

            let mut urgent = self.urgent_queue.lock();
            for thread in woken {
                urgent.push_back(thread);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn urgent_queue_drains_before_entry_queue() {
        let mut urgent: VecDeque<i32> = VecDeque::from(std::vec![10, 11]);
        let mut entry: VecDeque<i32> = VecDeque::from(std::vec![20, 21]);

        assert_eq!(pop_next_owner(&mut urgent, &mut entry), Some(10));
        assert_eq!(pop_next_owner(&mut urgent, &mut entry), Some(11));
        assert_eq!(pop_next_owner(&mut urgent, &mut entry), Some(20));
        assert_eq!(pop_next_owner(&mut urgent, &mut entry), Some(21));
        assert_eq!(pop_next_owner(&mut urgent, &mut entry), None);
    }

    #[test]
    fn empty_urgent_queue_falls_through_to_entry_queue() {
        let mut urgent: VecDeque<i32> = VecDeque::new();
        let mut entry: VecDeque<i32> = VecDeque::from(std::vec![1, 2, 3]);

        assert_eq!(pop_next_owner(&mut urgent, &mut entry), Some(1));
        assert_eq!(entry.len(), 2);
    }
}
