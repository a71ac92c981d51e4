//! Delta-encoded timer list (§4.7). Each node stores the number of ticks remaining
//! *after* its predecessor fires, not an absolute deadline, so a single decrement of
//! the head on every timer interrupt is enough to age the whole list: `add` walks
//! forward subtracting as it goes and splits its delta into the slot it lands in;
//! `del` (used by `cancel_for_process`) folds its own remaining delta into whatever
//! follows it so later entries keep firing at the right time.
//!
//! A tick is one invocation of the legacy PIC timer interrupt (`InterruptIndex::Timer`,
//! by default the PIT's free-running ~18.2Hz channel 0 rate left over from
//! `time::Time::calibrate`, which restores the BIOS-default divisor when it's done).

use super::{
    process::ProcessId,
    scheduler::Scheduler,
    thread::{Thread, Tid, ThreadRunState, WaitCause, WaitStatus},
};
use alloc::{collections::VecDeque, vec::Vec};
use util::mutex::Mutex;

/// Ticks-per-second of the legacy PIT channel 0 in its BIOS-default mode. Used only to
/// translate a caller's millisecond request into list units; the list itself doesn't
/// care about real time, only relative tick order.
const DEFAULT_PIT_HZ: u64 = 18;

struct TimerEntry {
    delta: u64,
    tid: Tid,
    process: ProcessId,
}

static TIMER_LIST: Mutex<VecDeque<TimerEntry>> = Mutex::new(VecDeque::new());
static TIMER_QUEUE: Mutex<VecDeque<Thread>> = Mutex::new(VecDeque::new());

fn delta_list_insert(list: &mut VecDeque<TimerEntry>, mut ticks: u64, tid: Tid, process: ProcessId) {
    let mut idx = 0;
    while idx < list.len() {
        if ticks <= list[idx].delta {
            list[idx].delta -= ticks;
            break;
        }
        ticks -= list[idx].delta;
        idx += 1;
    }
    list.insert(idx, TimerEntry { delta: ticks, tid, process });
}

fn delta_list_remove(list: &mut VecDeque<TimerEntry>, tid: Tid) {
    if let Some(pos) = list.iter().position(|e| e.tid == tid) {
        let removed = list.remove(pos).unwrap();
        if let Some(successor) = list.get_mut(pos) {
            successor.delta += removed.delta;
        }
    }
}

/// Converts a millisecond duration into ticks of this list, rounding up so a caller
/// never wakes early.
pub fn ms_to_ticks(ms: u64) -> u64 {
    (ms * DEFAULT_PIT_HZ).div_ceil(1000).max(1)
}

/// Parks the calling thread for `ticks` timer interrupts. Returns `Interrupted` rather
/// than `Woken` if `kill` tore the thread's process down while it slept.
pub fn sleep_ticks(ticks: u64) -> WaitStatus {
    let (tid, process) = unsafe {
        let current = Scheduler::the().current_thread();
        (current.tid(), current.process.lock().id())
    };

    delta_list_insert(&mut TIMER_LIST.lock(), ticks, tid, process);

    unsafe {
        Scheduler::the().block_current_on(ThreadRunState::Sleeping(WaitCause::Timer), &TIMER_QUEUE);
    }

    if unsafe { Scheduler::the().current_thread().is_exiting() } {
        WaitStatus::Interrupted
    } else {
        WaitStatus::Woken
    }
}

pub fn sleep_ms(ms: u64) -> WaitStatus {
    sleep_ticks(ms_to_ticks(ms))
}

/// Called once per timer interrupt. Ages the head of the delta list and wakes every
/// thread whose delta has reached zero.
pub fn tick() {
    let mut fired = Vec::new();
    {
        let mut list = TIMER_LIST.lock();
        if let Some(front) = list.front_mut() {
            if front.delta > 0 {
                front.delta -= 1;
            }
        }
        while matches!(list.front(), Some(e) if e.delta == 0) {
            fired.push(list.pop_front().unwrap().tid);
        }
    }

    for tid in fired {
        wake_tid(tid);
    }
}

fn wake_tid(tid: Tid) {
    let mut queue = TIMER_QUEUE.lock();
    if let Some(pos) = queue.iter().position(|t| t.tid() == tid) {
        let thread = queue.remove(pos).unwrap();
        drop(queue);
        unsafe { Scheduler::the().wake(thread) };
    }
}

/// Tears down every timer this process's threads are sleeping on, waking them with
/// their `EXITING` flag set so `sleep_ticks`'s caller sees `Interrupted` rather than a
/// legitimate wakeup. Used by `process::kill` (§4.5); there's no equivalent for
/// semaphore/monitor waits yet, so those are not interruptible by `kill` (documented
/// limitation, see `process::kill`).
pub fn cancel_for_process(target: ProcessId) {
    let mut removed = Vec::new();
    {
        let mut queue = TIMER_QUEUE.lock();
        let mut i = 0;
        while i < queue.len() {
            if queue[i].process.lock().id() == target {
                removed.push(queue.remove(i).unwrap());
            } else {
                i += 1;
            }
        }
    }

    if removed.is_empty() {
        return;
    }

    let mut list = TIMER_LIST.lock();
    for thread in &removed {
        delta_list_remove(&mut list, thread.tid());
    }
    drop(list);

    for mut thread in removed {
        thread.set_exiting();
        unsafe { Scheduler::the().wake(thread) };
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    fn tid(n: u64) -> Tid {
        Tid::from_raw(n)
    }

    fn pid(n: u64) -> ProcessId {
        ProcessId::from_raw(n)
    }

    #[test]
    fn delta_insert_preserves_absolute_fire_order() {
        let mut list = VecDeque::new();
        delta_list_insert(&mut list, 10, tid(1), pid(1));
        delta_list_insert(&mut list, 4, tid(2), pid(1));
        delta_list_insert(&mut list, 7, tid(3), pid(1));

        let deltas: std::vec::Vec<u64> = list.iter().map(|e| e.delta).collect();
        let tids: std::vec::Vec<Tid> = list.iter().map(|e| e.tid).collect();

        assert_eq!(tids, std::vec![tid(2), tid(3), tid(1)]);
        let mut running = 0u64;
        let mut absolutes = std::vec::Vec::new();
        for d in deltas {
            running += d;
            absolutes.push(running);
        }
        assert_eq!(absolutes, std::vec![4, 7, 10]);
    }

    #[test]
    fn delta_remove_folds_delta_into_successor() {
        let mut list = VecDeque::new();
        delta_list_insert(&mut list, 4, tid(1), pid(1));
        delta_list_insert(&mut list, 6, tid(2), pid(1));
        delta_list_remove(&mut list, tid(1));

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].tid, tid(2));
        assert_eq!(list[0].delta, 6);
    }

    #[test]
    fn ms_to_ticks_rounds_up_and_never_zero() {
        assert_eq!(ms_to_ticks(0), 1);
        assert!(ms_to_ticks(1) >= 1);
        assert_eq!(ms_to_ticks(1000), DEFAULT_PIT_HZ);
    }
}
