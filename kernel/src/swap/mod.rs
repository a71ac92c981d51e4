//! Swap subsystem (§4.4): a slot arena over an in-memory backing store (a teaching
//! kernel has no block device to speak of, so the "disk" is just a big buffer; see
//! DESIGN.md) plus a two-list pseudo-LRU that decides which resident anonymous pages
//! to evict under pressure.
//!
//! A swap entry is carried in a non-present PTE's address bits (§4.10), which only
//! preserve bits 12..48 of whatever is stored there (`PageTableEntry::address`
//! reconstructs a page-aligned value) — so a slot index is shifted left by 12 before
//! being handed to `replace_with_swap_entry` and shifted back on the way out.

use crate::{
    error::{KernelError, SwapError},
    memory::{
        manager::MemoryManager,
        vma::{Backing, Region},
        MemoryError,
    },
    multitasking::process::Process,
};
use alloc::{
    collections::VecDeque,
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
use core::sync::atomic::{AtomicU32, Ordering};
use util::mutex::Mutex;
use x86_64::{
    memory::{Page, PageSize, PhysicalFrame, Size4KiB, VirtualAddress},
    paging::PageTableEntryFlags,
};

const SWAP_PAGE_SIZE: usize = Size4KiB::SIZE as usize;
const SWAP_SLOT_COUNT: usize = 4096; // 16 MiB backing store

fn encode_swap_entry(slot: u32) -> u64 {
    (slot as u64) << 12
}

fn decode_swap_entry(raw: u64) -> u32 {
    (raw >> 12) as u32
}

struct SwapArena {
    store: Vec<[u8; SWAP_PAGE_SIZE]>,
    used: Vec<bool>,
    refcounts: Vec<u32>,
    cursor: usize,
}

impl SwapArena {
    const fn new() -> Self {
        Self {
            store: Vec::new(),
            used: Vec::new(),
            refcounts: Vec::new(),
            cursor: 0,
        }
    }

    fn ensure_initialized(&mut self) {
        if self.store.is_empty() {
            self.store = vec![[0u8; SWAP_PAGE_SIZE]; SWAP_SLOT_COUNT];
            self.used = vec![false; SWAP_SLOT_COUNT];
            self.refcounts = vec![0; SWAP_SLOT_COUNT];
        }
    }

    /// Scans forward from the last allocation point for a free slot, so repeated
    /// churn near the front of the arena doesn't make every allocation linear.
    fn try_alloc(&mut self) -> Result<u32, SwapError> {
        self.ensure_initialized();
        for _ in 0..self.used.len() {
            let idx = self.cursor;
            self.cursor = (self.cursor + 1) % self.used.len();
            if !self.used[idx] {
                self.used[idx] = true;
                self.refcounts[idx] = 1;
                return Ok(idx as u32);
            }
        }
        Err(SwapError::DeviceFull)
    }

    fn share(&mut self, slot: u32) {
        self.refcounts[slot as usize] += 1;
    }

    /// Drops a reference to `slot`, freeing it once the count reaches zero. Returns
    /// whether it was actually freed.
    fn release(&mut self, slot: u32) -> bool {
        let idx = slot as usize;
        self.refcounts[idx] = self.refcounts[idx].saturating_sub(1);
        let freed = self.refcounts[idx] == 0;
        if freed {
            self.used[idx] = false;
        }
        freed
    }

    fn write(&mut self, slot: u32, bytes: &[u8; SWAP_PAGE_SIZE]) {
        self.ensure_initialized();
        self.store[slot as usize] = *bytes;
    }

    fn read(&mut self, slot: u32) -> [u8; SWAP_PAGE_SIZE] {
        self.ensure_initialized();
        self.store[slot as usize]
    }
}

static ARENA: Mutex<SwapArena> = Mutex::new(SwapArena::new());
static SWAP_IN_LOCK: Mutex<()> = Mutex::new(());

/// Incremented by the page-fault handler every time frame allocation comes up short;
/// drained by `run_reclaim_cycle` to size the next reclaim pass.
static PRESSURE: AtomicU32 = AtomicU32::new(0);

pub fn note_pressure() {
    PRESSURE.fetch_add(1, Ordering::Relaxed);
}

fn take_pressure() -> u32 {
    PRESSURE.swap(0, Ordering::Relaxed)
}

unsafe fn physical_to_virtual(frame: PhysicalFrame<Size4KiB>) -> VirtualAddress {
    let offset = MemoryManager::the().lock().physical_memory_offset();
    VirtualAddress::new(frame.start() + offset as u64)
}

unsafe fn read_frame(frame: PhysicalFrame<Size4KiB>) -> [u8; SWAP_PAGE_SIZE] {
    *physical_to_virtual(frame).as_mut_ptr::<[u8; SWAP_PAGE_SIZE]>()
}

unsafe fn write_frame(frame: PhysicalFrame<Size4KiB>, bytes: &[u8; SWAP_PAGE_SIZE]) {
    *physical_to_virtual(frame).as_mut_ptr::<[u8; SWAP_PAGE_SIZE]>() = *bytes;
}

/// A resident, reclaimable anonymous page tracked by the two-list pseudo-LRU. Holds a
/// weak reference to its owning process so a process that exits while its pages are
/// still queued just quietly drops out of the scan instead of requiring an explicit
/// unregister call on every exit path.
struct ResidentPage {
    process: Weak<Mutex<Process>>,
    page: Page<Size4KiB>,
}

struct SwapLists {
    active: VecDeque<ResidentPage>,
    inactive: VecDeque<ResidentPage>,
}

static LISTS: Mutex<SwapLists> = Mutex::new(SwapLists {
    active: VecDeque::new(),
    inactive: VecDeque::new(),
});

/// Registers a freshly committed anonymous page as reclaimable. New pages start on
/// the active list; `refill_inactive_scan` is what ages them down over time.
pub fn register_page(process: &Arc<Mutex<Process>>, page: Page<Size4KiB>) {
    LISTS.lock().active.push_back(ResidentPage {
        process: Arc::downgrade(process),
        page,
    });
}

/// Second-chance aging: walks the active list once (bounded by its length at entry),
/// demoting to inactive anything whose `ACCESSED` bit was clear and clearing the bit on
/// anything promoted back, so the next pass gets a fresh read.
pub fn refill_inactive_scan() {
    let mut lists = LISTS.lock();
    let rounds = lists.active.len();
    for _ in 0..rounds {
        let Some(entry) = lists.active.pop_front() else {
            break;
        };
        let Some(process) = entry.process.upgrade() else {
            continue; // process exited; drop tracking
        };
        let accessed = process.lock().address_space().test_and_clear_accessed(entry.page);
        match accessed {
            Some(true) => lists.active.push_back(entry),
            Some(false) => lists.inactive.push_back(entry),
            None => {} // page no longer resident under this tracking; drop it
        }
    }
}

/// One reclaim pass over the inactive list: a page touched again since being demoted
/// is promoted back to active; a dirty page is written out to the arena and its PTE
/// replaced with a swap entry; a clean page (never written since it was mapped in) is
/// simply unmapped, since there's nothing in it worth preserving. Stops once `budget`
/// frames have been reclaimed or the inactive list runs dry.
pub fn page_launder(budget: usize) -> Result<usize, KernelError> {
    let mut reclaimed = 0;
    while reclaimed < budget {
        let entry = LISTS.lock().inactive.pop_front();
        let Some(entry) = entry else {
            break;
        };

        let Some(process) = entry.process.upgrade() else {
            continue;
        };
        let mut guard = process.lock();
        let space = guard.address_space();

        match space.test_and_clear_accessed(entry.page) {
            Some(true) => {
                drop(guard);
                LISTS.lock().active.push_back(entry);
                continue;
            }
            None => continue, // already gone
            Some(false) => {}
        }

        let dirty = space.is_dirty(entry.page).unwrap_or(false);
        let frame = if dirty {
            let slot = ARENA.lock().try_alloc()?;
            let (frame, flusher) = space
                .replace_with_swap_entry(entry.page, encode_swap_entry(slot))
                .map_err(|_| SwapError::BadSwapEntry)?;
            flusher.flush();
            let bytes = unsafe { read_frame(frame) };
            ARENA.lock().write(slot, &bytes);
            frame
        } else {
            let (frame, flusher) = space
                .unmap(entry.page)
                .map_err(|_| SwapError::BadSwapEntry)?;
            flusher.flush();
            frame
        };
        drop(guard);

        MemoryManager::the().lock().free_frame(frame);
        reclaimed += 1;
    }
    Ok(reclaimed)
}

/// One iteration of the swap daemon (see `housekeeping_threads::spawn_swap_daemon_thread`):
/// ages the active list, then reclaims up to `pressure << 5` pages — a burst of recent
/// allocation failures earns a proportionally larger pass rather than one page at a
/// time.
pub fn run_reclaim_cycle() -> Result<usize, KernelError> {
    refill_inactive_scan();
    let pressure = take_pressure();
    let budget = ((pressure as usize) << 5).max(1);
    page_launder(budget)
}

/// Explicitly evicts every resident page of `region`, e.g. when a region is torn down
/// under pressure rather than waiting for the daemon to reach it by chance. `Shared`
/// regions go through the object's own `evict`, which is what invalidates every other
/// address space's mapping of the same offset (§4.5, §9: the newer semantics, not the
/// older "skip Shared" one).
pub fn swap_out_vma(process: &Arc<Mutex<Process>>, region: &Region) -> Result<usize, KernelError> {
    if let Backing::Shared { object, offset_pages } = region.backing() {
        let mut evicted = 0;
        for (i, _) in region.page_range().iter().enumerate() {
            if object.evict(*offset_pages + i)? {
                evicted += 1;
            }
        }
        return Ok(evicted);
    }

    let mut evicted = 0;
    let mut guard = process.lock();
    let space = guard.address_space();

    for page in region.page_range().iter() {
        if space.translate(page).is_err() {
            continue; // never faulted in, or already swapped out
        }

        let dirty = space.is_dirty(page).unwrap_or(true);
        let frame = if dirty {
            let slot = ARENA.lock().try_alloc()?;
            let (frame, flusher) = space
                .replace_with_swap_entry(page, encode_swap_entry(slot))
                .map_err(|_| SwapError::BadSwapEntry)?;
            flusher.flush();
            let bytes = unsafe { read_frame(frame) };
            ARENA.lock().write(slot, &bytes);
            frame
        } else {
            let (frame, flusher) = space.unmap(page).map_err(|_| SwapError::BadSwapEntry)?;
            flusher.flush();
            frame
        };

        MemoryManager::the().lock().free_frame(frame);
        evicted += 1;
    }

    Ok(evicted)
}

/// Writes `frame`'s contents out to a fresh swap slot and returns the encoded entry.
/// Used by `SharedMemoryObject::evict` - unlike the per-mapping eviction above, the
/// frame here isn't attached to any single page table, so there's no PTE to replace.
pub fn store_frame(frame: PhysicalFrame<Size4KiB>) -> Result<u64, SwapError> {
    let slot = ARENA.lock().try_alloc()?;
    let bytes = unsafe { read_frame(frame) };
    ARENA.lock().write(slot, &bytes);
    Ok(encode_swap_entry(slot))
}

/// Reverse of `store_frame`: allocates a fresh frame, copies the slot's contents into
/// it, releases the slot, and returns the frame. Used by `SharedMemoryObject::commit`
/// to bring a swapped-out shared page back in.
pub fn load_into_new_frame(swap_entry: u64) -> Result<PhysicalFrame<Size4KiB>, KernelError> {
    let slot = decode_swap_entry(swap_entry);
    let frame = MemoryManager::the()
        .lock()
        .allocate_frame()
        .ok_or(MemoryError::OutOfPhysicalMemory)?;
    let bytes = ARENA.lock().read(slot);
    unsafe { write_frame(frame, &bytes) };
    ARENA.lock().release(slot);
    Ok(frame)
}

/// Releases a swap slot without reading it back, e.g. when a `SharedMemoryObject` with
/// no live residents left is torn down while one of its pages is still swapped out.
pub fn free_entry(swap_entry: u64) {
    ARENA.lock().release(decode_swap_entry(swap_entry));
}

/// Brings a swapped-out page back into memory: reads its slot, allocates a fresh
/// frame, copies the contents in, maps the frame over the faulting page, and releases
/// the slot. Guarded by `SWAP_IN_LOCK` and a recheck of the PTE after acquiring it, so
/// two concurrent faults on the same page don't double-allocate.
pub fn swap_in(
    process: &Arc<Mutex<Process>>,
    page: Page<Size4KiB>,
    flags: PageTableEntryFlags,
) -> Result<(), KernelError> {
    let _swap_in_guard = SWAP_IN_LOCK.lock();

    let mut guard = process.lock();
    let space = guard.address_space();
    let swap_entry = match space.read_swap_entry(page) {
        Some(e) => e,
        None => return Ok(()), // a racing fault already resolved this page
    };
    let slot = decode_swap_entry(swap_entry);

    let frame = MemoryManager::the()
        .lock()
        .allocate_frame()
        .ok_or(MemoryError::OutOfPhysicalMemory)?;
    let bytes = ARENA.lock().read(slot);
    unsafe { write_frame(frame, &bytes) };

    unsafe { space.map_to(frame, page, flags | PageTableEntryFlags::PRESENT) }
        .map_err(|_| SwapError::BadSwapEntry)?
        .flush();
    drop(guard);

    ARENA.lock().release(slot);
    register_page(process, page);
    Ok(())
}

/// Called from `AddressSpace::dup` (fork) when a COW-duplicated region's page has
/// already been swapped out: the child's PTE gets the same swap entry and the slot's
/// refcount goes up, so either side's next fault can swap it back in independently.
/// Aliasing, not isolation — the swap-time equivalent of `FrameTable::share`.
pub fn swap_duplicate(swap_entry: u64) {
    ARENA.lock().share(decode_swap_entry(swap_entry));
}

/// Gives a swap entry its own private copy of the slot's contents under a fresh slot
/// number. Used instead of `swap_duplicate` when aliasing isn't wanted.
pub fn swap_copy_entry(swap_entry: u64) -> Result<u64, SwapError> {
    let slot = decode_swap_entry(swap_entry);
    let bytes = ARENA.lock().read(slot);
    let new_slot = ARENA.lock().try_alloc()?;
    ARENA.lock().write(new_slot, &bytes);
    Ok(encode_swap_entry(new_slot))
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn arena_reuses_released_slots_before_growing_cursor_past_them() {
        let mut arena = SwapArena::new();
        let a = arena.try_alloc().unwrap();
        let b = arena.try_alloc().unwrap();
        assert_ne!(a, b);

        assert!(arena.release(a));
        let c = arena.try_alloc().unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn shared_slot_survives_until_every_reference_drops() {
        let mut arena = SwapArena::new();
        let slot = arena.try_alloc().unwrap();
        arena.share(slot);

        assert!(!arena.release(slot)); // one ref left
        assert!(arena.release(slot)); // now free
    }

    #[test]
    fn arena_is_exhaustible_and_reports_it() {
        let mut arena = SwapArena::new();
        arena.ensure_initialized();
        let capacity = arena.used.len();
        for _ in 0..capacity {
            arena.try_alloc().unwrap();
        }
        assert_eq!(arena.try_alloc(), Err(SwapError::DeviceFull));
    }

    #[test]
    fn swap_entry_round_trips_through_the_pte_address_field_shift() {
        let slot = 0x1234;
        let encoded = encode_swap_entry(slot);
        assert_eq!(decode_swap_entry(encoded), slot);
        assert_eq!(encoded & 0xFFF, 0); // must leave the low 12 bits clear
    }
}
