//! Shared-memory object: a [`VirtualMemoryObject`] backed by a sparse, reference
//! counted map of physical frames. Multiple [`VirtualMemoryRegion`](super::region::VirtualMemoryRegion)s
//! across different address spaces can point at the same object; the last region
//! dropped is responsible for returning the frames (resident or swapped out) to their
//! respective stores.
//!
//! Unlike `Backing::Anonymous` pages, which the swap daemon tracks and reclaims one
//! mapping at a time via `swap::LISTS`, a shared page has no single owning mapping to
//! charge a swap-out against: evicting it has to be visible to *every* address space
//! that maps it. This kernel has no reverse-map structure, so each object keeps its own
//! tiny one: `Inner::mappings` records which `(process, page)` pairs are currently
//! resolving a given offset, populated by the page-fault handler and `process::fork`,
//! so `evict` knows whose PTEs to invalidate.

use super::{manager::MemoryManager, MemoryError};
use crate::{
    error::KernelError, memory::virtual_memory_object::VirtualMemoryObject,
    multitasking::process::Process, swap,
};
use alloc::{
    collections::BTreeMap,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicUsize, Ordering};
use util::mutex::Mutex;
use x86_64::memory::{Page, PageAlignedSize, PhysicalFrame, Size4KiB};

/// Either a resident frame or a swap entry (same encoding `swap::swap_in` decodes),
/// mirroring what a non-present PTE can hold for an anonymous page - except here the
/// entry lives in the object's own map instead of a single page table, since many page
/// tables may need to agree on it.
enum SharedSlot {
    Resident(PhysicalFrame<Size4KiB>),
    Swapped(u64),
}

/// Sparse, page-indexed backing store. Pages are committed lazily: a page fault inside
/// a region backed by one of these is what actually allocates a frame for it (see
/// `interrupts::resolve_page_fault`).
struct Inner {
    pages: BTreeMap<usize, SharedSlot>,
    mappings: BTreeMap<usize, Vec<(Weak<Mutex<Process>>, Page<Size4KiB>)>>,
    size: PageAlignedSize,
}

pub struct SharedMemoryObject {
    inner: Mutex<Inner>,
    refcount: AtomicUsize,
}

impl SharedMemoryObject {
    pub fn new(size: PageAlignedSize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                pages: BTreeMap::new(),
                mappings: BTreeMap::new(),
                size,
            }),
            refcount: AtomicUsize::new(1),
        })
    }

    /// Called when a new region starts pointing at this object (§4.2 `dup`).
    pub fn add_ref(self: &Arc<Self>) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Called when a region referencing this object is torn down. Returns `true`
    /// once the last reference has gone and the caller should free all committed
    /// frames and swap entries.
    pub fn drop_ref(self: &Arc<Self>) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Commits a frame at `page_index`: returns it directly if already resident,
    /// swaps it back in if it was evicted, or allocates fresh if this is the first
    /// fault to ever reach this offset.
    pub fn commit(&self, page_index: usize) -> Result<PhysicalFrame<Size4KiB>, KernelError> {
        let mut inner = self.inner.lock();
        match inner.pages.get(&page_index) {
            Some(SharedSlot::Resident(frame)) => return Ok(*frame),
            Some(SharedSlot::Swapped(entry)) => {
                let frame = swap::load_into_new_frame(*entry)?;
                inner.pages.insert(page_index, SharedSlot::Resident(frame));
                return Ok(frame);
            }
            None => {}
        }

        let frame = MemoryManager::the()
            .lock()
            .try_allocate_frames(1)
            .map_err(KernelError::from)?
            .pop()
            .ok_or(MemoryError::OutOfPhysicalMemory)?;

        inner.pages.insert(page_index, SharedSlot::Resident(frame));
        Ok(frame)
    }

    /// Records that `process`'s `page` currently resolves `page_index`, so a future
    /// `evict` of that offset knows to invalidate it there too. Called from the
    /// page-fault handler after a successful `commit`, and from `process::fork` for
    /// every shared page a child inherits already resident.
    pub fn register_mapping(&self, page_index: usize, process: &Arc<Mutex<Process>>, page: Page<Size4KiB>) {
        self.inner
            .lock()
            .mappings
            .entry(page_index)
            .or_default()
            .push((Arc::downgrade(process), page));
    }

    /// Removes `process`'s `page` from the mapping registry, e.g. on `munmap`.
    pub fn unregister_mapping(&self, page_index: usize, process: &Arc<Mutex<Process>>, page: Page<Size4KiB>) {
        let mut inner = self.inner.lock();
        let Some(list) = inner.mappings.get_mut(&page_index) else {
            return;
        };
        let target = Arc::downgrade(process);
        list.retain(|(weak, p)| !(Weak::ptr_eq(weak, &target) && *p == page));
    }

    /// Writes the resident frame at `page_index` out to swap and unmaps it from every
    /// address space currently mapping it (§4.5: "swapping-out a SHARE region publishes
    /// the swap entry to the object's slot map; any other mapping faulting that offset
    /// swaps-in via the existing entry"). A later fault from any of them goes through
    /// `commit` again, which brings exactly one frame back and leaves every faulter
    /// after the first looking at that same frame. Returns `false` if the page wasn't
    /// resident (never faulted in, or already swapped).
    pub fn evict(&self, page_index: usize) -> Result<bool, KernelError> {
        let mut inner = self.inner.lock();
        let frame = match inner.pages.get(&page_index) {
            Some(SharedSlot::Resident(frame)) => *frame,
            _ => return Ok(false),
        };
        let mappings = inner.mappings.remove(&page_index).unwrap_or_default();
        let entry = swap::store_frame(frame)?;
        inner.pages.insert(page_index, SharedSlot::Swapped(entry));
        drop(inner);

        for (process, page) in mappings {
            let Some(process) = process.upgrade() else {
                continue;
            };
            let mut guard = process.lock();
            if let Ok((_, flusher)) = guard.address_space().unmap(page) {
                flusher.flush();
            }
        }

        MemoryManager::the().lock().free_frame(frame);
        Ok(true)
    }

    /// Destroys every resident frame and outstanding swap entry once the last
    /// reference has dropped (§4.5).
    pub fn release_all_frames(&self) {
        let mut inner = self.inner.lock();
        for slot in inner.pages.values() {
            match slot {
                SharedSlot::Resident(frame) => MemoryManager::the().lock().free_frame(*frame),
                SharedSlot::Swapped(entry) => swap::free_entry(*entry),
            }
        }
        inner.pages.clear();
        inner.mappings.clear();
    }
}

impl VirtualMemoryObject for SharedMemoryObject {
    fn size(&self) -> PageAlignedSize {
        self.inner.lock().size
    }
}
