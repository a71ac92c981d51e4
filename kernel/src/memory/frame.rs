//! Physical frame descriptor table: one reference count per physical frame, used by
//! the COW-dup path (`AddressSpace::dup`) and by shared-memory objects to know when a
//! frame can finally be returned to the frame allocator.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use x86_64::memory::{PageSize, PhysicalFrame, Size4KiB};

/// Indexed by physical frame number. Grows lazily as higher frame numbers are touched,
/// since we don't know the top of physical memory until the memory map is walked.
pub struct FrameTable {
    refcounts: Vec<AtomicU32>,
}

impl FrameTable {
    pub const fn new() -> Self {
        Self {
            refcounts: Vec::new(),
        }
    }

    fn ensure_capacity(&mut self, index: usize) {
        if index >= self.refcounts.len() {
            self.refcounts
                .resize_with(index + 1, || AtomicU32::new(0));
        }
    }

    /// Marks a frame as owned by exactly one mapping. Called when a frame is first
    /// handed out by the frame allocator.
    pub fn track(&mut self, frame: PhysicalFrame<Size4KiB>) {
        let index = frame.index();
        self.ensure_capacity(index);
        self.refcounts[index].store(1, Ordering::Relaxed);
    }

    /// Bumps a frame's reference count, e.g. when a COW-dup shares it between parent
    /// and child instead of copying it eagerly.
    pub fn share(&mut self, frame: PhysicalFrame<Size4KiB>) {
        let index = frame.index();
        self.ensure_capacity(index);
        self.refcounts[index].fetch_add(1, Ordering::AcqRel);
    }

    pub fn refcount(&self, frame: PhysicalFrame<Size4KiB>) -> u32 {
        self.refcounts
            .get(frame.index())
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn is_shared(&self, frame: PhysicalFrame<Size4KiB>) -> bool {
        self.refcount(frame) > 1
    }

    /// Drops one reference to `frame`. Returns `true` when the last reference was
    /// removed and the frame is free to be returned to the frame allocator.
    pub fn release(&mut self, frame: PhysicalFrame<Size4KiB>) -> bool {
        let index = frame.index();
        if index >= self.refcounts.len() {
            return true;
        }
        let prev = self.refcounts[index].fetch_sub(1, Ordering::AcqRel);
        prev <= 1
    }
}
