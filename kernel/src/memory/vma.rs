//! Per-address-space map of virtual memory regions ("VMAs"), keyed by start address.
//! This is deliberately a separate, lighter-weight type from
//! [`region::VirtualMemoryRegion`](super::region::VirtualMemoryRegion): that one is
//! wired into the single global kernel `RegionTree` and unmaps itself from
//! `Process::current()`'s address space on `Drop`, which is right for kernel stacks,
//! the kernel heap, and the kernel ELF image but wrong for a generic per-process mmap
//! region (it would always reach for whichever process happens to be "current" rather
//! than the address space that actually owns it).

use alloc::{collections::BTreeMap, sync::Arc};
use bitflags::bitflags;
use x86_64::{
    memory::{Address, Page, PageRangeInclusive, Size4KiB, VirtualAddress},
    paging::PageTableEntryFlags,
};

use super::{shared_memory::SharedMemoryObject, MemoryError};

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct RegionFlags: u32 {
        const READ        = 1 << 0;
        const WRITE       = 1 << 1;
        const EXEC        = 1 << 2;
        /// The region may be extended downward by a fault just below it (the stack).
        const GROWS_DOWN  = 1 << 3;
    }
}

impl From<RegionFlags> for PageTableEntryFlags {
    fn from(flags: RegionFlags) -> Self {
        let mut out = PageTableEntryFlags::PRESENT;
        if flags.contains(RegionFlags::WRITE) {
            out |= PageTableEntryFlags::WRITABLE;
        }
        if !flags.contains(RegionFlags::EXEC) {
            out |= PageTableEntryFlags::NO_EXECUTE;
        }
        out
    }
}

/// What backs a region's pages once they're committed.
#[derive(Clone)]
pub enum Backing {
    /// Demand-zeroed, privately owned pages (the common case: heap, anonymous mmap,
    /// COW-duplicated regions until the next write fault breaks the sharing).
    Anonymous,
    /// Pages come from a `SharedMemoryObject`, at a fixed page offset into it. Multiple
    /// regions (in the same or different address spaces) can point at the same object.
    Shared {
        object: Arc<SharedMemoryObject>,
        offset_pages: usize,
    },
}

#[derive(Clone)]
pub struct Region {
    range: PageRangeInclusive<Size4KiB>,
    flags: RegionFlags,
    backing: Backing,
}

impl Region {
    pub fn new(range: PageRangeInclusive<Size4KiB>, flags: RegionFlags, backing: Backing) -> Self {
        Self {
            range,
            flags,
            backing,
        }
    }

    pub fn start(&self) -> VirtualAddress {
        self.range.start_page().start_address()
    }

    pub fn end(&self) -> VirtualAddress {
        self.range.end_page().end_address()
    }

    pub fn contains(&self, addr: VirtualAddress) -> bool {
        self.range.contains_address(addr)
    }

    pub fn page_range(&self) -> PageRangeInclusive<Size4KiB> {
        self.range.clone()
    }

    pub fn flags(&self) -> RegionFlags {
        self.flags
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// Writable per the region's own permissions, independent of whatever the PTE
    /// currently says (which may be temporarily read-only for COW).
    pub fn is_writable(&self) -> bool {
        self.flags.contains(RegionFlags::WRITE)
    }
}

/// Ordered, disjoint set of a single address space's regions. Indexed by start address
/// so a faulting address resolves to its region in `O(log n)` via a predecessor lookup
/// instead of a linear scan over every mapping the process has made.
#[derive(Default, Clone)]
pub struct RegionMap {
    regions: BTreeMap<VirtualAddress, Region>,
}

impl RegionMap {
    pub const fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
        }
    }

    pub fn find(&self, addr: VirtualAddress) -> Option<&Region> {
        self.regions
            .range(..=addr)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr))
    }

    pub fn find_mut(&mut self, addr: VirtualAddress) -> Option<&mut Region> {
        self.regions
            .range_mut(..=addr)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr))
    }

    /// Inserts `region`, rejecting it if it overlaps a neighbor.
    pub fn insert(&mut self, region: Region) -> Result<(), MemoryError> {
        if let Some((_, prev)) = self.regions.range(..region.start()).next_back() {
            if prev.end() > region.start() {
                return Err(MemoryError::InvalidRegion);
            }
        }
        if let Some((_, next)) = self.regions.range(region.start()..).next() {
            if next.start() < region.end() {
                return Err(MemoryError::InvalidRegion);
            }
        }
        self.regions.insert(region.start(), region);
        Ok(())
    }

    pub fn remove(&mut self, start: VirtualAddress) -> Option<Region> {
        self.regions.remove(&start)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Finds the first `size`-byte gap at or above `from`, below `limit`. Linear over
    /// the existing regions (there are realistically few dozen per address space), not
    /// a free-list - acceptable given §1a's "no allocator beyond a handful of regions"
    /// scale.
    pub fn find_unmapped(
        &self,
        from: VirtualAddress,
        size: usize,
        limit: VirtualAddress,
    ) -> Option<VirtualAddress> {
        let mut cursor = from;
        for region in self.regions.values() {
            if region.start() >= cursor + size as u64 {
                break;
            }
            if region.end() > cursor {
                cursor = region.end();
            }
        }
        if cursor + size as u64 <= limit {
            Some(cursor)
        } else {
            None
        }
    }
}

pub fn page_containing(addr: VirtualAddress) -> Page<Size4KiB> {
    Page::containing_address(addr)
}
