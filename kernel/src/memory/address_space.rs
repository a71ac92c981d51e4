use super::{
    manager::{FrameAllocatorDelegate, MemoryManager},
    vma::{Backing, RegionMap},
    MemoryError,
};
use crate::error::KernelError;
use x86_64::{
    memory::{Page, PhysicalFrame, Size4KiB, VirtualAddress},
    paging::{
        offset_page_table::{OffsetPageTable, PhysicalOffset},
        Mapper, MappingError, PageTable, PageTableEntryFlags, TlbFlusher, Translator,
        TranslationError, UnmappingError,
    },
};

pub struct AddressSpace {
    cr3: u64,
    page_table: OffsetPageTable<'static, PhysicalOffset>,
    /// Every mmap'd/anonymous region this address space owns, keyed by start address.
    /// Distinct from `kernel::memory::region::RegionTree`: that one is the single
    /// kernel-global bookkeeping structure; this is the per-process map `dup` (COW
    /// fork) and the page-fault handler walk to resolve a faulting address.
    regions: RegionMap,
}

impl AddressSpace {
    pub fn new(cr3: u64, physical_memory_offset: usize) -> Self {
        let virtual_base = VirtualAddress::new(cr3 + physical_memory_offset as u64);

        let page_table_ptr: *mut PageTable = virtual_base.as_mut_ptr();
        let raw_page_table = unsafe { &mut *page_table_ptr };

        let page_table = OffsetPageTable::new(
            raw_page_table,
            PhysicalOffset::new(physical_memory_offset as u64),
        );

        Self {
            cr3,
            page_table,
            regions: RegionMap::new(),
        }
    }

    pub unsafe fn map_to(
        &mut self,
        frame: PhysicalFrame,
        page: Page,
        flags: PageTableEntryFlags,
    ) -> Result<TlbFlusher<Size4KiB>, MappingError> {
        self.page_table
            .map_to(frame, page, flags, &mut FrameAllocatorDelegate)
    }

    pub fn unmap(
        &mut self,
        page: Page<Size4KiB>,
    ) -> Result<(PhysicalFrame<Size4KiB>, TlbFlusher<Size4KiB>), UnmappingError> {
        self.page_table.unmap(page)
    }

    pub fn cr3(&self) -> u64 {
        self.cr3
    }

    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    pub fn regions_mut(&mut self) -> &mut RegionMap {
        &mut self.regions
    }

    pub fn set_regions(&mut self, regions: RegionMap) {
        self.regions = regions;
    }

    pub fn translate(
        &self,
        page: Page<Size4KiB>,
    ) -> Result<(PhysicalFrame<Size4KiB>, PageTableEntryFlags), TranslationError> {
        self.page_table.translate(page)
    }

    /// See `x86_64::paging::MappedPageTable::test_and_clear_accessed`.
    pub fn test_and_clear_accessed(&mut self, page: Page<Size4KiB>) -> Option<bool> {
        self.page_table.test_and_clear_accessed(page)
    }

    /// See `x86_64::paging::MappedPageTable::is_dirty`.
    pub fn is_dirty(&self, page: Page<Size4KiB>) -> Option<bool> {
        self.page_table.is_dirty(page)
    }

    /// See `x86_64::paging::MappedPageTable::replace_with_swap_entry`.
    pub fn replace_with_swap_entry(
        &mut self,
        page: Page<Size4KiB>,
        swap_entry: u64,
    ) -> Result<(PhysicalFrame<Size4KiB>, TlbFlusher<Size4KiB>), UnmappingError> {
        self.page_table.replace_with_swap_entry(page, swap_entry)
    }

    /// See `x86_64::paging::MappedPageTable::read_swap_entry`.
    pub fn read_swap_entry(&self, page: Page<Size4KiB>) -> Option<u64> {
        self.page_table.read_swap_entry(page)
    }

    /// See `x86_64::paging::MappedPageTable::protect_read_only`.
    pub fn protect_read_only(&mut self, page: Page<Size4KiB>) -> Option<TlbFlusher<Size4KiB>> {
        self.page_table.protect_read_only(page)
    }

    /// See `x86_64::paging::MappedPageTable::make_writable`.
    pub fn make_writable(&mut self, page: Page<Size4KiB>) -> Option<TlbFlusher<Size4KiB>> {
        self.page_table.make_writable(page)
    }

    /// Duplicates this address space for `fork` (§4.2, §4.5, §4.9): a fresh PML4 whose
    /// kernel half (upper 256 entries, identical in every address space) is copied
    /// from this one. `Backing::Anonymous` regions share their physical frames with
    /// the parent instead of copying them, each side's mapping write-protected so the
    /// first write after the fork breaks the sharing (COW). `Backing::Shared` regions
    /// get write-through sharing instead: the same frame is mapped with its existing
    /// (already writable, if the region is writable) flags into the child and the
    /// object's refcount is bumped, since both sides are meant to keep observing each
    /// other's writes rather than diverging on first write.
    ///
    /// Returns the new cr3 and a clone of this address space's region map; the caller
    /// is responsible for handing the region map to the new `AddressSpace` it builds
    /// around that cr3 (see `multitasking::process::fork`), since this method can't
    /// construct the sibling `AddressSpace` itself without a second live borrow of the
    /// same physical-offset mapping. The caller is also responsible for registering the
    /// child's shared-region mappings with each `SharedMemoryObject`, since `dup` has no
    /// handle to the child's `Arc<Mutex<Process>>` yet.
    pub fn dup(&mut self) -> Result<(u64, RegionMap), KernelError> {
        let mut mm = MemoryManager::the().lock();
        let new_pml4_frame = mm
            .allocate_frame()
            .ok_or(MemoryError::OutOfPhysicalMemory)?;
        let offset = mm.physical_memory_offset();

        let new_table_addr = VirtualAddress::new(new_pml4_frame.start() + offset as u64);
        let new_table = unsafe { PageTable::initialize_empty_at_address(new_table_addr) };

        let parent_pml4t = self.page_table.pml4t();
        for i in 256..512 {
            new_table[i] = parent_pml4t[i];
        }

        let mut child_table =
            OffsetPageTable::new(new_table, PhysicalOffset::new(offset as u64));

        for region in self.regions.iter() {
            match region.backing() {
                Backing::Anonymous => {
                    for page in region.page_range().iter() {
                        let (frame, mut flags) = match self.page_table.translate(page) {
                            Ok(t) => t,
                            Err(_) => continue, // not yet faulted in; nothing to share yet
                        };

                        if flags.contains(PageTableEntryFlags::WRITABLE) {
                            self.page_table
                                .protect_read_only(page)
                                .map(|flusher| flusher.flush());
                            flags.remove(PageTableEntryFlags::WRITABLE);
                        }

                        mm.frame_table().share(frame);

                        child_table
                            .map_to(frame, page, flags, mm.frame_allocator())
                            .map_err(|_| MemoryError::Other)?
                            .ignore();
                    }
                }
                Backing::Shared { object, .. } => {
                    object.add_ref();
                    for page in region.page_range().iter() {
                        let (frame, flags) = match self.page_table.translate(page) {
                            Ok(t) => t,
                            Err(_) => continue, // not yet faulted in; nothing to share yet
                        };

                        child_table
                            .map_to(frame, page, flags, mm.frame_allocator())
                            .map_err(|_| MemoryError::Other)?
                            .ignore();
                    }
                }
            }
        }

        Ok((new_pml4_frame.start(), self.regions.clone()))
    }
}
