use crate::{
    memory::{Address, PhysicalFrame, Size2MiB, Size4KiB, VirtualAddress},
    paging::{
        mapped_page_table::{MappedPageTable, PageTableFrameMapping, PageTableWalker},
        FrameAllocator, Mapper, MappingError, Page, PageTable, PageTableEntryFlags,
        TlbFlusher, TranslationError, Translator, UnmappingError,
    },
};
#[derive(Debug)]
pub struct PhysicalOffset {
    offset: u64,
}

impl PhysicalOffset {
    pub fn new(offset: u64) -> Self {
        Self { offset }
    }
}

unsafe impl PageTableFrameMapping for PhysicalOffset {
    fn frame_to_virtual(&self, frame: PhysicalFrame) -> VirtualAddress {
        VirtualAddress::new(self.offset + frame.start().as_u64())
    }
}

pub struct OffsetPageTable<'a, P: PageTableFrameMapping> {
    inner: MappedPageTable<'a, P>,
}

impl<'a, P: PageTableFrameMapping> OffsetPageTable<'a, P> {
    pub fn new(pml4t: &'a mut PageTable, mapping: P) -> Self {
        let inner = MappedPageTable::new(PageTableWalker::new(mapping), pml4t);
        Self { inner }
    }

    /// Clears a present PTE's `ACCESSED` flag without unmapping it, returning whether it was
    /// set beforehand. Used by the swap engine's second-chance scan.
    pub fn test_and_clear_accessed(&mut self, page: Page<Size4KiB>) -> Option<bool> {
        self.inner.test_and_clear_accessed(page)
    }

    /// Reads back the `DIRTY` bit of a present PTE without altering it.
    pub fn is_dirty(&self, page: Page<Size4KiB>) -> Option<bool> {
        self.inner.is_dirty(page)
    }

    /// Replaces a present PTE with a non-present entry carrying a swap-entry payload in its
    /// upper bits, returning the frame that was mapped there.
    pub fn replace_with_swap_entry(
        &mut self,
        page: Page<Size4KiB>,
        swap_entry: u64,
    ) -> Result<(PhysicalFrame<Size4KiB>, TlbFlusher<Size4KiB>), UnmappingError> {
        self.inner.replace_with_swap_entry(page, swap_entry)
    }

    /// Reads the swap-entry payload out of a non-present PTE previously set by
    /// `replace_with_swap_entry`, if any is mapped there.
    pub fn read_swap_entry(&self, page: Page<Size4KiB>) -> Option<u64> {
        self.inner.read_swap_entry(page)
    }

    /// Clears `WRITABLE` on a present PTE; see `MappedPageTable::protect_read_only`.
    pub fn protect_read_only(&mut self, page: Page<Size4KiB>) -> Option<TlbFlusher<Size4KiB>> {
        self.inner.protect_read_only(page)
    }

    /// Sets `WRITABLE` on a present PTE; see `MappedPageTable::make_writable`.
    pub fn make_writable(&mut self, page: Page<Size4KiB>) -> Option<TlbFlusher<Size4KiB>> {
        self.inner.make_writable(page)
    }

    /// Direct access to the top-level table; see `MappedPageTable::pml4t`.
    pub fn pml4t(&mut self) -> &mut PageTable {
        self.inner.pml4t()
    }
}

impl<'a, P: PageTableFrameMapping> Mapper<Size4KiB> for OffsetPageTable<'a, P> {
    fn map_to<A>(
        &mut self,
        frame: PhysicalFrame<Size4KiB>,
        page: Page<Size4KiB>,
        flags: PageTableEntryFlags,
        frame_allocator: &mut A,
    ) -> Result<TlbFlusher<Size4KiB>, MappingError>
    where
        A: FrameAllocator<Size4KiB>,
    {
        self.inner.map_to(frame, page, flags, frame_allocator)
    }

    fn unmap(
        &mut self,
        page: Page<Size4KiB>,
    ) -> Result<(PhysicalFrame<Size4KiB>, TlbFlusher<Size4KiB>), UnmappingError> {
        self.inner.unmap(page)
    }
}

impl<'a, P: PageTableFrameMapping> Mapper<Size2MiB> for OffsetPageTable<'a, P> {
    fn map_to<A>(
        &mut self,
        frame: PhysicalFrame<Size2MiB>,
        page: Page<Size2MiB>,
        flags: PageTableEntryFlags,
        frame_allocator: &mut A,
    ) -> Result<TlbFlusher<Size2MiB>, MappingError>
    where
        A: FrameAllocator<Size4KiB>,
    {
        self.inner.map_to(frame, page, flags, frame_allocator)
    }

    fn unmap(
        &mut self,
        page: Page<Size2MiB>,
    ) -> Result<(PhysicalFrame<Size2MiB>, TlbFlusher<Size2MiB>), UnmappingError> {
        self.inner.unmap(page)
    }
}

impl<'a, P: PageTableFrameMapping> Translator<Size4KiB> for OffsetPageTable<'a, P> {
    fn translate(
        &self,
        page: Page<Size4KiB>,
    ) -> Result<(PhysicalFrame<Size4KiB>, PageTableEntryFlags), TranslationError> {
        self.inner.translate(page)
    }
}

impl<'a, P: PageTableFrameMapping> Translator<Size2MiB> for OffsetPageTable<'a, P> {
    fn translate(
        &self,
        page: Page<Size2MiB>,
    ) -> Result<(PhysicalFrame<Size2MiB>, PageTableEntryFlags), TranslationError> {
        self.inner.translate(page)
    }
}
