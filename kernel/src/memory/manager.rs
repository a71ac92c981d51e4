// wraps the frame allocator
// stores the kernel page directory info
// places stuff in virtual memory

use super::{
    frame::FrameTable,
    region::{self, AccessFlags, RegionTree, RegionType, VirtualMemoryRegion},
    virtual_memory_object::{MemoryBackedVirtualMemoryObject, VirtualMemoryObject},
    MemoryError,
};
use crate::{allocator::init_heap, error::KernelError, multitasking::process::Process};
use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use api::BootInfo;
use core::iter::zip;
use util::mutex::Mutex;
use x86_64::{
    memory::{
        FrameAllocator, Page, PageAlignedSize, PageRangeInclusive, PageSize, PhysicalAddress,
        PhysicalFrame, Size4KiB, VirtualAddress,
    },
    paging::{
        linked_list_frame_allocator::LinkedListFrameAllocator,
        offset_page_table::{OffsetPageTable, PhysicalOffset},
        Mapper, PageTable, PageTableEntryFlags,
    },
    register::Cr3,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllocationStrategy {
    /// Back the region with physical frames immediately.
    Now,
    /// Leave the region unbacked; the page-fault handler commits frames on first
    /// touch (see `memory::page_fault`).
    Lazy,
}

static MEMORY_MANAGER: Mutex<MemoryManager> = Mutex::new(MemoryManager::new());

/// Lets the `x86_64` paging code allocate/free frames through the kernel's single
/// frame allocator + frame table without requiring a second live borrow of
/// `MemoryManager` at the call site (it re-enters through the global lock instead).
pub struct FrameAllocatorDelegate;

unsafe impl FrameAllocator<Size4KiB> for FrameAllocatorDelegate {
    fn allocate_frame(&mut self) -> Option<PhysicalFrame<Size4KiB>> {
        MemoryManager::the().lock().allocate_frame()
    }

    fn deallocate_frame(&mut self, frame: PhysicalFrame<Size4KiB>) {
        MemoryManager::the().lock().free_frame(frame);
    }
}

// This structure is responsible for tracking the whole allocated memory as well
// as allocating new memory
pub struct MemoryManager {
    frame_allocator: LinkedListFrameAllocator,
    frame_table: FrameTable,
    kernel_pml4t: PhysicalFrame,
    kernel_page_table: Option<OffsetPageTable<'static, PhysicalOffset>>,
    physical_memory_offset: usize,
    // Holds information about the complete virtual kernel memory space
    region_tree: RegionTree,
}

impl MemoryManager {
    pub const fn new() -> Self {
        Self {
            frame_allocator: LinkedListFrameAllocator::new(),
            frame_table: FrameTable::new(),
            kernel_pml4t: PhysicalFrame::new(),
            physical_memory_offset: 0,
            kernel_page_table: None,
            region_tree: RegionTree::new(),
        }
    }

    // TODO: properly do error management
    pub fn init(&mut self, boot_info: &'static BootInfo) -> Result<(), KernelError> {
        self.frame_allocator.init(
            boot_info.memory_regions.iter().copied(),
            boot_info.physical_memory_offset,
        );
        self.physical_memory_offset = boot_info.physical_memory_offset;

        let (pml4t, _) = Cr3::read();
        unsafe { self.init_kernel_page_table(pml4t, boot_info.physical_memory_offset) };

        let heap_range = init_heap(
            self.kernel_page_table.as_mut().unwrap(),
            &mut self.frame_allocator,
        )?;
        self.add_memory_region(RegionType::Heap, heap_range);

        // 0xffffffff00000000 - 0xffffffff80000000
        self.add_memory_region(
            RegionType::Stack,
            PageRangeInclusive::new(
                boot_info.kernel_stack.start_page,
                Page::containing_address(boot_info.kernel.start_address() - 1u64),
            ),
        );

        self.add_memory_region(RegionType::Stack, boot_info.kernel_stack);
        self.add_memory_region(RegionType::Elf, boot_info.kernel);

        Ok(())
    }

    pub fn kernel_pml4t(&self) -> PhysicalFrame {
        self.kernel_pml4t
    }

    fn add_memory_region(&mut self, typ: RegionType, range: PageRangeInclusive) {
        self.region_tree.add_region(typ, range);
    }

    pub fn kernel_page_table(&mut self) -> &mut OffsetPageTable<'static, PhysicalOffset> {
        self.kernel_page_table.as_mut().unwrap()
    }

    pub fn region_tree(&mut self) -> &mut RegionTree {
        &mut self.region_tree
    }

    pub fn physical_memory_offset(&self) -> usize {
        self.physical_memory_offset
    }

    unsafe fn init_kernel_page_table(
        &mut self,
        pml4t: PhysicalFrame,
        physical_memory_offset: usize,
    ) {
        self.kernel_pml4t = pml4t;
        let virtual_base = VirtualAddress::new(pml4t.start() + self.physical_memory_offset as u64);

        let page_table_ptr: *mut PageTable = virtual_base.as_mut_ptr();
        let raw_page_table = &mut *page_table_ptr;

        self.kernel_page_table = Some(OffsetPageTable::new(
            raw_page_table,
            PhysicalOffset::new(physical_memory_offset),
        ));
    }

    // todo: lazily allocate and only back with frame on page fault
    pub fn allocate_kernel_region_with_size(
        &mut self,
        size: PageAlignedSize,
        name: String,
        typ: RegionType,
        access_flags: AccessFlags,
        strategy: AllocationStrategy,
    ) -> Result<VirtualMemoryRegion, KernelError> {
        let obj: Box<dyn VirtualMemoryObject> =
            Box::new(MemoryBackedVirtualMemoryObject::create(self, size, strategy)?);

        // all kernel stacks have a guard page
        let region_size = match typ {
            RegionType::Stack => size + Size4KiB::SIZE,
            _ => size,
        };

        let page_range: PageRangeInclusive = self.region_tree.try_allocate_size_in_region(
            name.clone(),
            typ,
            region_size,
            region::PlacingStrategy::Anywhere,
        )?;

        self.map_region_frames(&page_range, &obj, typ, access_flags.into())?;

        Ok(VirtualMemoryRegion::new(
            page_range, name, obj, typ, access_flags,
        ))
    }

    /// Same as [`Self::allocate_kernel_region_with_size`]; `process` is accepted (rather
    /// than inferring the current one) since at thread-creation time the calling
    /// thread's process is not necessarily the process the new stack belongs to.
    /// Bookkeeping the region against a specific thread id is the caller's job, since
    /// the id isn't assigned until after the stack region exists.
    pub fn allocate_region_with_size(
        &mut self,
        _process: Arc<Mutex<Process>>,
        size: PageAlignedSize,
        name: String,
        typ: RegionType,
        access_flags: AccessFlags,
        strategy: AllocationStrategy,
    ) -> Result<VirtualMemoryRegion, KernelError> {
        self.allocate_kernel_region_with_size(size, name, typ, access_flags, strategy)
    }

    fn map_region_frames(
        &mut self,
        page_range: &PageRangeInclusive,
        obj: &Box<dyn VirtualMemoryObject>,
        typ: RegionType,
        access_flags: PageTableEntryFlags,
    ) -> Result<(), KernelError> {
        // all kernel stacks have a guard page, left unmapped
        if typ == RegionType::Stack {
            self.kernel_page_table
                .as_mut()
                .unwrap()
                .map_to(
                    PhysicalFrame::containing_address(PhysicalAddress::new(0)),
                    page_range.start_page,
                    PageTableEntryFlags::NONE,
                    &mut self.frame_allocator,
                )?
                .ignore();
        }

        let frames = match obj.as_memory_backed() {
            Some(backed) => backed.frames().clone(),
            // Lazily-backed or shared objects commit frames on first page fault.
            None => return Ok(()),
        };

        let mut pages = page_range.iter();
        if typ == RegionType::Stack {
            pages.next(); // skip guard page
        }

        assert_eq!(pages.clone().count(), frames.len());

        for (frame, page) in zip(frames, pages) {
            self.kernel_page_table
                .as_mut()
                .unwrap()
                .map_to(frame, page, access_flags, &mut self.frame_allocator)?
                .flush();
        }

        Ok(())
    }

    pub fn frame_allocator(&mut self) -> &mut LinkedListFrameAllocator {
        &mut self.frame_allocator
    }

    pub fn frame_table(&mut self) -> &mut FrameTable {
        &mut self.frame_table
    }

    pub fn allocate_frame(&mut self) -> Option<PhysicalFrame<Size4KiB>> {
        let frame = self.frame_allocator.allocate_frame()?;
        self.frame_table.track(frame);
        Some(frame)
    }

    pub fn free_frame(&mut self, frame: PhysicalFrame<Size4KiB>) {
        if self.frame_table.release(frame) {
            self.frame_allocator.deallocate_frame(frame);
        }
    }

    pub fn try_allocate_frames(&mut self, amt: usize) -> Result<Vec<PhysicalFrame>, MemoryError> {
        (0..amt)
            .map(|_| self.allocate_frame().ok_or(MemoryError::OutOfPhysicalMemory))
            .collect()
    }

    pub fn the() -> &'static Mutex<MemoryManager> {
        &MEMORY_MANAGER
    }
}
