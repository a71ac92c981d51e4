use bitflags::bitflags;
use core::{
    arch::asm,
    fmt::{self, Debug},
};
use lazy_static::lazy_static;
use x86_64::{
    gdt::{GlobalDescriptorTable, SegmentDescriptor, SegmentSelector},
    handler_with_error_code, handler_without_error_code,
    idt::InterruptDescriptorTable,
    instructions::int3,
    interrupts::{self, ExceptionStackFrame, PageFaultErrorCode},
    memory::{Address, Page, PageSize, PhysicalFrame, Size4KiB, VirtualAddress},
    mutex::Mutex,
    paging::PageTableEntryFlags,
    pop_scratch_registers, print, println, push_scratch_registers,
    register::{Cr2, CS, DS, ES, SS},
    tss::{TaskStateSegment, DOUBLE_FAULT_IST_IDX},
};

use crate::{
    error::KernelError,
    memory::{manager::MemoryManager, vma::{Backing, RegionFlags}, MemoryError},
    multitasking::{process::{self, Process}, thread},
    swap,
};

mod hardware;
use hardware::pic8259::ChainedPics;
pub const MASTER_PIC_OFFSET: u8 = 0x20;
pub const SLAVE_PIC_OFFSET: u8 = MASTER_PIC_OFFSET + 8;
static PICS: Mutex<ChainedPics> = Mutex::new(ChainedPics::new());

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = 0,
}

impl InterruptIndex {
    fn as_u8(self) -> u8 {
        self as u8
    }

    fn as_usize(self) -> usize {
        usize::from(self.as_u8())
    }

    fn as_remapped_idt_number(self) -> u8 {
        self.as_u8() + MASTER_PIC_OFFSET as u8
    }
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::default();

        unsafe {
            idt.divide_error
                .set_handler_function(handler_without_error_code!(divide_by_zero_handler));

            idt.debug
                .set_handler_function(handler_without_error_code!(debug_handler));

            idt.non_maskable_interrupt
                .set_handler_function(handler_without_error_code!(non_maskable_interrupt));

            idt.breakpoint
                .set_handler_function(handler_without_error_code!(breakpoint_handler));

            idt.invalid_opcode
                .set_handler_function(handler_without_error_code!(invalid_opcode_handler));

            idt.device_not_available
                .set_handler_function(handler_without_error_code!(device_not_available_handler));

            idt.invalid_tss
                .set_handler_function(handler_with_error_code!(invalid_tss_handler));

            idt.segment_not_present
                .set_handler_function(handler_with_error_code!(segment_not_present_handler));

            idt.stack_segment_fault
                .set_handler_function(handler_with_error_code!(stack_segment_fault_handler));

            idt.page_fault
                .set_handler_function(handler_with_error_code!(page_fault_handler));

            idt.alignment_check
                .set_handler_function(handler_with_error_code!(alignment_check_handler));

            idt.double_fault
                .set_handler_function(handler_with_error_code!(double_fault_handler))
                .set_interrupt_stack_index(DOUBLE_FAULT_IST_IDX as u16);

            idt.interrupts[InterruptIndex::Timer.as_usize()]
                .set_handler_function(handler_without_error_code!(timer_interrupt_handler));
        }

        idt
    };
}

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_IDX] = {
            const STACK_SIZE: usize = Size4KiB::SIZE as usize * 5;
            static mut STACK: [u8; STACK_SIZE] = [0; STACK_SIZE];

            let stack_start = VirtualAddress::from_ptr(unsafe { &STACK });
            let stack_end = stack_start + STACK_SIZE;

            stack_end
        };

        tss
    };
}

lazy_static! {
    static ref GDT: (
        GlobalDescriptorTable,
        SegmentSelector,
        SegmentSelector,
        SegmentSelector
    ) = {
        let mut gdt = GlobalDescriptorTable::new();
        // 0x8
        let tss_selector = gdt.add_entry(SegmentDescriptor::new_tss_segment(&TSS));
        // 0x18
        let kernel_code_selector = gdt.add_entry(SegmentDescriptor::kernel_code_segment());
        // 0x20
        let kernel_data_selector = gdt.add_entry(SegmentDescriptor::kernel_data_segment());
        (
            gdt,
            tss_selector,
            kernel_code_selector,
            kernel_data_selector,
        )
    };
}

pub fn init() {
    // load the gdt
    GDT.0.load();
    unsafe {
        // update cs and ss segment registers
        CS::write(GDT.2);
        DS::write(GDT.3);
        ES::write(GDT.3);
        SS::write(GDT.3);
        // load the tss selector into the task register
        TaskStateSegment::load(GDT.1);
    }

    IDT.load();

    // initialize & remap pic
    PICS.lock().init(MASTER_PIC_OFFSET, SLAVE_PIC_OFFSET);
    //PIC.lock().remap_pic();
    unsafe { interrupts::enable() };
}

// C calling convention
extern "C" fn divide_by_zero_handler(frame: &ExceptionStackFrame) -> ! {
    println!("Exception: divide by zero");
    loop {}
}

extern "C" fn invalid_opcode_handler(frame: &ExceptionStackFrame) -> ! {
    println!("Invalid opcode handler");
    loop {}
}

extern "C" fn general_protection_fault_handler(frame: &ExceptionStackFrame, error_code: u64) -> ! {
    println!("General protection fault");
    loop {}
}

extern "C" fn segment_not_present_handler(frame: &ExceptionStackFrame, error_code: u64) -> ! {
    println!(
        "General protection fault handler \n error_code: {:?} \n exception frame: {:?}",
        error_code, frame
    );
    loop {}
}

extern "C" fn page_fault_handler(frame: &ExceptionStackFrame, error_code: u64) {
    let error = PageFaultErrorCode::from_bits_truncate(error_code);
    let fault_addr = Cr2::read();
    let page: Page<Size4KiB> = Page::containing_address(fault_addr);

    let present = error.contains(PageFaultErrorCode::PROTECTION_VIOLATION);
    let write = error.contains(PageFaultErrorCode::WRITE_VIOLATION);

    if let Err(err) = resolve_page_fault(page, present, write) {
        fail_page_fault(frame, fault_addr, error, err);
    }
}

/// Implements the page-fault decision table: not-present faults are mapped in (fresh
/// zero page, swap-in, or a shared object's committed frame); present write faults
/// against a writable region either just flip the writable bit or, if the frame is
/// shared (COW), copy it first. Everything else - write to a read-only region, read
/// without READ/EXEC, a present-and-not-write "spurious" fault, or no region at all -
/// is an error for the caller to decide what to do with.
fn resolve_page_fault(page: Page<Size4KiB>, present: bool, write: bool) -> Result<(), KernelError> {
    let process = Process::current();
    let mut guard = process.lock();
    let space = guard.address_space();

    let region = space
        .regions()
        .find(page.start_address())
        .ok_or(MemoryError::InvalidRegion)?;
    let flags = region.flags();
    let backing = region.backing().clone();
    let region_start = region.start();

    if !present {
        if write && !flags.contains(RegionFlags::WRITE) {
            return Err(MemoryError::AccessViolation.into());
        }
        if !write && !flags.intersects(RegionFlags::READ | RegionFlags::EXEC) {
            return Err(MemoryError::AccessViolation.into());
        }

        if space.read_swap_entry(page).is_some() {
            drop(guard);
            return swap::swap_in(&process, page, PageTableEntryFlags::from(flags));
        }

        let pte_flags = PageTableEntryFlags::from(flags);
        match backing {
            Backing::Anonymous => {
                let frame = MemoryManager::the().lock().allocate_frame().ok_or_else(|| {
                    swap::note_pressure();
                    MemoryError::OutOfPhysicalMemory
                })?;
                zero_frame(frame);

                unsafe { space.map_to(frame, page, pte_flags) }
                    .map_err(|_| MemoryError::Other)?
                    .flush();
                drop(guard);
                swap::register_page(&process, page);
            }
            Backing::Shared { object, offset_pages } => {
                let index = offset_pages + page_delta(region_start, page.start_address());
                let frame = object.commit(index).map_err(|err| {
                    swap::note_pressure();
                    err
                })?;

                unsafe { space.map_to(frame, page, pte_flags) }
                    .map_err(|_| MemoryError::Other)?
                    .flush();
                object.register_mapping(index, &process, page);
                drop(guard);
            }
        }
        return Ok(());
    }

    if !write {
        return Err(MemoryError::Other.into()); // present, read: spurious
    }
    if !flags.contains(RegionFlags::WRITE) {
        return Err(MemoryError::AccessViolation.into());
    }

    let (current_frame, current_flags) = space
        .translate(page)
        .map_err(|_| MemoryError::NoSuchMapping)?;

    if MemoryManager::the().lock().frame_table().is_shared(current_frame) {
        let new_frame = MemoryManager::the().lock().allocate_frame().ok_or_else(|| {
            swap::note_pressure();
            MemoryError::OutOfPhysicalMemory
        })?;
        copy_frame(current_frame, new_frame);

        let (_, unmap_flusher) = space.unmap(page).map_err(|_| MemoryError::Other)?;
        unmap_flusher.flush();
        unsafe { space.map_to(new_frame, page, current_flags | PageTableEntryFlags::WRITABLE) }
            .map_err(|_| MemoryError::Other)?
            .flush();

        MemoryManager::the().lock().free_frame(current_frame);
    } else {
        space
            .make_writable(page)
            .map(|flusher| flusher.flush())
            .ok_or(MemoryError::NoSuchMapping)?;
    }

    Ok(())
}

fn page_delta(region_start: VirtualAddress, addr: VirtualAddress) -> usize {
    ((addr.as_u64() - region_start.as_u64()) / Size4KiB::SIZE) as usize
}

fn frame_to_virtual(frame: PhysicalFrame<Size4KiB>) -> VirtualAddress {
    let offset = MemoryManager::the().lock().physical_memory_offset();
    VirtualAddress::new(frame.start() + offset as u64)
}

fn zero_frame(frame: PhysicalFrame<Size4KiB>) {
    let ptr = frame_to_virtual(frame).as_mut_ptr::<[u8; Size4KiB::SIZE as usize]>();
    unsafe { *ptr = [0u8; Size4KiB::SIZE as usize] };
}

fn copy_frame(src: PhysicalFrame<Size4KiB>, dst: PhysicalFrame<Size4KiB>) {
    let src_ptr = frame_to_virtual(src).as_ptr::<[u8; Size4KiB::SIZE as usize]>();
    let dst_ptr = frame_to_virtual(dst).as_mut_ptr::<[u8; Size4KiB::SIZE as usize]>();
    unsafe { *dst_ptr = *src_ptr };
}

/// A fault `resolve_page_fault` couldn't service. §4.3: a fault whose trap frame shows
/// pure user-mode execution (`cpl() == 3`) kills the task with a coded exit instead of
/// the whole kernel; nothing in this kernel currently runs at CPL 3 (there is no
/// ring-3/ring-0 split - see the crate-level notes in `multitasking::process`), so in
/// practice every fault that reaches here is a kernel bug and takes the `else` branch,
/// but the distinction is kept so a future ring-3 loader only has to start setting a
/// real CS selector, not touch this handler.
fn fail_page_fault(frame: &ExceptionStackFrame, addr: VirtualAddress, error: PageFaultErrorCode, err: KernelError) {
    if frame.cpl() == 3 {
        println!(
            "Page fault: killing task (addr={:#x}, error={:?}, cause={:?})",
            addr.as_u64(),
            error,
            err
        );
        let process = Process::current();
        let pid = process.lock().id();
        Process::exit(&process, -11);
        let _ = process::kill(pid);
        thread::leave_thread();
    } else {
        println!(
            "Unrecoverable page fault \n error: {:?} \n addr: {:#018x} \n cause: {:?} \n exception frame: {:?}",
            error,
            addr.as_u64(),
            err,
            frame
        );
        loop {}
    }
}

extern "C" fn alignment_check_handler(frame: &ExceptionStackFrame, error_code: u64) -> ! {
    println!("Alignment check handler");
    loop {}
}

extern "C" fn invalid_tss_handler(frame: &ExceptionStackFrame, error_code: u64) -> ! {
    println!("Invalid tss handler: {:?}", frame);
    loop {}
}

extern "C" fn stack_segment_fault_handler(frame: &ExceptionStackFrame, error_code: u64) -> ! {
    println!("Stack segment handler: {:?}", frame);
    loop {}
}

extern "C" fn breakpoint_handler(frame: &ExceptionStackFrame) {
    println!("Int3 triggered: {:?}", frame);
}

extern "C" fn non_maskable_interrupt(frame: &ExceptionStackFrame) {
    println!("Non maskable interrupt handler {:?}", frame);
}

extern "C" fn debug_handler(frame: &ExceptionStackFrame) {
    println!("Debug handler {:?}", frame);
}

extern "C" fn device_not_available_handler(frame: &ExceptionStackFrame) {
    println!("Device not available handler {:?}", frame);
}

// double fault acts kind of like a catch-all block
// “double fault exception can occur when a second exception occurs during the
// handling of a prior (first) exception handler”. The “can” is important:
// Only very specific combinations of exceptions lead to a double fault
// https://os.phil-opp.com/double-fault-exceptions/
// (A double fault will always generate an error code with a value of zero. )
extern "C" fn double_fault_handler(frame: &ExceptionStackFrame, _error_code: u64) -> ! {
    println!("Double fault error code: {}", _error_code);
    println!("Double fault handler: {:?}", frame);
    loop {}
}

extern "C" fn timer_interrupt_handler(_frame: &ExceptionStackFrame) {
    crate::multitasking::timer::tick();

    PICS.lock()
        .notify_end_of_interrupt(InterruptIndex::Timer.as_remapped_idt_number());

    unsafe { crate::multitasking::scheduler::Scheduler::the().request_resched() };
    if unsafe { crate::multitasking::scheduler::Scheduler::the().take_resched_request() } {
        crate::multitasking::scheduler::schedule();
    }
}
