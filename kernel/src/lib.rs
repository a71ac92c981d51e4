#![no_std]
#![no_main]
#![feature(naked_functions)]
#![feature(const_mut_refs)]
use api::BootInfo;
use core::sync::atomic::{AtomicUsize, Ordering};
extern crate alloc;

pub mod allocator;
pub mod debug;
pub mod error;
pub mod housekeeping_threads;
pub mod interrupts;
pub mod memory;
pub mod multitasking;
pub mod paging;
pub mod qemu;
pub mod serial;
pub mod swap;
pub mod sync;
pub mod syscall;
pub mod time;

use error::KernelError;
use memory::manager::MemoryManager;

/// Boot-time globals that don't belong to any single subsystem: the physical memory
/// offset handed down by the bootloader, needed wherever an `AddressSpace` is built
/// from a raw `cr3` value (e.g. when a new `Process` is created).
pub struct GlobalData {
    physical_memory_offset: AtomicUsize,
}

static GLOBAL_DATA: GlobalData = GlobalData::new();

impl GlobalData {
    const fn new() -> Self {
        Self {
            physical_memory_offset: AtomicUsize::new(0),
        }
    }

    pub fn the() -> &'static GlobalData {
        &GLOBAL_DATA
    }

    pub fn physical_memory_offset(&self) -> usize {
        self.physical_memory_offset.load(Ordering::Relaxed)
    }

    fn set_physical_memory_offset(&self, offset: usize) {
        self.physical_memory_offset.store(offset, Ordering::Relaxed);
    }
}

pub fn kernel_init(boot_info: &'static BootInfo) -> Result<(), KernelError> {
    serial_println!("Initializing kernel");
    interrupts::init();
    time::init();

    GlobalData::the().set_physical_memory_offset(boot_info.physical_memory_offset);

    MemoryManager::the().lock().init(boot_info)?;

    Ok(())
}
