use crate::memory::{Address, VirtualAddress};
use core::arch::asm;

pub fn int3() {
    unsafe {
        asm!("int3", options(nomem, nostack));
    }
}

/// Halts the CPU until the next interrupt. Used by the idle thread and by any loop
/// that is waiting for a timer tick or device interrupt to make progress.
pub fn hlt() {
    unsafe {
        asm!("hlt", options(nomem, nostack, preserves_flags));
    }
}

/// Invalidates any translation lookaside buffer (TLB) entries specified with the source operand.
/// The source operand is a memory address. The processor determines the page
/// that contains that address and flushes all TLB entries for that page.
pub fn flush_tlb(address: VirtualAddress) {
    unsafe {
        asm!("invlpg [{0}]", in(reg) address.as_u64() as usize, options(nostack, preserves_flags))
    }
}
