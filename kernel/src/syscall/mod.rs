//! System-call trap boundary (§6). A single dispatch function takes a call number and
//! up to 5 raw argument words and returns a signed result: non-negative is success (a
//! value or `0`), negative is one of the small fixed error codes below. This is the
//! *only* place `KernelError` gets collapsed into an integer - everything internal to
//! the kernel keeps using `Result<T, KernelError>` all the way up to here (§1a, §7).
//!
//! This kernel has no ring-3 transition or ELF-loader wired into the boot path yet
//! (every execution unit is a kernel thread, see the design note atop
//! `multitasking::process`), so there is no real trap gate calling into [`dispatch`]
//! today. The table exists, is numerically complete, and is exercised directly by
//! tests and by anything driving it in-kernel (e.g. a future trap gate, or the debug
//! stub) the same way a real `int 0x80`/`syscall` handler would.

use crate::{
    error::{KernelError, SwapError, SyncError, TaskError},
    memory::{
        shared_memory::SharedMemoryObject,
        vma::{Backing, Region, RegionFlags},
        MemoryError,
    },
    multitasking::{
        process::{self, Process, ProcessId},
        thread::{ThreadEntryFunc, ThreadPriority, WaitStatus},
        timer,
    },
    sync::Semaphore,
    time,
};
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::mem::transmute;
use util::{
    elf_loader::elf::ElfBinary,
    mutex::Mutex,
};
use x86_64::{
    memory::{Address, Page, PageAlignedSize, PageRangeInclusive, PageSize, Size4KiB, VirtualAddress},
    paging::PageTableEntryFlags,
};

/// Matches the call-name ordering fixed in §6. Numeric identifiers are load-bearing -
/// a userland libc would hardcode them - so this list only ever grows at the end.
#[repr(u64)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Syscall {
    Exit = 1,
    Fork,
    Wait,
    Exec,
    Clone,
    ExitThread,
    Yield,
    Sleep,
    Kill,
    GetTime,
    GetPid,
    Brk,
    Mmap,
    Munmap,
    Shmem,
    Putc,
    Pgdir,
    SemInit,
    SemPost,
    SemWait,
    SemFree,
    SemGetValue,
    EventSend,
    EventRecv,
    MboxInit,
    MboxSend,
    MboxRecv,
    MboxFree,
    MboxInfo,
    Open,
    Close,
    Read,
    Write,
    Seek,
    Fstat,
    Fsync,
    Chdir,
    Getcwd,
    Mkdir,
    Link,
    Rename,
    Readlink,
    Symlink,
    Unlink,
    Getdirentry,
    Dup,
    Pipe,
    Mkfifo,
}

impl Syscall {
    fn from_raw(n: u64) -> Option<Self> {
        if n >= 1 && n <= Syscall::Mkfifo as u64 {
            Some(unsafe { transmute::<u64, Syscall>(n) })
        } else {
            None
        }
    }
}

// §7 error namespace. Small negative integers; `0` and above are success.
pub const INVAL: i64 = -1;
pub const NOMEM: i64 = -2;
pub const NO_FREE_PROC: i64 = -3;
pub const BAD_PROC: i64 = -4;
pub const KILLED: i64 = -5;
pub const SWAP_FAULT: i64 = -6;
pub const INVAL_ELF: i64 = -7;
/// Not in §7's error namespace proper, but needed for the filesystem/IPC calls §6
/// explicitly scopes out: "stubbed as NOT_IMPLEMENTED returning INVAL".
const NOT_IMPLEMENTED: i64 = INVAL;

fn collapse(err: KernelError) -> i64 {
    match err {
        KernelError::MemoryError(MemoryError::OutOfPhysicalMemory)
        | KernelError::MemoryError(MemoryError::OutOfVirtualMemory) => NOMEM,
        KernelError::MemoryError(_) => INVAL,
        KernelError::TaskError(TaskError::OutOfProcessIds) => NO_FREE_PROC,
        KernelError::TaskError(TaskError::NoSuchChild) | KernelError::TaskError(TaskError::NoSuchProcess) => {
            BAD_PROC
        }
        KernelError::TaskError(TaskError::Interrupted) => KILLED,
        KernelError::SwapError(SwapError::DeviceFull) => NOMEM,
        KernelError::SwapError(SwapError::BadSwapEntry) | KernelError::SwapError(SwapError::IoError) => {
            SWAP_FAULT
        }
        KernelError::SyncError(SyncError::Interrupted) => KILLED,
        KernelError::SyncError(SyncError::NoWaiters) => INVAL,
        KernelError::DebugError(_) => INVAL,
    }
}

fn collapse_task(err: TaskError) -> i64 {
    collapse(KernelError::TaskError(err))
}

/// Dispatches one syscall. `args` carries up to 5 register-sized arguments, used
/// positionally per call (unused trailing slots are ignored).
pub fn dispatch(call: u64, args: [u64; 5]) -> i64 {
    let Some(call) = Syscall::from_raw(call) else {
        return INVAL;
    };

    match call {
        Syscall::Exit => sys_exit(args[0] as i32),
        Syscall::Fork => sys_fork(args[0]),
        Syscall::Wait => sys_wait(args[0]),
        Syscall::Exec => sys_exec(args[0]),
        Syscall::Clone => sys_clone(args[0], args[1]),
        Syscall::ExitThread => sys_exit_thread(),
        Syscall::Yield => sys_yield(),
        Syscall::Sleep => sys_sleep(args[0]),
        Syscall::Kill => sys_kill(args[0]),
        Syscall::GetTime => sys_gettime(),
        Syscall::GetPid => sys_getpid(),
        Syscall::Brk => sys_brk(args[0]),
        Syscall::Mmap => sys_mmap(args[0], args[1]),
        Syscall::Munmap => sys_munmap(args[0], args[1]),
        Syscall::Shmem => sys_shmem(args[0]),
        Syscall::SemInit => sys_sem_init(args[0] as i64),
        Syscall::SemPost => sys_sem_post(args[0]),
        Syscall::SemWait => sys_sem_wait(args[0]),
        Syscall::SemFree => sys_sem_free(args[0]),
        Syscall::SemGetValue => sys_sem_get_value(args[0]),
        _ => NOT_IMPLEMENTED,
    }
}

fn sys_exit(code: i32) -> i64 {
    Process::exit(&Process::current(), code);
    0
}

/// `args[0]` is the entry point the child starts executing at - see
/// `process::fork`'s own doc comment on why this kernel's `fork` needs one at all.
fn sys_fork(entry: u64) -> i64 {
    if entry == 0 {
        return INVAL;
    }
    let entry: ThreadEntryFunc = unsafe { transmute::<u64, ThreadEntryFunc>(entry) };
    match process::fork(&Process::current(), entry) {
        Ok(pid) => pid_to_raw(pid) as i64,
        Err(err) => collapse(err),
    }
}

fn sys_wait(child_pid: u64) -> i64 {
    let child = ProcessId::from_u64(child_pid);
    match Process::wait(&Process::current(), child) {
        Ok(code) => code as i64,
        Err(err) => collapse_task(err),
    }
}

/// `args[0]` is the start address of a raw ELF image already resident in the caller's
/// own address space - this kernel has no filesystem (§1 Non-goals), so there's no
/// `open`/`read` to pull the bytes from first, unlike `original/.../proc.c:682
/// load_icode`. What that function does once it has the image in hand, this does too:
/// tear down every existing region, then for each `PT_LOAD` program header, map fresh
/// pages with the segment's R/W/X permissions and copy its file bytes in (the tail
/// past `filesz`, up to `memsz`, is left zeroed - bss).
///
/// There's no ring-3 transition wired into this kernel (see the design note atop
/// `multitasking::process`), so unlike a real `exec` nothing actually jumps to the
/// loaded entry point or sets up an argc/argv stack for it afterwards - that half
/// stays a documented gap (DESIGN.md). This still fully replaces the caller's memory
/// image, which is the part of §4.6 that doesn't depend on either of those.
fn sys_exec(image_addr: u64) -> i64 {
    if image_addr == 0 {
        return INVAL_ELF;
    }
    let process = Process::current();

    let image_region = {
        let mut guard = process.lock();
        let regions = guard.address_space().regions_mut();
        match regions.find(VirtualAddress::new(image_addr)) {
            Some(region) if region.start().as_u64() == image_addr => region.clone(),
            _ => return INVAL_ELF,
        }
    };
    let image_len = (image_region.end().as_u64() - image_region.start().as_u64()) as usize;
    // Safe only because this is still the caller's own, unchanged address space: the
    // pointer is read under the current CR3, before any region is torn down.
    let image: Vec<u8> =
        unsafe { core::slice::from_raw_parts(VirtualAddress::new(image_addr).as_ptr::<u8>(), image_len) }
            .to_vec();

    let elf = match ElfBinary::new(&image) {
        Ok(elf) => elf,
        Err(_) => return INVAL_ELF,
    };
    let segments: Vec<_> = match elf.program_headers() {
        Ok(headers) => headers.filter(|p| p.is_loadable()).collect(),
        Err(_) => return INVAL_ELF,
    };
    if segments.iter().any(|p| p.is_tls()) {
        return INVAL_ELF; // no TLS support, same limit `util::elf_loader` itself has
    }

    let old_regions: Vec<Region> = process.lock().address_space().regions().iter().cloned().collect();
    for region in old_regions {
        teardown_region(&process, region);
    }

    for segment in &segments {
        let mut flags = RegionFlags::READ;
        if segment.flags().is_writable() {
            flags |= RegionFlags::WRITE;
        }
        if segment.flags().is_executable() {
            flags |= RegionFlags::EXEC;
        }

        let region_start = align_down(segment.virtual_addr(), Size4KiB::SIZE);
        let region_end = align_up(segment.virtual_addr() + segment.mem_size(), Size4KiB::SIZE);

        {
            let mut guard = process.lock();
            let regions = guard.address_space().regions_mut();
            if regions
                .insert(Region::new(page_range(region_start, region_end), flags, Backing::Anonymous))
                .is_err()
            {
                return INVAL_ELF;
            }
        }

        let pte_flags = PageTableEntryFlags::from(flags);
        let file_start = segment.virtual_addr();
        let file_end = file_start + segment.file_size();

        for page in page_range(region_start, region_end).iter() {
            let frame = match crate::memory::manager::MemoryManager::the().lock().allocate_frame() {
                Some(frame) => frame,
                None => return collapse(MemoryError::OutOfPhysicalMemory.into()),
            };

            let mut guard = process.lock();
            let space = guard.address_space();
            let mapped = unsafe { space.map_to(frame, page, pte_flags) };
            drop(guard);
            match mapped {
                Ok(flusher) => flusher.flush(),
                Err(_) => return INVAL_ELF,
            }

            let page_start = page.start_address().as_u64();
            zero_frame(frame);

            let copy_start = core::cmp::max(page_start, file_start);
            let copy_end = core::cmp::min(page_start + Size4KiB::SIZE, file_end);
            if copy_start < copy_end {
                let file_offset = (segment.offset() + (copy_start - file_start)) as usize;
                let len = (copy_end - copy_start) as usize;
                if let Some(bytes) = image.get(file_offset..file_offset + len) {
                    write_into_frame(frame, (copy_start - page_start) as usize, bytes);
                }
            }
        }
    }

    0
}

fn align_down(value: u64, align: u64) -> u64 {
    value / align * align
}

fn zero_frame(frame: x86_64::memory::PhysicalFrame<Size4KiB>) {
    let offset = crate::memory::manager::MemoryManager::the().lock().physical_memory_offset();
    let ptr = VirtualAddress::new(frame.start() + offset as u64).as_mut_ptr::<[u8; Size4KiB::SIZE as usize]>();
    unsafe { *ptr = [0u8; Size4KiB::SIZE as usize] };
}

fn write_into_frame(frame: x86_64::memory::PhysicalFrame<Size4KiB>, offset_in_page: usize, bytes: &[u8]) {
    let offset = crate::memory::manager::MemoryManager::the().lock().physical_memory_offset();
    let dst = VirtualAddress::new(frame.start() + offset as u64).as_mut_ptr::<u8>();
    unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.add(offset_in_page), bytes.len()) };
}

const CLONE_VM: u64 = 0x100;
const CLONE_THREAD: u64 = 0x200;

/// `args[0]` is the entry point, `args[1]` the clone flags. `CLONE_VM|CLONE_THREAD`
/// spawns a plain kernel thread inside the caller's own process (true shared address
/// space); anything else falls back to `fork`'s COW-duplicated child, matching the
/// flag's real-world meaning of "share everything" vs. "share nothing".
fn sys_clone(entry: u64, flags: u64) -> i64 {
    if entry == 0 {
        return INVAL;
    }
    let entry: ThreadEntryFunc = unsafe { transmute::<u64, ThreadEntryFunc>(entry) };

    if flags & CLONE_VM != 0 && flags & CLONE_THREAD != 0 {
        match process::spawn_kernel_thread(
            "cloned",
            entry,
            ThreadPriority::Normal,
            crate::memory::manager::AllocationStrategy::Now,
        ) {
            Ok(tid) => tid as i64,
            Err(err) => collapse(err),
        }
    } else {
        sys_fork(entry as *const () as u64)
    }
}

fn sys_exit_thread() -> i64 {
    crate::multitasking::thread::leave_thread();
}

fn sys_yield() -> i64 {
    crate::multitasking::scheduler::schedule();
    0
}

fn sys_sleep(ms: u64) -> i64 {
    match timer::sleep_ms(ms) {
        WaitStatus::Woken => 0,
        WaitStatus::Interrupted => KILLED,
    }
}

fn sys_kill(pid: u64) -> i64 {
    match process::kill(ProcessId::from_u64(pid)) {
        Ok(()) => 0,
        Err(err) => collapse_task(err),
    }
}

fn sys_gettime() -> i64 {
    time::Time::uptime_ms() as i64
}

fn sys_getpid() -> i64 {
    pid_to_raw(Process::current().lock().id()) as i64
}

fn pid_to_raw(pid: ProcessId) -> u64 {
    pid.as_u64()
}

// --- brk / mmap / munmap -----------------------------------------------------------
//
// This kernel's only per-process virtual memory tracking is `AddressSpace::regions`
// (`memory::vma::RegionMap`), built for the swap subsystem's benefit. There is no
// ring-3/ring-0 split, so "user address space" below is a convention, not an
// enforced privilege boundary: addresses are chosen from a fixed high range that
// stays clear of the regions the boot-time kernel mapping already occupies.

const HEAP_BASE: u64 = 0x0000_6000_0000_0000;
const MMAP_BASE: u64 = 0x0000_7000_0000_0000;
const USER_LIMIT: u64 = 0x0000_7fff_ffff_f000;

static HEAP_ENDS: Mutex<BTreeMap<u64, u64>> = Mutex::new(BTreeMap::new());

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) / align * align
}

fn page_range(start: u64, end: u64) -> PageRangeInclusive<Size4KiB> {
    let start_page = Page::containing_address(VirtualAddress::new(start));
    let end_page = Page::containing_address(VirtualAddress::new(end - 1));
    PageRangeInclusive::new(start_page, end_page)
}

/// `requested == 0` queries the current break without changing it, matching the
/// classic `brk(2)` convention.
fn sys_brk(requested: u64) -> i64 {
    let process = Process::current();
    let pid = process.lock().id().as_u64();

    let mut heap_ends = HEAP_ENDS.lock();
    let current_end = *heap_ends.entry(pid).or_insert(HEAP_BASE);

    if requested == 0 {
        return current_end as i64;
    }
    if requested < HEAP_BASE || requested > USER_LIMIT {
        return INVAL;
    }

    let new_end = align_up(requested, Size4KiB::SIZE);
    let mut guard = process.lock();
    let regions = guard.address_space().regions_mut();

    regions.remove(VirtualAddress::new(HEAP_BASE));
    if new_end > HEAP_BASE {
        let region = Region::new(
            page_range(HEAP_BASE, new_end),
            RegionFlags::READ | RegionFlags::WRITE,
            Backing::Anonymous,
        );
        if regions.insert(region).is_err() {
            return INVAL;
        }
    }
    drop(guard);

    *heap_ends.get_mut(&pid).unwrap() = new_end;
    new_end as i64
}

const MAP_WRITE: u64 = 0x100;

/// `args[0]` is the length in bytes, `args[1]` the mmap flags (`MAP_WRITE`, `MAP_STACK`
/// - stack placement itself isn't modeled here, only the permission bit). Pages are
/// committed lazily by the page-fault handler, matching `Backing::Anonymous`'s
/// contract.
fn sys_mmap(len: u64, flags: u64) -> i64 {
    if len == 0 {
        return INVAL;
    }
    let size = align_up(len, Size4KiB::SIZE);

    let process = Process::current();
    let mut guard = process.lock();
    let regions = guard.address_space().regions_mut();

    let Some(start) = regions.find_unmapped(VirtualAddress::new(MMAP_BASE), size as usize, VirtualAddress::new(USER_LIMIT)) else {
        return NOMEM;
    };

    let mut region_flags = RegionFlags::READ;
    if flags & MAP_WRITE != 0 {
        region_flags |= RegionFlags::WRITE;
    }

    let region = Region::new(
        page_range(start.as_u64(), start.as_u64() + size),
        region_flags,
        Backing::Anonymous,
    );
    match regions.insert(region) {
        Ok(()) => start.as_u64() as i64,
        Err(_) => INVAL,
    }
}

/// Unmaps every page of `region` from `process` and returns its frames to wherever
/// they're actually owned: straight back to the frame allocator for `Backing::Anonymous`,
/// or to the `SharedMemoryObject` for `Backing::Shared` - which only actually frees
/// anything once `drop_ref` reports this was the last reference (§4.5). Shared between
/// `sys_munmap` and `sys_exec`, which both tear down regions wholesale.
fn teardown_region(process: &Arc<Mutex<Process>>, region: Region) {
    let backing = region.backing().clone();
    let pages: Vec<Page<Size4KiB>> = region.page_range().iter().collect();

    let mut guard = process.lock();
    let space = guard.address_space();
    match backing {
        Backing::Anonymous => {
            for page in pages {
                if let Ok((frame, flusher)) = space.unmap(page) {
                    flusher.flush();
                    crate::memory::manager::MemoryManager::the().lock().free_frame(frame);
                }
            }
        }
        Backing::Shared { object, offset_pages } => {
            for (i, page) in pages.into_iter().enumerate() {
                if let Ok((_, flusher)) = space.unmap(page) {
                    flusher.flush();
                }
                object.unregister_mapping(offset_pages + i, process, page);
            }
            drop(guard);
            if object.drop_ref() {
                object.release_all_frames();
            }
        }
    }
}

/// `args[0]` is the address returned by a prior `mmap`/`shmem`; `args[1]` its length
/// (must match what was mapped - no partial unmap of a single region).
fn sys_munmap(addr: u64, len: u64) -> i64 {
    let process = Process::current();
    let mut guard = process.lock();
    let regions = guard.address_space().regions_mut();

    let Some(region) = regions.find(VirtualAddress::new(addr)) else {
        return INVAL;
    };
    if region.start().as_u64() != addr || (region.end().as_u64() - region.start().as_u64()) != align_up(len, Size4KiB::SIZE) {
        return INVAL;
    }
    let region = region.clone();
    regions.remove(VirtualAddress::new(addr));
    drop(guard);

    teardown_region(&process, region);
    0
}

/// Creates a fresh `SharedMemoryObject` and maps it straight into the caller - there is
/// no attach-by-handle wired to this syscall (a second process calling `shmem` always
/// gets its own object), a simplification recorded in DESIGN.md.
fn sys_shmem(len: u64) -> i64 {
    if len == 0 {
        return INVAL;
    }
    let size = PageAlignedSize::new(align_up(len, Size4KiB::SIZE) as usize);
    let mapped_len = size.in_bytes() as u64;
    let object = SharedMemoryObject::new(size);

    let process = Process::current();
    let mut guard = process.lock();
    let regions = guard.address_space().regions_mut();

    let Some(start) = regions.find_unmapped(VirtualAddress::new(MMAP_BASE), len as usize, VirtualAddress::new(USER_LIMIT)) else {
        return NOMEM;
    };

    let region = Region::new(
        page_range(start.as_u64(), start.as_u64() + mapped_len),
        RegionFlags::READ | RegionFlags::WRITE,
        Backing::Shared { object, offset_pages: 0 },
    );
    match regions.insert(region) {
        Ok(()) => start.as_u64() as i64,
        Err(_) => INVAL,
    }
}

// --- semaphores ---------------------------------------------------------------------

const MAX_SEMAPHORES: usize = 64;

static SEMAPHORES: Mutex<[Option<Arc<Semaphore>>; MAX_SEMAPHORES]> = Mutex::new([const { None }; MAX_SEMAPHORES]);

fn sys_sem_init(initial: i64) -> i64 {
    let mut table = SEMAPHORES.lock();
    let Some(slot) = table.iter_mut().position(|s| s.is_none()) else {
        return NOMEM;
    };
    table[slot] = Some(Arc::new(Semaphore::new(initial)));
    slot as i64
}

fn sys_sem_post(id: u64) -> i64 {
    with_semaphore(id, |sem| {
        sem.up();
        0
    })
}

fn sys_sem_wait(id: u64) -> i64 {
    with_semaphore(id, |sem| match sem.down() {
        WaitStatus::Woken => 0,
        WaitStatus::Interrupted => KILLED,
    })
}

fn sys_sem_free(id: u64) -> i64 {
    let Some(idx) = valid_sem_index(id) else {
        return INVAL;
    };
    let mut table = SEMAPHORES.lock();
    if table[idx].take().is_none() {
        return INVAL;
    }
    0
}

fn sys_sem_get_value(id: u64) -> i64 {
    with_semaphore(id, |sem| sem.value())
}

fn valid_sem_index(id: u64) -> Option<usize> {
    usize::try_from(id).ok().filter(|&i| i < MAX_SEMAPHORES)
}

fn with_semaphore(id: u64, f: impl FnOnce(&Semaphore) -> i64) -> i64 {
    let Some(idx) = valid_sem_index(id) else {
        return INVAL;
    };
    let sem = SEMAPHORES.lock()[idx].clone();
    match sem {
        Some(sem) => f(&sem),
        None => INVAL,
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn unknown_syscall_number_is_rejected() {
        assert_eq!(Syscall::from_raw(0), None);
        assert_eq!(Syscall::from_raw(9999), None);
        assert!(Syscall::from_raw(1).is_some());
    }

    #[test]
    fn error_namespace_values_are_small_negative_integers() {
        for code in [INVAL, NOMEM, NO_FREE_PROC, BAD_PROC, KILLED, SWAP_FAULT, INVAL_ELF] {
            assert!(code < 0);
            assert!(code > -16);
        }
    }

    #[test]
    fn align_up_rounds_to_page_boundary() {
        assert_eq!(align_up(1, Size4KiB::SIZE), Size4KiB::SIZE);
        assert_eq!(align_up(Size4KiB::SIZE, Size4KiB::SIZE), Size4KiB::SIZE);
        assert_eq!(align_up(Size4KiB::SIZE + 1, Size4KiB::SIZE), Size4KiB::SIZE * 2);
    }
}
