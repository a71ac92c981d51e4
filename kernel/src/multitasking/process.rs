use super::{
    scheduler::Scheduler,
    thread::{Thread, ThreadEntryFunc, ThreadPriority, ThreadRunState, WaitCause},
};
use crate::{
    error::{KernelError, TaskError},
    memory::{
        address_space::AddressSpace,
        manager::{AllocationStrategy, MemoryManager},
        region::{AccessFlags, RegionType, VirtualMemoryRegion},
        shared_memory::SharedMemoryObject,
        virtual_memory_object::MemoryBackedVirtualMemoryObject,
        vma::Backing,
    },
    serial_println, GlobalData,
};
use alloc::{
    boxed::Box,
    collections::{BTreeMap, VecDeque},
    format,
    string::String,
    sync::Arc,
    vec::Vec,
};
use api::BootInfo;
use core::sync::atomic::{AtomicU64, Ordering::Relaxed};
use util::{
    hashmap::HashMap,
    mutex::{Mutex, MutexGuard},
};
use x86_64::{
    memory::{Page, PageAlignedSize, Size4KiB, KIB},
    paging::{PageTableEntryFlags, Translator},
    register::Cr3,
};

/// Highest pid handed out before the allocator wraps back to the start of the range
/// and scans forward for the next free slot, rather than growing `ProcessId` without
/// bound for the lifetime of the system.
const MAX_PID: u64 = 1 << 22;

/// The "colonel"/init process's pid. Orphaned children are re-parented here on exit
/// (§4.5) so `wait` always has somewhere to reap a zombie from eventually.
static INIT_PID: Mutex<Option<ProcessId>> = Mutex::new(None);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessState {
    Runnable,
    /// Exited but not yet reaped by a `wait` call; `exit_code` is valid.
    Zombie,
}
/**
 *  https://www.youtube.com/watch?v=3xgOybGlYes&t=1090s
 *
 * The complete memory management is handled by the MemoryManager. It allocates
 * frames, handles page faults etc
 *
 * The kernel is one process. Therefore, an execution unit in the kernel space will always
 * be a kernel thread not a process.
 *
 * Each process has an associated address space. The address space manages the
 * page table and virtual memory allocations. The allocated virtual memory is
 * stored inside VirtualMemoryRegions.
 *
 * Each VirtualMemoryRegion is backed by a VirtualMemoryObject. This object
 * is either RAM backed or file backed.
 *
 * The VirtualMemoryObject is responsible for allocating physical memory for itself
 *
 *
 * AnonymousVMObject::try_create_with_size = lazy, allocate frame when pagefault
 * AnonymousVMObject::try_create_with_physical_pages => create pages
 *
 *
 *
 * The address space contains virtual
 * memory regions.
 *
 *
 *
 * userspace directory has copy of complete kernel space directory
 * kernel mapped into every process
 *
 *
 * Each process has a virtual memory manager
 * Each thread has a kernel and user stack.
 *  + User stack initialization should be done by whatever loads the executable
 *
 *
 *
 * Initial "colonel" process which runs the idle loop
 *  - only ever runs when there is nothing to do
 *  - has pid 0
 *
 * - finializer kernel process: tears down dead processes in zombie state
 *
 * all process list which is basically a linked_list of processes
 *
 * enable interrupts once multitasking is ready
 *
 *  Every Process has an AddressSpace.
    - An AddressSpace has a number of Region objects, each with a virtual base address, size, permission bits, etc.
    - Every Region has an underlying VMObject.

- VMObject is virtual and can be AnonymousVMObject (MAP_ANONYMOUS) or InodeVMObject (MAP_FILE).

- Cross-process memory sharing occurs when two or more Regions in separate AddressSpaces use the same underlying VMObject.

- MemoryManager handles physical page allocation, fault handling, page tables, etc.
 *
 */

static PROCESS_TREE: Mutex<ProcessTree> = Mutex::new(ProcessTree::new());

/// Threads parked in the blocking `wait(pid)` syscall (§4.6), across every process.
/// Woken in a broadcast on every exit rather than kept per-parent, since a teaching
/// kernel's process counts don't make the thundering-herd recheck worth a second
/// bookkeeping structure; each waiter just rechecks its own specific child.
static CHILD_EXIT_QUEUE: Mutex<VecDeque<Thread>> = Mutex::new(VecDeque::new());

fn wake_child_waiters() {
    let waiters: Vec<Thread> = CHILD_EXIT_QUEUE.lock().drain(..).collect();
    for thread in waiters {
        unsafe { Scheduler::the().wake(thread) };
    }
}

const DEFAULT_STACK_SIZE: PageAlignedSize = PageAlignedSize::new(32 * KIB as usize);

struct ProcessTree {
    inner: BTreeMap<ProcessId, Arc<Mutex<Process>>>,
}

impl ProcessTree {
    pub const fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    pub fn add_process(&mut self, id: ProcessId, process: Arc<Mutex<Process>>) {
        self.inner.insert(id, process);
    }

    pub fn lock() -> MutexGuard<'static, Self> {
        PROCESS_TREE.lock()
    }
}

#[derive(Clone, Copy, PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct ProcessId(u64);

impl ProcessId {
    /// Rolling-cursor allocation: a real system runs long enough to wrap a naive
    /// monotonic counter (and a fixed-size pid bitmap is all §4.5 calls for), so the
    /// cursor scans forward from where it left off and reuses the first pid not
    /// currently held by a live (`Runnable` or `Zombie`, i.e. not yet reaped) process.
    pub fn new() -> Result<Self, TaskError> {
        static CURSOR: AtomicU64 = AtomicU64::new(1);
        let tree = ProcessTree::lock();
        for _ in 0..MAX_PID {
            let candidate = CURSOR.fetch_add(1, Relaxed) % MAX_PID;
            if candidate == 0 {
                continue;
            }
            let id = Self(candidate);
            if !tree.inner.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(TaskError::OutOfProcessIds)
    }

    fn boot() -> Self {
        Self(0)
    }

    /// Raw pid value, for syscall return/argument marshalling (§6) - the numeric
    /// identifier a userland `getpid`/`wait`/`kill` caller actually sees.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Inverse of `as_u64`. Whether `raw` actually names a live process is decided
    /// later, by the process tree lookup inside `kill`/`wait` - any `u64` is a
    /// structurally valid `ProcessId`.
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    #[cfg(test)]
    pub(crate) fn from_raw(n: u64) -> Self {
        Self(n)
    }
}

pub type ThreadId = usize;

pub struct Process {
    id: ProcessId,
    parent: Option<ProcessId>,
    children: Vec<ProcessId>,
    name: String,
    address_space: AddressSpace,
    memory_regions: HashMap<ThreadId, Vec<VirtualMemoryRegion>>,
    cur_thread_id: ThreadId,
    threads: Vec<ThreadId>,
    state: ProcessState,
    exit_code: i32,
}

impl Process {
    fn new_with_id<N>(id: ProcessId, parent: Option<ProcessId>, name: N, cr3: u64) -> Self
    where
        N: Into<String>,
    {
        Self {
            id,
            parent,
            children: Vec::new(),
            name: name.into(),
            address_space: AddressSpace::new(cr3, GlobalData::the().physical_memory_offset()),
            memory_regions: HashMap::new(),
            cur_thread_id: 0,
            threads: Vec::new(),
            state: ProcessState::Runnable,
            exit_code: 0,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.parent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn current() -> Arc<Mutex<Process>> {
        unsafe { Scheduler::the().current_thread().process.clone() }
    }

    pub fn address_space(&mut self) -> &mut AddressSpace {
        &mut self.address_space
    }

    pub fn cr3(&self) -> u64 {
        self.address_space.cr3()
    }

    pub fn next_thread_id(&mut self) -> ThreadId {
        let ret = self.cur_thread_id;
        self.cur_thread_id += 1;
        self.threads.push(ret);
        ret
    }

    /// Marks the process a zombie: its own resources stay around until `wait` reaps
    /// it (its exit code has to survive that long), but it's re-parented off its own
    /// children onto init immediately, per §4.5.
    pub fn exit(this: &Arc<Mutex<Process>>, exit_code: i32) {
        let mut guard = this.lock();
        guard.state = ProcessState::Zombie;
        guard.exit_code = exit_code;
        let children = core::mem::take(&mut guard.children);
        let id = guard.id;
        let parent = guard.parent;
        drop(guard);

        if let Some(init_pid) = *INIT_PID.lock() {
            let tree = ProcessTree::lock();
            for child in children {
                if let Some(child_proc) = tree.inner.get(&child) {
                    child_proc.lock().parent = Some(init_pid);
                }
                if let Some(init_proc) = tree.inner.get(&init_pid) {
                    init_proc.lock().children.push(child);
                }
            }
        }

        if let Some(parent_id) = parent {
            serial_println!("Process {:?} exited (code={}), parent {:?} notified", id, exit_code, parent_id);
        }

        wake_child_waiters();
    }

    /// Reaps `child` (by pid) from the calling process's own children, if it has
    /// exited. Returns `Ok(None)` rather than blocking when no such zombie exists yet
    /// - callers park on the process's own child-exit wait channel themselves (§4.5).
    pub fn try_wait(parent: &Arc<Mutex<Process>>, child: ProcessId) -> Result<Option<i32>, TaskError> {
        let mut parent_guard = parent.lock();
        if !parent_guard.children.contains(&child) {
            return Err(TaskError::NoSuchChild);
        }

        let tree = ProcessTree::lock();
        let child_proc = tree.inner.get(&child).ok_or(TaskError::NoSuchChild)?.clone();
        drop(tree);

        let code = {
            let guard = child_proc.lock();
            if guard.state == ProcessState::Zombie {
                Some(guard.exit_code)
            } else {
                None
            }
        };

        if code.is_some() {
            parent_guard
                .children
                .retain(|c| *c != child);
            ProcessTree::lock().inner.remove(&child);
        }

        Ok(code)
    }

    /// Blocking form of `try_wait`: parks the calling thread on `CHILD_EXIT_QUEUE`
    /// until `child` becomes a zombie, reaping it once it does. A suspension point
    /// per §5; returns `Interrupted` rather than the exit code if `kill` tore the
    /// calling process down first.
    pub fn wait(parent: &Arc<Mutex<Process>>, child: ProcessId) -> Result<i32, TaskError> {
        loop {
            if let Some(code) = Process::try_wait(parent, child)? {
                return Ok(code);
            }

            unsafe {
                Scheduler::the()
                    .block_current_on(ThreadRunState::Sleeping(WaitCause::ChildExit), &CHILD_EXIT_QUEUE);
            }

            if unsafe { Scheduler::the().current_thread().is_exiting() } {
                return Err(TaskError::Interrupted);
            }
        }
    }
}

pub fn init(boot_info: &'static BootInfo) -> Result<(), KernelError> {
    let process = Arc::new(Mutex::new(Process::new_with_id(
        ProcessId::boot(),
        None,
        "colonel",
        Cr3::read_raw(),
    )));

    *INIT_PID.lock() = Some(process.lock().id());

    PROCESS_TREE
        .lock()
        .add_process(process.lock().id(), process.clone());

    let mut memory_manager = MemoryManager::the().lock();

    let mut kernel_stack_boot_frames = Vec::new();
    let page_table = memory_manager.kernel_page_table();
    // skip guard page
    for page in boot_info.kernel_stack.iter().skip(1) {
        let (frame, _) = page_table.translate(page)?;
        kernel_stack_boot_frames.push(frame);
    }

    let obj = MemoryBackedVirtualMemoryObject::new(kernel_stack_boot_frames);

    let stack_name = "colonel_stack";

    memory_manager.region_tree().try_allocate_range_in_region(
        stack_name,
        RegionType::Stack,
        boot_info.kernel_stack.clone(),
    )?;

    let stack = VirtualMemoryRegion::new(
        boot_info.kernel_stack.clone(),
        stack_name,
        Box::new(obj),
        RegionType::Stack,
        AccessFlags::ReadWrite,
    );

    let next_id = process.lock().next_thread_id();

    let thread = Thread::colonel_thread(next_id, "colonel_thread", process, stack);

    Scheduler::init(thread);

    Ok(())
}

fn try_create_stack_thread(
    process: Arc<Mutex<Process>>,
    name: String,
    allocation_strategy: AllocationStrategy,
) -> Result<VirtualMemoryRegion, KernelError> {
    MemoryManager::the().lock().allocate_region_with_size(
        process,
        DEFAULT_STACK_SIZE,
        name,
        RegionType::Stack,
        AccessFlags::ReadWrite,
        allocation_strategy,
    )
}

/// Duplicates `parent`'s address space (COW, via `AddressSpace::dup`) into a brand
/// new process and starts it running `entry` on a fresh kernel thread.
///
/// This kernel has no ELF loader or syscall trap-frame plumbing (every execution unit
/// is a kernel thread, per the design note at the top of this file), so unlike a real
/// `fork` the child does not resume at the parent's exact instruction/stack pointer -
/// it starts at `entry` the same way `spawn_kernel_thread` does. What *is* real is the
/// address-space duplication: the child's mmap'd/heap regions are COW-shared with the
/// parent's until either side writes to them; `Backing::Shared` regions instead stay
/// write-through shared for as long as both sides keep the mapping (§4.2, §4.9).
pub fn fork(parent: &Arc<Mutex<Process>>, entry: ThreadEntryFunc) -> Result<ProcessId, KernelError> {
    let id = ProcessId::new()?;
    let (parent_id, name) = {
        let guard = parent.lock();
        (guard.id, guard.name.clone())
    };

    let (new_cr3, regions) = parent.lock().address_space.dup()?;

    let child_name = format!("{}_child", name);
    let child = Arc::new(Mutex::new(Process::new_with_id(
        id,
        Some(parent_id),
        child_name.clone(),
        new_cr3,
    )));
    child.lock().address_space().set_regions(regions);

    // `AddressSpace::dup` bumped each `Backing::Shared` object's refcount and mapped
    // its already-resident pages into the child, but it has no handle to `child` to
    // register those mappings with the object itself - do that here so a later
    // `evict` of the object also invalidates the child's PTEs (§4.5).
    let shared_mappings: Vec<(Arc<SharedMemoryObject>, usize, Page<Size4KiB>)> = {
        let mut guard = child.lock();
        let space = guard.address_space();
        let mut mappings = Vec::new();
        for region in space.regions().iter() {
            let Backing::Shared { object, offset_pages } = region.backing() else {
                continue;
            };
            for (i, page) in region.page_range().iter().enumerate() {
                if space.translate(page).is_ok() {
                    mappings.push((object.clone(), *offset_pages + i, page));
                }
            }
        }
        mappings
    };
    for (object, index, page) in shared_mappings {
        object.register_mapping(index, &child, page);
    }

    parent.lock().children.push(id);
    ProcessTree::lock().add_process(id, child.clone());

    let stack = try_create_stack_thread(
        child.clone(),
        format!("{}_stack", child_name),
        AllocationStrategy::Now,
    )?;
    let tid = child.lock().next_thread_id();
    let mut thread = Thread::new(tid, "main", child, stack, ThreadPriority::Normal, entry);
    unsafe { thread.setup_stack() };
    unsafe { Scheduler::the().add_thread(thread) };

    Ok(id)
}

/// Sets `EXITING` on every thread belonging to `target` and wakes any of them parked
/// on an interruptible wait (the timer wheel, or a child-exit wait channel); see
/// `error::TaskError` and §5 for the weaker guarantee given for semaphore/monitor waits.
pub fn kill(target: ProcessId) -> Result<(), TaskError> {
    let tree = ProcessTree::lock();
    let process = tree.inner.get(&target).ok_or(TaskError::NoSuchProcess)?.clone();
    drop(tree);

    Process::exit(&process, -1);
    crate::multitasking::timer::cancel_for_process(target);
    Ok(())
}

pub fn spawn_kernel_thread<N>(
    name: N,
    func: ThreadEntryFunc,
    priority: ThreadPriority,
    allocation_strategy: AllocationStrategy,
) -> Result<ThreadId, KernelError>
where
    N: Into<String>,
{
    let name = name.into();
    let cur_process = Process::current();
    let thread_stack = try_create_stack_thread(
        cur_process.clone(),
        format!("{}_stack", &name),
        allocation_strategy,
    )?;
    let tid = cur_process.lock().next_thread_id();
    let mut thread = Thread::new(tid, name, cur_process, thread_stack, priority, func);

    if allocation_strategy == AllocationStrategy::Now {
        unsafe { thread.setup_stack() };
    }

    unsafe { Scheduler::the().add_thread(thread) };

    Ok(tid)
}
