#![no_std]
#![no_main]
use api::BootInfo;
use core::{
    panic::PanicInfo,
    sync::atomic::{AtomicI64, AtomicUsize, Ordering},
};
use kernel::{
    housekeeping_threads, kernel_init,
    memory::manager::AllocationStrategy,
    multitasking::{
        process::{self, Process},
        thread::{leave_thread, ThreadPriority},
    },
    qemu, serial_println,
    swap,
    syscall::{self, Syscall},
    time::Time,
};
use x86_64::memory::VirtualAddress;

#[panic_handler]
pub fn panic(info: &PanicInfo) -> ! {
    serial_println!("test kernel panicked: {}", info);
    loop {}
}

#[no_mangle]
#[link_section = ".start"]
pub extern "C" fn _start(info: &'static BootInfo) -> ! {
    start(info);
}

fn dispatch(call: Syscall, args: [u64; 5]) -> i64 {
    syscall::dispatch(call as u64, args)
}

/// Maps a page through `sys_mmap`, touches it to force the fault-in path, then forks.
/// The child re-reads the value it should have inherited via COW, stamps its own value
/// over it, and exits; the parent asserts its own copy of the page is untouched after
/// the child is reaped - the COW isolation property.
static CHILD_OBSERVED: AtomicI64 = AtomicI64::new(-1);
static SHARED_ADDR: AtomicI64 = AtomicI64::new(0);

extern "C" fn cow_child_entry() {
    let addr = SHARED_ADDR.load(Ordering::Acquire) as u64;
    let ptr = addr as *mut u64;
    let seen = unsafe { *ptr };
    CHILD_OBSERVED.store(seen as i64, Ordering::Release);
    unsafe { *ptr = 0xDEAD_BEEF };

    let me = Process::current();
    Process::exit(&me, 7);
    leave_thread();
}

fn test_fork_wait_and_cow() {
    let addr = dispatch(Syscall::Mmap, [4096, 0x100, 0, 0, 0]);
    assert!(addr > 0, "mmap failed: {addr}");
    let ptr = addr as u64 as *mut u64;
    unsafe { *ptr = 0x1234_5678 };
    SHARED_ADDR.store(addr, Ordering::Release);

    let parent = Process::current();
    let child = process::fork(&parent, cow_child_entry).expect("fork failed");

    let code = Process::wait(&parent, child).expect("wait failed");
    assert_eq!(code, 7, "child exit code mismatch");
    assert_eq!(
        CHILD_OBSERVED.load(Ordering::Acquire),
        0x1234_5678,
        "child did not observe the parent's COW-shared value"
    );
    assert_eq!(
        unsafe { *ptr },
        0x1234_5678,
        "parent's page was mutated by the child's write - COW isolation broken"
    );

    let freed = dispatch(Syscall::Munmap, [addr as u64, 4096, 0, 0, 0]);
    assert_eq!(freed, 0, "munmap failed: {freed}");

    serial_println!("fork/wait/COW: ok");
}

/// Forces a committed anonymous page out to the swap arena via `swap_out_vma`, then
/// touches it again so the page-fault handler has to swap it back in, checking the
/// content survives the round trip.
fn test_swap_round_trip() {
    let addr = dispatch(Syscall::Mmap, [4096, 0x100, 0, 0, 0]);
    assert!(addr > 0, "mmap failed: {addr}");
    let ptr = addr as u64 as *mut u64;
    unsafe { *ptr = 0xCAFEF00D };

    let process = Process::current();
    let region = {
        let mut guard = process.lock();
        guard
            .address_space()
            .regions()
            .find(VirtualAddress::new(addr as u64))
            .cloned()
            .expect("no region backing the mmap'd address")
    };

    let evicted = swap::swap_out_vma(&process, &region).expect("swap_out_vma failed");
    assert_eq!(evicted, 1, "expected exactly one resident page to be evicted");

    assert_eq!(
        unsafe { *ptr },
        0xCAFEF00D,
        "value did not survive the swap-out/swap-in round trip"
    );

    let freed = dispatch(Syscall::Munmap, [addr as u64, 4096, 0, 0, 0]);
    assert_eq!(freed, 0, "munmap failed: {freed}");

    serial_println!("swap round trip: ok");
}

/// Creates an 8 KiB shared object, commits both its pages in the parent, forks (which
/// write-through-shares the already-resident frames into the child instead of COW-ing
/// them), and checks the child's write is visible back in the parent - then evicts the
/// whole region via `swap_out_vma` and re-reads it to check the swap-in path restores
/// the same content. Exercises §4.5/§8 scenario 4 end to end.
static SHMEM_ADDR: AtomicI64 = AtomicI64::new(0);
static SHMEM_CHILD_OBSERVED: [AtomicI64; 2] = [AtomicI64::new(-1), AtomicI64::new(-1)];

extern "C" fn shmem_child_entry() {
    let addr = SHMEM_ADDR.load(Ordering::Acquire) as u64;
    let page0 = addr as *mut u64;
    let page1 = (addr + 4096) as *mut u64;

    SHMEM_CHILD_OBSERVED[0].store(unsafe { *page0 } as i64, Ordering::Release);
    SHMEM_CHILD_OBSERVED[1].store(unsafe { *page1 } as i64, Ordering::Release);

    unsafe { *page0 = 0xC0FFEE };

    let me = Process::current();
    Process::exit(&me, 0);
    leave_thread();
}

fn test_shared_memory_write_through_and_swap() {
    let addr = dispatch(Syscall::Shmem, [8192, 0, 0, 0, 0]);
    assert!(addr > 0, "shmem failed: {addr}");
    let page0 = addr as u64 as *mut u64;
    let page1 = (addr as u64 + 4096) as *mut u64;

    unsafe { *page0 = 0x1111_1111 };
    unsafe { *page1 = 0x2222_2222 };
    SHMEM_ADDR.store(addr, Ordering::Release);

    let parent = Process::current();
    let child = process::fork(&parent, shmem_child_entry).expect("fork failed");
    let code = Process::wait(&parent, child).expect("wait failed");
    assert_eq!(code, 0, "shmem child exit code mismatch");

    assert_eq!(
        SHMEM_CHILD_OBSERVED[0].load(Ordering::Acquire),
        0x1111_1111,
        "child did not inherit the parent's shared first page"
    );
    assert_eq!(
        SHMEM_CHILD_OBSERVED[1].load(Ordering::Acquire),
        0x2222_2222,
        "child did not inherit the parent's shared second page"
    );
    assert_eq!(
        unsafe { *page0 },
        0xC0FFEE,
        "parent did not observe the child's write - shared regions must be write-through, not COW"
    );

    let process = Process::current();
    let region = {
        let mut guard = process.lock();
        guard
            .address_space()
            .regions()
            .find(VirtualAddress::new(addr as u64))
            .cloned()
            .expect("no region backing the shmem mapping")
    };
    let evicted = swap::swap_out_vma(&process, &region).expect("swap_out_vma failed");
    assert_eq!(evicted, 2, "expected both shared pages to be evicted");

    assert_eq!(
        unsafe { *page0 },
        0xC0FFEE,
        "first page did not survive the shared swap-out/swap-in round trip"
    );
    assert_eq!(
        unsafe { *page1 },
        0x2222_2222,
        "second page did not survive the shared swap-out/swap-in round trip"
    );

    let freed = dispatch(Syscall::Munmap, [addr as u64, 8192, 0, 0, 0]);
    assert_eq!(freed, 0, "munmap failed: {freed}");

    serial_println!("shared memory write-through/swap: ok");
}

/// Producer/consumer over a syscall-table semaphore, run on two real kernel threads:
/// exercises the blocking `sem_wait` suspension point and its wakeup path end to end.
const ITEMS: usize = 8;
static SEM_ID: AtomicI64 = AtomicI64::new(-1);
static PRODUCED: AtomicUsize = AtomicUsize::new(0);
static CONSUMED: AtomicUsize = AtomicUsize::new(0);

extern "C" fn producer_entry() {
    let id = SEM_ID.load(Ordering::Acquire) as u64;
    for _ in 0..ITEMS {
        PRODUCED.fetch_add(1, Ordering::AcqRel);
        let rc = dispatch(Syscall::SemPost, [id, 0, 0, 0, 0]);
        assert_eq!(rc, 0, "sem_post failed: {rc}");
    }
    leave_thread();
}

extern "C" fn consumer_entry() {
    let id = SEM_ID.load(Ordering::Acquire) as u64;
    for _ in 0..ITEMS {
        let rc = dispatch(Syscall::SemWait, [id, 0, 0, 0, 0]);
        assert_eq!(rc, 0, "sem_wait failed: {rc}");
        CONSUMED.fetch_add(1, Ordering::AcqRel);
    }
    leave_thread();
}

fn test_semaphore_producer_consumer() {
    let id = dispatch(Syscall::SemInit, [0, 0, 0, 0, 0]);
    assert!(id >= 0, "sem_init failed: {id}");
    SEM_ID.store(id, Ordering::Release);

    process::spawn_kernel_thread(
        "sem-consumer",
        consumer_entry,
        ThreadPriority::Normal,
        AllocationStrategy::Now,
    )
    .expect("failed to spawn consumer thread");
    process::spawn_kernel_thread(
        "sem-producer",
        producer_entry,
        ThreadPriority::Normal,
        AllocationStrategy::Now,
    )
    .expect("failed to spawn producer thread");

    let start = Time::now();
    while CONSUMED.load(Ordering::Acquire) < ITEMS {
        assert!(Time::elapsed_s(start) < 5, "producer/consumer pair did not finish in time");
    }
    assert_eq!(PRODUCED.load(Ordering::Acquire), ITEMS);

    let freed = dispatch(Syscall::SemFree, [id as u64, 0, 0, 0, 0]);
    assert_eq!(freed, 0, "sem_free failed: {freed}");

    serial_println!("semaphore producer/consumer: ok");
}

fn start(info: &'static BootInfo) -> ! {
    serial_println!("Test kernel enter");

    kernel_init(info).expect("Kernel initialization failed");
    process::init(info).expect("Initializing processes failed");
    housekeeping_threads::spawn_finalizer_thread().expect("Failed to spawn finalizer thread");

    test_fork_wait_and_cow();
    test_swap_round_trip();
    test_shared_memory_write_through_and_swap();
    test_semaphore_producer_consumer();

    qemu::exit(qemu::QemuExitCode::Success);
}
