use crate::memory::MemoryError;
use core::fmt;

#[derive(Debug)]
pub enum KernelError {
    MemoryError(MemoryError),
    TaskError(TaskError),
    SwapError(SwapError),
    SyncError(SyncError),
    DebugError(DebugError),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::MemoryError(e) => write!(f, "memory error: {:?}", e),
            KernelError::TaskError(e) => write!(f, "task error: {:?}", e),
            KernelError::SwapError(e) => write!(f, "swap error: {:?}", e),
            KernelError::SyncError(e) => write!(f, "sync error: {:?}", e),
            KernelError::DebugError(e) => write!(f, "debug stub error: {:?}", e),
        }
    }
}

impl core::error::Error for KernelError {}

impl From<MemoryError> for KernelError {
    fn from(error: MemoryError) -> Self {
        KernelError::MemoryError(error)
    }
}

impl From<TaskError> for KernelError {
    fn from(error: TaskError) -> Self {
        KernelError::TaskError(error)
    }
}

impl From<SwapError> for KernelError {
    fn from(error: SwapError) -> Self {
        KernelError::SwapError(error)
    }
}

impl From<SyncError> for KernelError {
    fn from(error: SyncError) -> Self {
        KernelError::SyncError(error)
    }
}

impl From<DebugError> for KernelError {
    fn from(error: DebugError) -> Self {
        KernelError::DebugError(error)
    }
}

/// Process/thread subsystem errors (`multitasking::process`, `multitasking::thread`,
/// `multitasking::scheduler`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskError {
    /// The pid space (bounded by `MAX_PID`) is fully occupied by live processes.
    OutOfProcessIds,
    /// `wait`/`try_wait` target pid isn't a child of the calling process.
    NoSuchChild,
    /// `kill` target pid doesn't name a live process.
    NoSuchProcess,
    /// A blocking wait was woken by `kill` rather than by the condition it waited on.
    Interrupted,
}

/// Swap subsystem errors (`swap`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SwapError {
    /// The swap slot arena is fully allocated; nothing left to evict into.
    DeviceFull,
    /// A PTE claimed to carry a swap entry but its slot isn't in use.
    BadSwapEntry,
    /// Backing-store I/O (the in-memory buffer standing in for a block device) failed.
    IoError,
}

/// Synchronization primitive errors (`sync`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyncError {
    /// A semaphore/monitor wait was interrupted by `kill` rather than a normal wakeup.
    Interrupted,
    /// A monitor condition was signalled with no waiter (non-fatal, reported for callers
    /// that want to tell signal-to-nobody apart from signal-to-someone).
    NoWaiters,
}

/// Remote-debug protocol stub errors (`debug`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DebugError {
    /// Checksum over a received packet didn't match the trailing two hex digits.
    BadChecksum,
    /// A packet exceeded the framer's buffer before an end-of-packet `#` arrived.
    PacketTooLarge,
    /// A command referenced a register/thread/memory range this stub doesn't support.
    Unsupported,
    MalformedPacket,
}
