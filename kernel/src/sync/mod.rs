// Synchronization primitives

mod spinlock;
pub mod waitqueue;

pub use spinlock::{SpinLock, SpinLockGuard};
pub use waitqueue::WaitQueue;
