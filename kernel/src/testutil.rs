//! Shared helpers for the in-crate test suite.

use alloc::sync::Arc;

use helion_syscall::data::VmFlags;

use crate::memory::{VmObject, PAGE_SIZE};
use crate::process::ProcessDispatcher;

/// Bring the core up once per test binary.
pub fn setup() {
    crate::sched::host::install();
    crate::cprng::init(b"helion-test-suite");
    crate::object::init();
}

/// A fresh process with nothing mapped.
pub fn new_process(name: &str) -> Arc<ProcessDispatcher> {
    new_process_full(name).1
}

/// A fresh process, returning its dispatcher as well (for tests that need
/// a handle to the process itself).
pub fn new_process_full(
    name: &str,
) -> (Arc<crate::object::Dispatcher>, Arc<ProcessDispatcher>) {
    setup();
    let (dispatcher, _rights) = ProcessDispatcher::create(name, 0).unwrap();
    let process = dispatcher.as_process().unwrap().clone();
    (dispatcher, process)
}

/// A fresh process with `pages` pages of RW scratch mapped; returns the
/// base address of the mapping.
pub fn new_process_with_mem(name: &str, pages: u64) -> (Arc<ProcessDispatcher>, u64) {
    let process = new_process(name);
    let vmo = VmObject::create(pages * PAGE_SIZE).unwrap();
    let base = process
        .aspace()
        .map(
            vmo,
            0,
            pages * PAGE_SIZE,
            0,
            VmFlags::PERM_READ | VmFlags::PERM_WRITE,
        )
        .unwrap();
    (process, base)
}

/// Read a little-endian u32 from a process's memory.
pub fn peek_u32(process: &Arc<ProcessDispatcher>, addr: u64) -> u32 {
    let mut buf = [0u8; 4];
    process.aspace().read_user(addr, &mut buf).unwrap();
    u32::from_le_bytes(buf)
}

/// Read a handle value (i32) from a process's memory.
pub fn peek_handle(process: &Arc<ProcessDispatcher>, addr: u64) -> i32 {
    peek_u32(process, addr) as i32
}

/// Write a little-endian u32 into a process's memory.
pub fn poke_u32(process: &Arc<ProcessDispatcher>, addr: u64, value: u32) {
    process.aspace().write_user(addr, &value.to_le_bytes()).unwrap();
}

/// Write bytes into a process's memory.
pub fn poke(process: &Arc<ProcessDispatcher>, addr: u64, bytes: &[u8]) {
    process.aspace().write_user(addr, bytes).unwrap();
}

/// Read bytes from a process's memory.
pub fn peek(process: &Arc<ProcessDispatcher>, addr: u64, len: usize) -> alloc::vec::Vec<u8> {
    let mut buf = alloc::vec![0u8; len];
    process.aspace().read_user(addr, &mut buf).unwrap();
    buf
}
