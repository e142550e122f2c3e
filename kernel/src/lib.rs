//! Helion-OS kernel core (Mantle)
//!
//! The object-and-handle subsystem that mediates every user-visible kernel
//! resource:
//! - Dispatchers (processes, threads, VM objects, pipes, sockets, events,
//!   I/O ports, wait sets, logs, interrupts, resources)
//! - Per-process handle tables with randomized, rights-carrying values
//! - The signal/wait layer (state trackers, wait events, wait sets)
//! - Per-process futexes
//!
//! Boot, trap glue, drivers and the scheduler proper are external
//! collaborators: they link against this crate, install the scheduler hooks
//! (see [`sched`]) and consume the object/handle/signal API. There is no
//! binary target here.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cprng;
pub mod ipc;
pub mod logger;
pub mod memory;
pub mod object;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;

#[cfg(test)]
pub(crate) mod testutil;

use helion_syscall::Status;

/// One-time kernel-core initialization.
///
/// Must run after the scheduler hooks are installed (the CPRNG seeds itself
/// from the host clock) and before the first object is created.
pub fn init(seed: &[u8]) -> Result<(), Status> {
    cprng::init(seed);
    object::init();
    log::info!("helion core initialized");
    Ok(())
}
