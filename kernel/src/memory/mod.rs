// User memory model: VM objects, per-process address spaces, validated
// user pointer access.

pub mod address_space;
pub mod usercopy;
pub mod vm_object;

pub use address_space::AddressSpace;
pub use usercopy::{UserSliceRead, UserSliceWrite};
pub use vm_object::VmObject;

/// Page granularity of the address space.
pub const PAGE_SIZE: u64 = 4096;

#[inline]
pub fn page_align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

#[inline]
pub fn page_align_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}
