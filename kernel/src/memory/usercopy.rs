//! Validated user-pointer access.
//!
//! The kernel never touches a user address without first checking:
//!
//! 1. **Range**: the whole region lies in the user half
//! 2. **Overflow**: `base + len` does not wrap
//! 3. **Mapping**: every byte is mapped in the target address space with
//!    the requested permission
//!
//! After validation, a `UserSlice` provides copy operations that move data
//! between user memory and kernel buffers through the backing VM objects.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use helion_syscall::data::VmFlags;
use helion_syscall::Status;

use crate::memory::AddressSpace;

/// Maximum length of a single user slice (16 MiB). Keeps a hostile length
/// from walking an absurd number of regions or ballooning kernel buffers.
const MAX_USER_SLICE_LEN: usize = 16 * 1024 * 1024;

fn validate(
    aspace: &AddressSpace,
    ptr: u64,
    len: usize,
    required: VmFlags,
) -> Result<(), Status> {
    if len == 0 {
        return Ok(());
    }
    if ptr == 0 {
        return Err(Status::Fault);
    }
    if len > MAX_USER_SLICE_LEN {
        return Err(Status::InvalidArgs);
    }
    aspace.check_access(ptr, len as u64, required)
}

/// A validated read-only view of user memory.
pub struct UserSliceRead {
    aspace: Arc<AddressSpace>,
    ptr: u64,
    len: usize,
}

impl UserSliceRead {
    pub fn new(aspace: &Arc<AddressSpace>, ptr: u64, len: usize) -> Result<Self, Status> {
        validate(aspace, ptr, len, VmFlags::PERM_READ)?;
        Ok(UserSliceRead {
            aspace: aspace.clone(),
            ptr,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the validated region into a kernel-owned vector.
    pub fn read_to_vec(&self) -> Result<Vec<u8>, Status> {
        let mut buf = vec![0u8; self.len];
        if self.len > 0 {
            self.aspace.read_user(self.ptr, &mut buf)?;
        }
        Ok(buf)
    }

    /// Copy `min(len, dest.len())` bytes into `dest`; returns the count.
    pub fn copy_to(&self, dest: &mut [u8]) -> Result<usize, Status> {
        let n = self.len.min(dest.len());
        if n > 0 {
            self.aspace.read_user(self.ptr, &mut dest[..n])?;
        }
        Ok(n)
    }

    /// Read one little-endian u32 (futex words, counters).
    pub fn read_u32(&self) -> Result<u32, Status> {
        if self.len < 4 {
            return Err(Status::InvalidArgs);
        }
        let mut buf = [0u8; 4];
        self.aspace.read_user(self.ptr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

/// A validated writable view of user memory.
pub struct UserSliceWrite {
    aspace: Arc<AddressSpace>,
    ptr: u64,
    len: usize,
}

impl UserSliceWrite {
    pub fn new(aspace: &Arc<AddressSpace>, ptr: u64, len: usize) -> Result<Self, Status> {
        validate(aspace, ptr, len, VmFlags::PERM_WRITE)?;
        Ok(UserSliceWrite {
            aspace: aspace.clone(),
            ptr,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `min(src.len(), len)` bytes from `src`; returns the count.
    pub fn copy_from(&self, src: &[u8]) -> Result<usize, Status> {
        let n = self.len.min(src.len());
        if n > 0 {
            self.aspace.write_user(self.ptr, &src[..n])?;
        }
        Ok(n)
    }

    pub fn write_u32(&self, value: u32) -> Result<(), Status> {
        if self.len < 4 {
            return Err(Status::InvalidArgs);
        }
        self.aspace.write_user(self.ptr, &value.to_le_bytes())
    }
}
