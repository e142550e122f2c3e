//! VM object dispatcher.

use alloc::sync::Arc;

use helion_syscall::data::VmFlags;
use helion_syscall::{Rights, Status};

use crate::memory::{AddressSpace, VmObject};
use crate::object::{Dispatcher, DispatcherKind};

const DEFAULT_VMO_RIGHTS: Rights = Rights::basic()
    .union(Rights::EXECUTE)
    .union(Rights::MAP)
    .union(Rights::GET_PROPERTY)
    .union(Rights::SET_PROPERTY);

// vmo_op_range opcodes. Commit/decommit are accepted and currently
// satisfied trivially; the backing store materializes pages on demand.
pub const VMO_OP_COMMIT: u32 = 1;
pub const VMO_OP_DECOMMIT: u32 = 2;
pub const VMO_OP_ZERO: u32 = 3;

pub struct VmObjectDispatcher {
    vmo: Arc<VmObject>,
}

impl VmObjectDispatcher {
    pub fn create(size: u64) -> Result<(Arc<Dispatcher>, Rights), Status> {
        let vmo = VmObject::create(size)?;
        Ok((
            Dispatcher::new(DispatcherKind::VmObject(VmObjectDispatcher { vmo })),
            DEFAULT_VMO_RIGHTS,
        ))
    }

    pub fn vmo(&self) -> &Arc<VmObject> {
        &self.vmo
    }

    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, Status> {
        self.vmo.read(buf, offset)
    }

    pub fn write(&self, buf: &[u8], offset: u64) -> Result<usize, Status> {
        self.vmo.write(buf, offset)
    }

    pub fn get_size(&self) -> u64 {
        self.vmo.size()
    }

    pub fn set_size(&self, size: u64) -> Result<(), Status> {
        self.vmo.set_size(size)
    }

    pub fn op_range(&self, op: u32, offset: u64, len: u64) -> Result<(), Status> {
        let end = offset.checked_add(len).ok_or(Status::OutOfRange)?;
        if end > self.vmo.size() {
            return Err(Status::OutOfRange);
        }
        match op {
            VMO_OP_COMMIT | VMO_OP_DECOMMIT => Ok(()),
            VMO_OP_ZERO => self.vmo.zero_range(offset, len),
            _ => Err(Status::NotSupported),
        }
    }

    /// Map into `aspace`, checking the requested permissions against the
    /// handle's rights.
    pub fn map(
        &self,
        aspace: &Arc<AddressSpace>,
        handle_rights: Rights,
        offset: u64,
        len: u64,
        addr_hint: u64,
        flags: VmFlags,
    ) -> Result<u64, Status> {
        if !handle_rights.covers(Rights::MAP) {
            return Err(Status::AccessDenied);
        }
        let mut needed = Rights::empty();
        if flags.contains(VmFlags::PERM_READ) {
            needed |= Rights::READ;
        }
        if flags.contains(VmFlags::PERM_WRITE) {
            needed |= Rights::WRITE;
        }
        if flags.contains(VmFlags::PERM_EXECUTE) {
            needed |= Rights::EXECUTE;
        }
        if !handle_rights.covers(needed) {
            return Err(Status::AccessDenied);
        }
        aspace.map(self.vmo.clone(), offset, len, addr_hint, flags)
    }
}
