//! VM object syscalls and process mapping operations.

use alloc::sync::Arc;

use helion_syscall::data::VmFlags;
use helion_syscall::{HandleValue, Rights, Status};

use crate::memory::{UserSliceRead, UserSliceWrite};
use crate::object::handle;
use crate::object::vmo::VmObjectDispatcher;
use crate::process::ProcessDispatcher;

pub fn sys_vmo_create(up: &Arc<ProcessDispatcher>, size: u64) -> Result<HandleValue, Status> {
    let (dispatcher, rights) = VmObjectDispatcher::create(size)?;
    let h = handle::make_handle(dispatcher, rights)?;
    Ok(up.add_handle(h))
}

pub fn sys_vmo_read(
    up: &Arc<ProcessDispatcher>,
    vmo: HandleValue,
    data_ptr: u64,
    offset: u64,
    len: usize,
) -> Result<usize, Status> {
    let dispatcher = up.get_dispatcher_with_rights(vmo, Rights::READ)?;
    let vmo = dispatcher.as_vmo()?;

    let out = UserSliceWrite::new(up.aspace(), data_ptr, len)?;
    let mut buf = alloc::vec![0u8; len];
    let n = vmo.read(&mut buf, offset)?;
    out.copy_from(&buf[..n])?;
    Ok(n)
}

pub fn sys_vmo_write(
    up: &Arc<ProcessDispatcher>,
    vmo: HandleValue,
    data_ptr: u64,
    offset: u64,
    len: usize,
) -> Result<usize, Status> {
    let dispatcher = up.get_dispatcher_with_rights(vmo, Rights::WRITE)?;
    let vmo = dispatcher.as_vmo()?;

    let data = UserSliceRead::new(up.aspace(), data_ptr, len)?.read_to_vec()?;
    vmo.write(&data, offset)
}

pub fn sys_vmo_get_size(
    up: &Arc<ProcessDispatcher>,
    vmo: HandleValue,
    size_ptr: u64,
) -> Result<(), Status> {
    let dispatcher = up.get_dispatcher_with_rights(vmo, Rights::READ)?;
    let size = dispatcher.as_vmo()?.get_size();
    UserSliceWrite::new(up.aspace(), size_ptr, 8)?
        .copy_from(&size.to_le_bytes())
        .map(|_| ())
}

pub fn sys_vmo_set_size(
    up: &Arc<ProcessDispatcher>,
    vmo: HandleValue,
    size: u64,
) -> Result<(), Status> {
    let dispatcher = up.get_dispatcher_with_rights(vmo, Rights::WRITE)?;
    dispatcher.as_vmo()?.set_size(size)
}

pub fn sys_vmo_op_range(
    up: &Arc<ProcessDispatcher>,
    vmo: HandleValue,
    op: u32,
    offset: u64,
    len: u64,
) -> Result<(), Status> {
    let dispatcher = up.get_dispatcher_with_rights(vmo, Rights::WRITE)?;
    dispatcher.as_vmo()?.op_range(op, offset, len)
}

/// Map a VMO into the target process. The address hint is read from and
/// the chosen address written back to `addr_ptr`.
pub fn sys_process_map_vm(
    up: &Arc<ProcessDispatcher>,
    process_value: HandleValue,
    vmo_value: HandleValue,
    offset: u64,
    len: u64,
    addr_ptr: u64,
    flags: u32,
) -> Result<(), Status> {
    let flags = VmFlags::from_bits(flags).ok_or(Status::InvalidArgs)?;
    if addr_ptr == 0 {
        return Err(Status::InvalidArgs);
    }

    let process_dispatcher = up.get_dispatcher_with_rights(process_value, Rights::WRITE)?;
    let process = process_dispatcher.as_process()?;

    let (vmo_dispatcher, vmo_rights) = up
        .get_dispatcher(vmo_value)
        .map_err(|e| up.bad_handle(vmo_value, e))?;
    let vmo = vmo_dispatcher.as_vmo()?;

    let hint_bytes = UserSliceRead::new(up.aspace(), addr_ptr, 8)?.read_to_vec()?;
    let hint = u64::from_le_bytes(hint_bytes.try_into().unwrap());

    let addr = vmo.map(process.aspace(), vmo_rights, offset, len, hint, flags)?;
    UserSliceWrite::new(up.aspace(), addr_ptr, 8)?
        .copy_from(&addr.to_le_bytes())
        .map(|_| ())
}

pub fn sys_process_unmap_vm(
    up: &Arc<ProcessDispatcher>,
    process_value: HandleValue,
    addr: u64,
    len: u64,
) -> Result<(), Status> {
    let process_dispatcher = up.get_dispatcher_with_rights(process_value, Rights::WRITE)?;
    process_dispatcher.as_process()?.aspace().unmap(addr, len)
}

pub fn sys_process_protect_vm(
    up: &Arc<ProcessDispatcher>,
    process_value: HandleValue,
    addr: u64,
    len: u64,
    prot: u32,
) -> Result<(), Status> {
    let prot = VmFlags::from_bits(prot).ok_or(Status::InvalidArgs)?;
    let process_dispatcher = up.get_dispatcher_with_rights(process_value, Rights::WRITE)?;
    process_dispatcher
        .as_process()?
        .aspace()
        .protect(addr, len, prot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn vmo_read_write_through_syscalls() {
        let (up, base) = testutil::new_process_with_mem("vmo-sys", 2);
        let vmo = sys_vmo_create(&up, 4096).unwrap();

        testutil::poke(&up, base, b"backing");
        assert_eq!(sys_vmo_write(&up, vmo, base, 64, 7).unwrap(), 7);
        assert_eq!(sys_vmo_read(&up, vmo, base + 64, 64, 7).unwrap(), 7);
        assert_eq!(testutil::peek(&up, base + 64, 7), b"backing");

        sys_vmo_set_size(&up, vmo, 100).unwrap();
        sys_vmo_get_size(&up, vmo, base + 128).unwrap();
        let size = u64::from_le_bytes(testutil::peek(&up, base + 128, 8).try_into().unwrap());
        assert_eq!(size, 100);
    }

    #[test]
    fn map_unmap_protect_through_syscalls() {
        // A process holding a handle to itself, the way a launcher would.
        let (self_dispatcher, up) = testutil::new_process_full("map-sys");
        let vmo_obj = crate::memory::VmObject::create(4096).unwrap();
        let base = up
            .aspace()
            .map(vmo_obj, 0, 4096, 0, VmFlags::PERM_READ | VmFlags::PERM_WRITE)
            .unwrap();
        let me = up.add_handle(
            handle::make_handle(self_dispatcher.clone(), Rights::basic()).unwrap(),
        );
        let vmo = sys_vmo_create(&up, 8192).unwrap();

        testutil::poke(&up, base, &0u64.to_le_bytes());
        sys_process_map_vm(
            &up,
            me,
            vmo,
            0,
            8192,
            base,
            (VmFlags::PERM_READ | VmFlags::PERM_WRITE).bits(),
        )
        .unwrap();
        let mapped = u64::from_le_bytes(testutil::peek(&up, base, 8).try_into().unwrap());
        assert_ne!(mapped, 0);

        // The mapping is live: writes through it land in the VMO.
        testutil::poke(&up, mapped, b"via-map");
        assert_eq!(sys_vmo_read(&up, vmo, base + 64, 0, 7).unwrap(), 7);
        assert_eq!(testutil::peek(&up, base + 64, 7), b"via-map");

        // Write-only protection is rejected; RX is fine; then unmap.
        assert_eq!(
            sys_process_protect_vm(&up, me, mapped, 0, VmFlags::PERM_WRITE.bits()),
            Err(Status::InvalidArgs)
        );
        sys_process_protect_vm(
            &up,
            me,
            mapped,
            0,
            (VmFlags::PERM_READ | VmFlags::PERM_EXECUTE).bits(),
        )
        .unwrap();
        sys_process_unmap_vm(&up, me, mapped, 0).unwrap();
        assert_eq!(
            sys_process_unmap_vm(&up, me, mapped, 0),
            Err(Status::NotFound)
        );
    }
}
