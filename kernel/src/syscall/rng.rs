//! CPRNG syscalls.

use alloc::sync::Arc;

use helion_syscall::data::{CPRNG_ADD_ENTROPY_MAX_LEN, CPRNG_DRAW_MAX_LEN};
use helion_syscall::Status;

use crate::memory::{UserSliceRead, UserSliceWrite};
use crate::process::ProcessDispatcher;

pub fn sys_cprng_draw(
    up: &Arc<ProcessDispatcher>,
    buffer_ptr: u64,
    len: usize,
) -> Result<usize, Status> {
    if len > CPRNG_DRAW_MAX_LEN {
        return Err(Status::InvalidArgs);
    }
    let out = UserSliceWrite::new(up.aspace(), buffer_ptr, len)?;
    let mut buf = alloc::vec![0u8; len];
    crate::cprng::draw(&mut buf);
    out.copy_from(&buf)?;
    Ok(len)
}

pub fn sys_cprng_add_entropy(
    up: &Arc<ProcessDispatcher>,
    buffer_ptr: u64,
    len: usize,
) -> Result<(), Status> {
    if len > CPRNG_ADD_ENTROPY_MAX_LEN {
        return Err(Status::InvalidArgs);
    }
    let entropy = UserSliceRead::new(up.aspace(), buffer_ptr, len)?.read_to_vec()?;
    crate::cprng::add_entropy(&entropy);
    Ok(())
}
