//! Per-process address spaces.
//!
//! A region map over [`VmObject`]s standing in for the page tables: the
//! platform layer owns translation hardware, the core owns the layout and
//! the permission model. Regions are page-aligned, never overlap, and
//! carry the R/W/X permissions checked by every validated user access.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use helion_syscall::data::VmFlags;
use helion_syscall::Status;

use crate::memory::{page_align_up, VmObject, PAGE_SIZE};
use crate::sync::SpinLock;

/// Bottom of the user address range; the low megabytes stay unmapped so
/// null-ish pointers never validate.
pub const USER_ASPACE_BASE: u64 = 0x0100_0000;
/// Exclusive top of the user address range.
pub const USER_ASPACE_TOP: u64 = 0x0000_8000_0000_0000;

#[derive(Clone)]
struct Region {
    len: u64,
    vmo: Arc<VmObject>,
    vmo_offset: u64,
    prot: VmFlags,
}

pub struct AddressSpace {
    /// base → region; bases are page aligned and ranges disjoint.
    regions: SpinLock<BTreeMap<u64, Region>>,
    destroyed: AtomicBool,
}

impl AddressSpace {
    pub fn new() -> Arc<AddressSpace> {
        Arc::new(AddressSpace {
            regions: SpinLock::new(BTreeMap::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Validate a protection combination: R, RW and RX are supported;
    /// write-only (and WX without read) is rejected.
    pub fn check_prot(prot: VmFlags) -> Result<(), Status> {
        let perms = prot & (VmFlags::PERM_READ | VmFlags::PERM_WRITE | VmFlags::PERM_EXECUTE);
        let ok = perms == VmFlags::PERM_READ
            || perms == VmFlags::PERM_READ | VmFlags::PERM_WRITE
            || perms == VmFlags::PERM_READ | VmFlags::PERM_EXECUTE;
        if ok {
            Ok(())
        } else {
            Err(Status::InvalidArgs)
        }
    }

    /// Map `len` bytes of `vmo` starting at `vmo_offset`. With
    /// `VmFlags::FIXED` the hint is binding; otherwise the first hole at
    /// or above the hint (or the base of user space) is used. Returns the
    /// chosen base address.
    pub fn map(
        &self,
        vmo: Arc<VmObject>,
        vmo_offset: u64,
        len: u64,
        addr_hint: u64,
        prot: VmFlags,
    ) -> Result<u64, Status> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Status::BadState);
        }
        if len == 0 {
            return Err(Status::InvalidArgs);
        }
        Self::check_prot(prot)?;

        let len = page_align_up(len);
        let mut regions = self.regions.lock();

        let base = if prot.contains(VmFlags::FIXED) {
            if addr_hint % PAGE_SIZE != 0
                || addr_hint < USER_ASPACE_BASE
                || addr_hint.saturating_add(len) > USER_ASPACE_TOP
            {
                return Err(Status::InvalidArgs);
            }
            if !Self::range_is_free(&regions, addr_hint, len) {
                return Err(Status::AlreadyExists);
            }
            addr_hint
        } else {
            let start = if addr_hint == 0 { USER_ASPACE_BASE } else { addr_hint };
            Self::find_hole(&regions, start.max(USER_ASPACE_BASE), len)
                .ok_or(Status::NoMemory)?
        };

        regions.insert(
            base,
            Region {
                len,
                vmo,
                vmo_offset,
                prot,
            },
        );
        Ok(base)
    }

    fn range_is_free(regions: &BTreeMap<u64, Region>, base: u64, len: u64) -> bool {
        let end = match base.checked_add(len) {
            Some(e) if e <= USER_ASPACE_TOP => e,
            _ => return false,
        };
        if base < USER_ASPACE_BASE {
            return false;
        }
        // Any region starting below `end` that extends past `base` collides.
        for (&rbase, region) in regions.range(..end) {
            if rbase + region.len > base {
                return false;
            }
        }
        true
    }

    fn find_hole(regions: &BTreeMap<u64, Region>, start: u64, len: u64) -> Option<u64> {
        let mut candidate = start;
        loop {
            // Skip past any region covering the candidate.
            if let Some((&rbase, region)) = regions.range(..=candidate).next_back() {
                if rbase + region.len > candidate {
                    candidate = rbase + region.len;
                    continue;
                }
            }
            // Candidate is unmapped; does the next region leave room?
            if let Some((&rbase, region)) = regions.range(candidate..).next() {
                if candidate.checked_add(len)? > rbase {
                    candidate = rbase + region.len;
                    continue;
                }
            }
            return (candidate.checked_add(len)? <= USER_ASPACE_TOP).then_some(candidate);
        }
    }

    /// Unmap the region based at `addr`. `len` of zero means "whatever is
    /// mapped there"; a nonzero `len` must match the region.
    pub fn unmap(&self, addr: u64, len: u64) -> Result<(), Status> {
        let mut regions = self.regions.lock();
        let region = regions.get(&addr).ok_or(Status::NotFound)?;
        if len != 0 && page_align_up(len) != region.len {
            return Err(Status::InvalidArgs);
        }
        regions.remove(&addr);
        Ok(())
    }

    /// Change the protection of the region based at `addr`.
    pub fn protect(&self, addr: u64, len: u64, prot: VmFlags) -> Result<(), Status> {
        Self::check_prot(prot)?;
        let mut regions = self.regions.lock();
        let region = regions.get_mut(&addr).ok_or(Status::NotFound)?;
        if len != 0 && page_align_up(len) > region.len {
            return Err(Status::InvalidArgs);
        }
        region.prot =
            (prot & (VmFlags::PERM_READ | VmFlags::PERM_WRITE | VmFlags::PERM_EXECUTE))
                | (region.prot & VmFlags::FIXED);
        Ok(())
    }

    /// Check that `[addr, addr+len)` is mapped with `required` permissions.
    pub fn check_access(&self, addr: u64, len: u64, required: VmFlags) -> Result<(), Status> {
        if len == 0 {
            return Ok(());
        }
        let end = addr.checked_add(len).ok_or(Status::Fault)?;
        if addr < USER_ASPACE_BASE || end > USER_ASPACE_TOP {
            return Err(Status::Fault);
        }
        let regions = self.regions.lock();
        let mut cursor = addr;
        while cursor < end {
            let (&rbase, region) = regions
                .range(..=cursor)
                .next_back()
                .ok_or(Status::Fault)?;
            if rbase + region.len <= cursor {
                return Err(Status::Fault);
            }
            if !region.prot.contains(required) {
                return Err(Status::AccessDenied);
            }
            cursor = rbase + region.len;
        }
        Ok(())
    }

    /// Copy bytes out of user memory. The range must already have been
    /// validated with [`AddressSpace::check_access`].
    pub fn read_user(&self, addr: u64, buf: &mut [u8]) -> Result<(), Status> {
        self.walk(addr, buf.len() as u64, |region_vmo, vmo_off, range, buf_off| {
            let chunk = &mut buf[buf_off..buf_off + range as usize];
            region_vmo.read(chunk, vmo_off).map(|_| ())
        })
    }

    /// Copy bytes into user memory. See [`AddressSpace::read_user`].
    pub fn write_user(&self, addr: u64, buf: &[u8]) -> Result<(), Status> {
        self.walk(addr, buf.len() as u64, |region_vmo, vmo_off, range, buf_off| {
            let chunk = &buf[buf_off..buf_off + range as usize];
            region_vmo.write(chunk, vmo_off).map(|_| ())
        })
    }

    fn walk<F>(&self, addr: u64, len: u64, mut f: F) -> Result<(), Status>
    where
        F: FnMut(&Arc<VmObject>, u64, u64, usize) -> Result<(), Status>,
    {
        let end = addr.checked_add(len).ok_or(Status::Fault)?;
        let regions = self.regions.lock();
        let mut cursor = addr;
        let mut buf_off = 0usize;
        while cursor < end {
            let (&rbase, region) = regions
                .range(..=cursor)
                .next_back()
                .ok_or(Status::Fault)?;
            let region_end = rbase + region.len;
            if region_end <= cursor {
                return Err(Status::Fault);
            }
            let n = (region_end.min(end)) - cursor;
            let vmo_off = region.vmo_offset + (cursor - rbase);
            f(&region.vmo, vmo_off, n, buf_off)?;
            cursor += n;
            buf_off += n as usize;
        }
        Ok(())
    }

    /// Tear down every mapping; further operations fail with `BadState`.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.regions.lock().clear();
    }

    pub fn region_count(&self) -> usize {
        self.regions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aspace_with_one_map() -> (Arc<AddressSpace>, u64) {
        let aspace = AddressSpace::new();
        let vmo = VmObject::create(4 * PAGE_SIZE).unwrap();
        let base = aspace
            .map(vmo, 0, 4 * PAGE_SIZE, 0, VmFlags::PERM_READ | VmFlags::PERM_WRITE)
            .unwrap();
        (aspace, base)
    }

    #[test]
    fn map_places_in_user_range() {
        let (_aspace, base) = aspace_with_one_map();
        assert!(base >= USER_ASPACE_BASE);
        assert_eq!(base % PAGE_SIZE, 0);
    }

    #[test]
    fn fixed_mapping_collision_is_rejected() {
        let (aspace, base) = aspace_with_one_map();
        let vmo = VmObject::create(PAGE_SIZE).unwrap();
        let r = aspace.map(
            vmo,
            0,
            PAGE_SIZE,
            base,
            VmFlags::FIXED | VmFlags::PERM_READ,
        );
        assert_eq!(r.unwrap_err(), Status::AlreadyExists);
    }

    #[test]
    fn write_only_protection_is_rejected() {
        let (aspace, base) = aspace_with_one_map();
        assert_eq!(
            aspace.protect(base, 0, VmFlags::PERM_WRITE),
            Err(Status::InvalidArgs)
        );
        aspace
            .protect(base, 0, VmFlags::PERM_READ | VmFlags::PERM_EXECUTE)
            .unwrap();
        // Now writes must fail the access check.
        assert_eq!(
            aspace.check_access(base, 8, VmFlags::PERM_WRITE),
            Err(Status::AccessDenied)
        );
    }

    #[test]
    fn user_copies_roundtrip() {
        let (aspace, base) = aspace_with_one_map();
        aspace.write_user(base + 100, b"helion").unwrap();
        let mut back = [0u8; 6];
        aspace.read_user(base + 100, &mut back).unwrap();
        assert_eq!(&back, b"helion");
    }

    #[test]
    fn unmapped_access_faults() {
        let (aspace, base) = aspace_with_one_map();
        assert_eq!(
            aspace.check_access(base + 64 * PAGE_SIZE, 4, VmFlags::PERM_READ),
            Err(Status::Fault)
        );
        aspace.unmap(base, 0).unwrap();
        assert_eq!(
            aspace.check_access(base, 4, VmFlags::PERM_READ),
            Err(Status::Fault)
        );
    }
}
