//! VM objects: the unit of mappable memory.
//!
//! Page-sparse byte stores. Pages materialize on first write; reads of
//! never-written pages observe zeroes. Physical page management beyond
//! this abstraction belongs to the platform layer.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use helion_syscall::Status;

use crate::memory::{page_align_up, PAGE_SIZE};
use crate::sync::SpinLock;

/// Cap on a single VMO; large enough for anything the core itself builds.
const MAX_VMO_SIZE: u64 = 1 << 36;

type Page = Box<[u8; PAGE_SIZE as usize]>;

struct Store {
    size: u64,
    pages: BTreeMap<u64, Page>,
}

pub struct VmObject {
    store: SpinLock<Store>,
}

impl VmObject {
    pub fn create(size: u64) -> Result<Arc<VmObject>, Status> {
        if size > MAX_VMO_SIZE {
            return Err(Status::NoMemory);
        }
        Ok(Arc::new(VmObject {
            store: SpinLock::new(Store {
                size,
                pages: BTreeMap::new(),
            }),
        }))
    }

    pub fn size(&self) -> u64 {
        self.store.lock().size
    }

    /// Grow or shrink. Shrinking drops whole pages past the new end and
    /// zeroes the tail of the boundary page, so re-growing reads zeroes.
    pub fn set_size(&self, size: u64) -> Result<(), Status> {
        if size > MAX_VMO_SIZE {
            return Err(Status::NoMemory);
        }
        let mut store = self.store.lock();
        if size < store.size {
            let first_dead_page = page_align_up(size) / PAGE_SIZE;
            store.pages.retain(|&index, _| index < first_dead_page);
            if size % PAGE_SIZE != 0 {
                if let Some(page) = store.pages.get_mut(&(size / PAGE_SIZE)) {
                    let from = (size % PAGE_SIZE) as usize;
                    page[from..].fill(0);
                }
            }
        }
        store.size = size;
        Ok(())
    }

    /// Copy out up to `buf.len()` bytes at `offset`; returns bytes copied.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, Status> {
        let store = self.store.lock();
        if offset > store.size {
            return Err(Status::OutOfRange);
        }
        let n = buf.len().min((store.size - offset) as usize);
        for i in 0..n {
            let addr = offset + i as u64;
            let byte = store
                .pages
                .get(&(addr / PAGE_SIZE))
                .map_or(0, |p| p[(addr % PAGE_SIZE) as usize]);
            buf[i] = byte;
        }
        Ok(n)
    }

    /// Copy in up to `buf.len()` bytes at `offset`; returns bytes copied.
    /// Never grows the object.
    pub fn write(&self, buf: &[u8], offset: u64) -> Result<usize, Status> {
        let mut store = self.store.lock();
        if offset > store.size {
            return Err(Status::OutOfRange);
        }
        let n = buf.len().min((store.size - offset) as usize);
        for i in 0..n {
            let addr = offset + i as u64;
            let page = store
                .pages
                .entry(addr / PAGE_SIZE)
                .or_insert_with(|| Box::new([0; PAGE_SIZE as usize]));
            page[(addr % PAGE_SIZE) as usize] = buf[i];
        }
        Ok(n)
    }

    /// Zero `[offset, offset+len)`, dropping pages that become all-zero
    /// wholesale.
    pub fn zero_range(&self, offset: u64, len: u64) -> Result<(), Status> {
        let mut store = self.store.lock();
        let end = offset.checked_add(len).ok_or(Status::OutOfRange)?;
        if end > store.size {
            return Err(Status::OutOfRange);
        }
        let mut addr = offset;
        while addr < end {
            let page_index = addr / PAGE_SIZE;
            let in_page = (addr % PAGE_SIZE) as usize;
            let n = ((PAGE_SIZE as usize) - in_page).min((end - addr) as usize);
            if in_page == 0 && n == PAGE_SIZE as usize {
                store.pages.remove(&page_index);
            } else if let Some(page) = store.pages.get_mut(&page_index) {
                page[in_page..in_page + n].fill(0);
            }
            addr += n as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_reads_are_zero() {
        let vmo = VmObject::create(2 * PAGE_SIZE).unwrap();
        let mut buf = [0xffu8; 16];
        assert_eq!(vmo.read(&mut buf, PAGE_SIZE - 8).unwrap(), 16);
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn write_read_roundtrip_across_pages() {
        let vmo = VmObject::create(2 * PAGE_SIZE).unwrap();
        let data: Vec<u8> = (0..32).collect();
        assert_eq!(vmo.write(&data, PAGE_SIZE - 16).unwrap(), 32);
        let mut back = [0u8; 32];
        assert_eq!(vmo.read(&mut back, PAGE_SIZE - 16).unwrap(), 32);
        assert_eq!(&back[..], &data[..]);
    }

    #[test]
    fn shrink_then_grow_zeroes_tail() {
        let vmo = VmObject::create(PAGE_SIZE).unwrap();
        vmo.write(&[7u8; 64], 100).unwrap();
        vmo.set_size(100).unwrap();
        vmo.set_size(PAGE_SIZE).unwrap();
        let mut buf = [0xffu8; 64];
        vmo.read(&mut buf, 100).unwrap();
        assert_eq!(buf, [0u8; 64]);
    }

    #[test]
    fn bounds_are_enforced() {
        let vmo = VmObject::create(64).unwrap();
        assert_eq!(vmo.read(&mut [0u8; 4], 65), Err(Status::OutOfRange));
        assert_eq!(vmo.write(&[0u8; 8], 60).unwrap(), 4);
    }
}
