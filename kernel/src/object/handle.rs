//! The global handle arena and the user-value codec.
//!
//! Handles live in a fixed-capacity slab so every handle has a stable slot
//! index for the lifetime of the capability — including while it is in
//! transit inside a message. The user-visible value is
//! `((index << 2) | 1) ^ secret` with a per-process secret: non-negative,
//! bottom bit set, and unforgeable without the secret. The two reserved
//! low bits are checked again on lookup.

use alloc::sync::Arc;
use alloc::vec::Vec;

use helion_syscall::{HandleValue, Koid, Rights, Status};
use spin::Once;

use crate::object::Dispatcher;
use crate::sync::SpinLock;

/// Upper bound of live handles per system.
pub const MAX_HANDLE_COUNT: usize = 32 * 1024;

/// A handle's arena slot index. Stable across transfer; the identity used
/// for cancel-by-handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HandleId(pub(crate) u32);

/// A capability: a shared reference to a dispatcher plus a rights mask,
/// owned by at most one handle table at a time.
pub struct Handle {
    dispatcher: Arc<Dispatcher>,
    rights: Rights,
    /// Koid of the owning process; zero while unowned or in transit.
    owner: Koid,
}

impl Handle {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn rights(&self) -> Rights {
        self.rights
    }

    pub fn owner(&self) -> Koid {
        self.owner
    }
}

struct Arena {
    slots: Vec<Option<Handle>>,
    free: Vec<u32>,
}

impl Arena {
    fn allocate(&mut self, handle: Handle) -> Option<HandleId> {
        if let Some(index) = self.free.pop() {
            debug_assert!(self.slots[index as usize].is_none());
            self.slots[index as usize] = Some(handle);
            return Some(HandleId(index));
        }
        if self.slots.len() >= MAX_HANDLE_COUNT {
            return None;
        }
        let index = self.slots.len() as u32;
        self.slots.push(Some(handle));
        Some(HandleId(index))
    }

    fn take(&mut self, id: HandleId) -> Option<Handle> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        let handle = slot.take()?;
        // The emptied slot is what lookup keys off; push to the free list
        // only after it is observably empty.
        self.free.push(id.0);
        Some(handle)
    }

    fn get(&self, id: HandleId) -> Option<&Handle> {
        self.slots.get(id.0 as usize)?.as_ref()
    }

    fn get_mut(&mut self, id: HandleId) -> Option<&mut Handle> {
        self.slots.get_mut(id.0 as usize)?.as_mut()
    }
}

static ARENA: Once<SpinLock<Arena>> = Once::new();

pub(crate) fn init() {
    ARENA.call_once(|| {
        SpinLock::new(Arena {
            slots: Vec::new(),
            free: Vec::new(),
        })
    });
}

fn arena() -> &'static SpinLock<Arena> {
    ARENA.get().expect("handle arena not initialized")
}

/// Exclusive ownership of an arena slot. Dropping destroys the handle
/// (cancelling observers and releasing the dispatcher reference), exactly
/// like closing it.
pub struct HandleOwner(HandleId);

impl HandleOwner {
    pub fn id(&self) -> HandleId {
        self.0
    }

    /// Give up ownership without destroying; the caller takes over the
    /// slot (used when a handle enters a handle table).
    pub(crate) fn leak(self) -> HandleId {
        let id = self.0;
        core::mem::forget(self);
        id
    }

    /// Reclaim ownership of a slot previously leaked into a handle table.
    /// Caller must have unlinked it from the table first.
    pub(crate) fn from_table(id: HandleId) -> Self {
        HandleOwner(id)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        with_handle(self.0, |h| h.dispatcher().clone()).expect("owned handle vanished")
    }

    pub fn rights(&self) -> Rights {
        with_handle(self.0, |h| h.rights()).expect("owned handle vanished")
    }
}

impl Drop for HandleOwner {
    fn drop(&mut self) {
        destroy(self.0);
    }
}

/// Allocate a handle for `dispatcher` with `rights`.
pub fn make_handle(dispatcher: Arc<Dispatcher>, rights: Rights) -> Result<HandleOwner, Status> {
    dispatcher.add_handle_ref();
    let handle = Handle {
        dispatcher: dispatcher.clone(),
        rights,
        owner: 0,
    };
    let id = arena().lock().allocate(handle);
    match id {
        Some(id) => Ok(HandleOwner(id)),
        None => {
            dispatcher.release_handle_ref();
            Err(Status::NoResources)
        }
    }
}

/// Duplicate `source` with `rights`. The new handle starts with the same
/// owner as the source.
pub fn dup_handle(source: HandleId, rights: Rights) -> Result<HandleOwner, Status> {
    let mut guard = arena().lock();
    let (dispatcher, owner) = {
        let src = guard.get(source).ok_or(Status::BadHandle)?;
        (src.dispatcher().clone(), src.owner())
    };
    dispatcher.add_handle_ref();
    let id = guard.allocate(Handle {
        dispatcher: dispatcher.clone(),
        rights,
        owner,
    });
    drop(guard);
    match id {
        Some(id) => Ok(HandleOwner(id)),
        None => {
            dispatcher.release_handle_ref();
            Err(Status::NoMemory)
        }
    }
}

/// Destroy the handle in slot `id`: cancel in-flight waits keyed on it,
/// drop the dispatcher reference outside the arena lock, zero the slot.
fn destroy(id: HandleId) {
    let dispatcher = with_handle(id, |h| h.dispatcher().clone());
    let Some(dispatcher) = dispatcher else {
        debug_assert!(false, "double free of handle slot {}", id.0);
        return;
    };

    if let Some(tracker) = dispatcher.state_tracker() {
        tracker.cancel(id);
    }

    let handle = arena().lock().take(id);
    // Dropping the Handle (and possibly the dispatcher) can run arbitrary
    // close hooks; never under the arena lock.
    drop(handle);
    dispatcher.release_handle_ref();
}

/// Run `f` against the handle in slot `id`, if allocated.
pub fn with_handle<T>(id: HandleId, f: impl FnOnce(&Handle) -> T) -> Option<T> {
    let guard = arena().lock();
    guard.get(id).map(f)
}

/// Set the owning-process koid of `id`.
pub(crate) fn set_owner(id: HandleId, owner: Koid) {
    let mut guard = arena().lock();
    if let Some(handle) = guard.get_mut(id) {
        handle.owner = owner;
    } else {
        debug_assert!(false, "set_owner on free slot {}", id.0);
    }
}

// ── Value codec ──────────────────────────────────────────────────────────────

/// Draw a fresh per-process handle secret: top bit and the two reserved
/// low bits clear.
pub fn new_handle_secret() -> u32 {
    (crate::cprng::draw_u32() << 2) & (i32::MAX as u32)
}

/// Map an arena slot to the user-visible value under `secret`.
pub fn encode(id: HandleId, secret: u32) -> HandleValue {
    debug_assert_eq!(secret & 0x8000_0003, 0);
    debug_assert_eq!(id.0 & 0xe000_0000, 0);
    (((id.0 << 2) | 1) ^ secret) as HandleValue
}

/// Undo [`encode`]. Checks the two reserved bits; ownership is checked by
/// the caller against the arena slot.
pub fn decode(value: HandleValue, secret: u32) -> Option<HandleId> {
    let mixed = (value as u32) ^ secret;
    if mixed & 0x1 == 0 || mixed & 0x2 != 0 {
        return None;
    }
    let index = mixed >> 2;
    if index as usize >= MAX_HANDLE_COUNT {
        return None;
    }
    Some(HandleId(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_roundtrip_and_reserved_bits() {
        let secret = 0x1234_5670 & (i32::MAX as u32) & !3;
        for index in [0u32, 1, 77, (MAX_HANDLE_COUNT - 1) as u32] {
            let value = encode(HandleId(index), secret);
            assert!(value > 0, "handle values are positive");
            assert_eq!(decode(value, secret), Some(HandleId(index)));
            // A mismatched secret flips the reserved low bit.
            assert_eq!(decode(value, secret ^ 1), None);
        }
        // Zero is never a valid value: it decodes only if secret has low
        // bit set, which secrets never do.
        assert_eq!(decode(0, secret), None);
    }

    #[test]
    fn secrets_leave_reserved_bits_clear() {
        crate::sched::host::install();
        crate::cprng::init(b"handle-secret-test");
        for _ in 0..32 {
            let s = new_handle_secret();
            assert_eq!(s & 0x8000_0003, 0);
        }
    }
}
