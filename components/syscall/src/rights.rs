//! Handle rights.

use bitflags::bitflags;

bitflags! {
    /// Per-handle rights mask. On transfer rights are preserved; a
    /// duplicate may only narrow them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u32 {
        const DUPLICATE    = 1 << 0;
        const TRANSFER     = 1 << 1;
        const READ         = 1 << 2;
        const WRITE        = 1 << 3;
        const EXECUTE      = 1 << 4;
        const MAP          = 1 << 5;
        const GET_PROPERTY = 1 << 6;
        const SET_PROPERTY = 1 << 7;
        const DEBUG        = 1 << 8;
        /// Sentinel for duplicate/replace: copy the source handle's rights.
        const SAME_RIGHTS  = 1 << 31;
    }
}

impl Rights {
    /// Default rights for freshly created waitable objects.
    pub const fn basic() -> Rights {
        Rights::DUPLICATE
            .union(Rights::TRANSFER)
            .union(Rights::READ)
            .union(Rights::WRITE)
    }

    /// True when `self` covers every right in `desired`.
    #[inline]
    pub fn covers(self, desired: Rights) -> bool {
        self.contains(desired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_is_subset_check() {
        let rw = Rights::READ | Rights::WRITE;
        assert!(rw.covers(Rights::READ));
        assert!(!Rights::READ.covers(rw));
        assert!(rw.covers(Rights::empty()));
    }
}
