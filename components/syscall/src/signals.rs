//! Level-triggered object signals.

use bitflags::bitflags;

bitflags! {
    /// Signal bits carried by a state tracker. A waiter becomes runnable
    /// whenever `satisfied & desired != 0`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Signals: u32 {
        const READABLE    = 1 << 0;
        const WRITABLE    = 1 << 1;
        const PEER_CLOSED = 1 << 2;

        const SIGNAL0     = 1 << 3;
        const SIGNAL1     = 1 << 4;
        const SIGNAL2     = 1 << 5;
        const SIGNAL3     = 1 << 6;
        const SIGNAL4     = 1 << 7;

        const READ_THRESHOLD  = 1 << 8;
        const WRITE_THRESHOLD = 1 << 9;
    }
}

/// Alias: the "signaled" bit raised by events, process exit and thread exit.
pub const SIGNAL_SIGNALED: Signals = Signals::SIGNAL0;

/// The user-settable range for events and event pairs.
pub const SIGNAL_USER_ALL: Signals = Signals::SIGNAL0
    .union(Signals::SIGNAL1)
    .union(Signals::SIGNAL2)
    .union(Signals::SIGNAL3)
    .union(Signals::SIGNAL4);

/// The `(satisfied, satisfiable)` pair published by a state tracker.
///
/// Invariant at every observable point: `satisfied` is a subset of
/// `satisfiable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalsState {
    pub satisfied: Signals,
    pub satisfiable: Signals,
}

impl SignalsState {
    pub const fn new(satisfied: Signals, satisfiable: Signals) -> Self {
        SignalsState { satisfied, satisfiable }
    }

    pub const fn empty() -> Self {
        SignalsState { satisfied: Signals::empty(), satisfiable: Signals::empty() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_range_excludes_io_bits() {
        assert!(!SIGNAL_USER_ALL.intersects(Signals::READABLE | Signals::WRITABLE));
        assert!(SIGNAL_USER_ALL.contains(SIGNAL_SIGNALED));
    }
}
