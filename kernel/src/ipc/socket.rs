//! Sockets: bidirectional byte streams with an out-of-band channel.
//!
//! Each half owns its receive buffers; a write lands in the peer's buffer
//! and raises READABLE there. Losing the last handle to one half
//! half-closes the stream: the peer keeps draining what it already has
//! under PEER_CLOSED.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use helion_syscall::data::SOCKET_CONTROL_MAX_LEN;
use helion_syscall::{Rights, Signals, SignalsState, Status};

use crate::object::state_tracker::StateTracker;
use crate::object::{Dispatcher, DispatcherKind};
use crate::sync::SpinLock;

const DEFAULT_SOCKET_RIGHTS: Rights = Rights::basic();

const SOCKET_BUFFER_SIZE: usize = 64 * 1024;

struct Buffers {
    data: VecDeque<u8>,
    oob: VecDeque<u8>,
    peer: Option<Arc<Dispatcher>>,
}

pub struct SocketDispatcher {
    _flags: u32,
    state_tracker: StateTracker,
    buffers: SpinLock<Buffers>,
}

impl SocketDispatcher {
    pub fn create(flags: u32) -> Result<(Arc<Dispatcher>, Arc<Dispatcher>, Rights), Status> {
        let d0 = Dispatcher::new(DispatcherKind::Socket(Self::new_half(flags)));
        let d1 = Dispatcher::new(DispatcherKind::Socket(Self::new_half(flags)));

        d0.as_socket().unwrap().buffers.lock().peer = Some(d1.clone());
        d1.as_socket().unwrap().buffers.lock().peer = Some(d0.clone());

        Ok((d0, d1, DEFAULT_SOCKET_RIGHTS))
    }

    fn new_half(flags: u32) -> Self {
        SocketDispatcher {
            _flags: flags,
            state_tracker: StateTracker::new(
                true,
                SignalsState::new(
                    Signals::WRITABLE,
                    Signals::READABLE | Signals::WRITABLE | Signals::PEER_CLOSED,
                ),
            ),
            buffers: SpinLock::new(Buffers {
                data: VecDeque::new(),
                oob: VecDeque::new(),
                peer: None,
            }),
        }
    }

    pub fn state_tracker(&self) -> &StateTracker {
        &self.state_tracker
    }

    /// Write into the peer's receive buffer; returns bytes accepted.
    pub fn write(&self, src: &[u8]) -> Result<usize, Status> {
        let peer = self.buffers.lock().peer.clone();
        let peer = peer.ok_or(Status::ChannelClosed)?;
        let result = peer.as_socket().expect("socket peer").write_self(src);
        // Our WRITABLE mirrors space in the peer's buffer.
        match result {
            Ok(n) if n == src.len() => {}
            _ => self
                .state_tracker
                .update_satisfied(Signals::WRITABLE, Signals::empty()),
        }
        result
    }

    fn write_self(&self, src: &[u8]) -> Result<usize, Status> {
        let mut buffers = self.buffers.lock();
        let room = SOCKET_BUFFER_SIZE - buffers.data.len();
        if room == 0 {
            return Err(Status::ShouldWait);
        }
        let n = src.len().min(room);
        buffers.data.extend(&src[..n]);
        self.state_tracker
            .update_satisfied(Signals::empty(), Signals::READABLE);
        Ok(n)
    }

    /// Write to the out-of-band control channel, all or nothing.
    pub fn oob_write(&self, src: &[u8]) -> Result<usize, Status> {
        if src.is_empty() || src.len() > SOCKET_CONTROL_MAX_LEN {
            return Err(Status::InvalidArgs);
        }
        let peer = self.buffers.lock().peer.clone();
        let peer = peer.ok_or(Status::ChannelClosed)?;
        let peer_socket = peer.as_socket().expect("socket peer");
        let mut buffers = peer_socket.buffers.lock();
        if buffers.oob.len() + src.len() > SOCKET_CONTROL_MAX_LEN {
            return Err(Status::ShouldWait);
        }
        buffers.oob.extend(src);
        peer_socket
            .state_tracker
            .update_satisfied(Signals::empty(), Signals::READABLE);
        Ok(src.len())
    }

    /// Read from this half's receive buffer.
    pub fn read(&self, dest: &mut [u8]) -> Result<usize, Status> {
        let (n, peer) = {
            let mut buffers = self.buffers.lock();
            if buffers.data.is_empty() {
                if buffers.peer.is_none() {
                    return Err(Status::ChannelClosed);
                }
                return Err(Status::ShouldWait);
            }
            let n = dest.len().min(buffers.data.len());
            for slot in dest[..n].iter_mut() {
                *slot = buffers.data.pop_front().expect("counted");
            }
            if buffers.data.is_empty() && buffers.oob.is_empty() {
                self.state_tracker
                    .update_satisfied(Signals::READABLE, Signals::empty());
            }
            (n, buffers.peer.clone())
        };
        // Draining made room: the peer can write again.
        if let Some(peer) = peer {
            peer.as_socket()
                .expect("socket peer")
                .state_tracker
                .update_satisfied(Signals::empty(), Signals::WRITABLE);
        }
        Ok(n)
    }

    pub fn oob_read(&self, dest: &mut [u8]) -> Result<usize, Status> {
        let mut buffers = self.buffers.lock();
        if buffers.oob.is_empty() {
            if buffers.peer.is_none() {
                return Err(Status::ChannelClosed);
            }
            return Err(Status::ShouldWait);
        }
        let n = dest.len().min(buffers.oob.len());
        for slot in dest[..n].iter_mut() {
            *slot = buffers.oob.pop_front().expect("counted");
        }
        if buffers.data.is_empty() && buffers.oob.is_empty() {
            self.state_tracker
                .update_satisfied(Signals::READABLE, Signals::empty());
        }
        Ok(n)
    }

    pub(crate) fn on_zero_handles(&self) {
        let peer = self.buffers.lock().peer.take();
        if let Some(peer) = peer {
            peer.as_socket().expect("socket peer").on_peer_zero_handles();
        }
    }

    fn on_peer_zero_handles(&self) {
        let mut buffers = self.buffers.lock();
        buffers.peer = None;
        let drained = buffers.data.is_empty() && buffers.oob.is_empty();
        let satisfiable_clear = if drained {
            Signals::WRITABLE | Signals::READABLE
        } else {
            Signals::WRITABLE
        };
        self.state_tracker.update_state(
            Signals::WRITABLE,
            Signals::PEER_CLOSED,
            satisfiable_clear,
            Signals::empty(),
        );
    }
}
