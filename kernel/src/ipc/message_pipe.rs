//! Message pipes: the handle-carrying packet channel.
//!
//! A shared [`MessagePipe`] holds both sides' message FIFOs, liveness
//! flags, state trackers and optional I/O-port clients; each endpoint
//! dispatcher is a thin facade that forwards to its side. Handles inside a
//! queued [`MessagePacket`] are owned by the packet: they belong to no
//! handle table (owner koid zero) and are destroyed with the packet if it
//! is never read.

use alloc::sync::Arc;
use alloc::vec::Vec;

use helion_syscall::data::MSGPIPE_FLAG_REPLY_PIPE;
use helion_syscall::{Koid, Rights, Signals, SignalsState, Status};

use crate::object::handle::HandleOwner;
use crate::object::io_port::IoPortClient;
use crate::object::state_tracker::StateTracker;
use crate::object::{generate_koid, Dispatcher, DispatcherKind};
use crate::sync::SpinLock;

const DEFAULT_PIPE_RIGHTS: Rights = Rights::TRANSFER
    .union(Rights::READ)
    .union(Rights::WRITE);

/// A queued message: a byte payload plus handles in transit.
pub struct MessagePacket {
    pub data: Vec<u8>,
    pub handles: Vec<HandleOwner>,
}

impl MessagePacket {
    pub fn new(data: Vec<u8>, handles: Vec<HandleOwner>) -> Self {
        MessagePacket { data, handles }
    }

    /// Hand the handles back to the caller (failed write path) instead of
    /// destroying them with the packet.
    pub fn take_handles(&mut self) -> Vec<HandleOwner> {
        core::mem::take(&mut self.handles)
    }
}

struct PipeSide {
    alive: bool,
    messages: alloc::collections::VecDeque<MessagePacket>,
    iopc: Option<IoPortClient>,
}

impl PipeSide {
    fn new() -> Self {
        PipeSide {
            alive: true,
            messages: alloc::collections::VecDeque::new(),
            iopc: None,
        }
    }
}

fn other_side(side: usize) -> usize {
    side ^ 1
}

pub struct MessagePipe {
    koid: Koid,
    sides: SpinLock<[PipeSide; 2]>,
    trackers: [StateTracker; 2],
}

impl MessagePipe {
    fn new() -> Arc<Self> {
        let initial = SignalsState::new(
            Signals::WRITABLE,
            Signals::READABLE | Signals::WRITABLE | Signals::PEER_CLOSED,
        );
        Arc::new(MessagePipe {
            koid: generate_koid(),
            sides: SpinLock::new([PipeSide::new(), PipeSide::new()]),
            trackers: [
                StateTracker::new(true, initial),
                StateTracker::new(true, initial),
            ],
        })
    }

    pub fn koid(&self) -> Koid {
        self.koid
    }

    pub fn tracker(&self, side: usize) -> &StateTracker {
        &self.trackers[side]
    }

    /// Queue `msg` toward the peer of `side`. When the peer is gone the
    /// packet comes back so the caller can reinstate the handles.
    fn write(&self, side: usize, msg: MessagePacket) -> Result<(), (MessagePacket, Status)> {
        let other = other_side(side);
        let mut sides = self.sides.lock();
        if !sides[other].alive {
            return Err((msg, Status::BadState));
        }
        sides[other].messages.push_back(msg);
        self.trackers[other].update_satisfied(Signals::empty(), Signals::READABLE);
        if let Some(iopc) = &sides[other].iopc {
            iopc.signal(Signals::READABLE);
        }
        Ok(())
    }

    /// Dequeue the head message of `side`. Empty queue: `BadState` while
    /// the peer lives, `ChannelClosed` once it is gone.
    fn read(&self, side: usize) -> Result<MessagePacket, Status> {
        let other = other_side(side);
        let mut sides = self.sides.lock();
        let msg = sides[side].messages.pop_front();
        let other_alive = sides[other].alive;

        if sides[side].messages.is_empty() {
            let satisfiable_clear = if other_alive {
                Signals::empty()
            } else {
                Signals::READABLE
            };
            self.trackers[side].update_state(
                Signals::READABLE,
                Signals::empty(),
                satisfiable_clear,
                Signals::empty(),
            );
        }

        match msg {
            Some(msg) => Ok(msg),
            None if other_alive => Err(Status::BadState),
            None => Err(Status::ChannelClosed),
        }
    }

    fn set_io_port(&self, side: usize, client: IoPortClient) -> Result<(), Status> {
        let mut sides = self.sides.lock();
        if sides[side].iopc.is_some() {
            return Err(Status::BadState);
        }
        sides[side].iopc = Some(client);
        Ok(())
    }

    fn on_dispatcher_destruction(&self, side: usize) {
        let other = other_side(side);
        let dead_messages;
        {
            let mut sides = self.sides.lock();
            sides[side].alive = false;
            dead_messages = core::mem::take(&mut sides[side].messages);

            if sides[other].alive {
                let mut satisfiable_clear = Signals::WRITABLE;
                if sides[other].messages.is_empty() {
                    satisfiable_clear |= Signals::READABLE;
                }
                self.trackers[other].update_state(
                    Signals::WRITABLE,
                    Signals::PEER_CLOSED,
                    satisfiable_clear,
                    Signals::empty(),
                );
                if let Some(iopc) = &sides[other].iopc {
                    iopc.signal(Signals::PEER_CLOSED);
                }
            }
        }
        // Unread packets own handles whose destruction can run close
        // hooks; drop them outside the pipe lock.
        drop(dead_messages);
    }
}

pub struct MessagePipeDispatcher {
    side: usize,
    flags: u32,
    pipe: Arc<MessagePipe>,
    /// Message peeked by begin_read and not yet accepted.
    pending: SpinLock<Option<MessagePacket>>,
}

impl MessagePipeDispatcher {
    /// Create both endpoints. With `MSGPIPE_FLAG_REPLY_PIPE` the *second*
    /// endpoint is the reply pipe.
    pub fn create(flags: u32) -> Result<(Arc<Dispatcher>, Arc<Dispatcher>, Rights), Status> {
        if flags != 0 && flags != MSGPIPE_FLAG_REPLY_PIPE {
            return Err(Status::InvalidArgs);
        }
        let pipe = MessagePipe::new();
        let end0 = Dispatcher::new(DispatcherKind::MessagePipe(MessagePipeDispatcher {
            side: 0,
            flags: flags & !MSGPIPE_FLAG_REPLY_PIPE,
            pipe: pipe.clone(),
            pending: SpinLock::new(None),
        }));
        let end1 = Dispatcher::new(DispatcherKind::MessagePipe(MessagePipeDispatcher {
            side: 1,
            flags,
            pipe,
            pending: SpinLock::new(None),
        }));
        Ok((end0, end1, DEFAULT_PIPE_RIGHTS))
    }

    pub fn state_tracker(&self) -> &StateTracker {
        self.pipe.tracker(self.side)
    }

    pub fn pipe_koid(&self) -> Koid {
        self.pipe.koid()
    }

    pub fn is_reply_pipe(&self) -> bool {
        self.flags & MSGPIPE_FLAG_REPLY_PIPE != 0
    }

    /// Peek the head message's sizes without consuming it.
    ///
    /// Two threads may both get here before either accepts; the first
    /// accept wins and the loser observes `BadState`.
    pub fn begin_read(&self) -> Result<(usize, usize), Status> {
        let mut pending = self.pending.lock();
        if pending.is_none() {
            *pending = Some(self.pipe.read(self.side)?);
        }
        let msg = pending.as_ref().expect("just filled");
        Ok((msg.data.len(), msg.handles.len()))
    }

    /// Consume the message peeked by the last `begin_read`.
    pub fn accept_read(&self) -> Result<MessagePacket, Status> {
        self.pending.lock().take().ok_or(Status::BadState)
    }

    pub fn write(&self, msg: MessagePacket) -> Result<(), (MessagePacket, Status)> {
        self.pipe.write(self.side, msg)
    }

    pub fn set_io_port(&self, client: IoPortClient) -> Result<(), Status> {
        self.pipe.set_io_port(self.side, client)
    }
}

impl Drop for MessagePipeDispatcher {
    fn drop(&mut self) {
        // An unaccepted peeked message dies with us, handles included.
        self.pending.lock().take();
        self.pipe.on_dispatcher_destruction(self.side);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::event::EventDispatcher;
    use crate::object::handle::make_handle;

    fn setup() {
        crate::sched::host::install();
        crate::cprng::init(b"pipe-tests");
        crate::object::init();
    }

    fn endpoints() -> (Arc<Dispatcher>, Arc<Dispatcher>) {
        let (e0, e1, _) = MessagePipeDispatcher::create(0).unwrap();
        (e0, e1)
    }

    #[test]
    fn messages_flow_in_order() {
        setup();
        let (e0, e1) = endpoints();
        let p0 = e0.as_message_pipe().unwrap();
        let p1 = e1.as_message_pipe().unwrap();

        p0.write(MessagePacket::new(b"one".to_vec(), Vec::new()))
            .map_err(|(_, s)| s)
            .unwrap();
        p0.write(MessagePacket::new(b"two".to_vec(), Vec::new()))
            .map_err(|(_, s)| s)
            .unwrap();

        assert_eq!(p1.begin_read().unwrap(), (3, 0));
        assert_eq!(p1.accept_read().unwrap().data, b"one");
        assert_eq!(p1.accept_read().is_err(), true);
        p1.begin_read().unwrap();
        assert_eq!(p1.accept_read().unwrap().data, b"two");
        // Drained again.
        assert_eq!(p1.begin_read().unwrap_err(), Status::BadState);
    }

    #[test]
    fn signals_track_queue_and_peer() {
        setup();
        let (e0, e1) = endpoints();
        let p0 = e0.as_message_pipe().unwrap();

        let s1 = e1.state_tracker().unwrap().state();
        assert!(s1.satisfied.contains(Signals::WRITABLE));
        assert!(!s1.satisfied.contains(Signals::READABLE));

        p0.write(MessagePacket::new(b"x".to_vec(), Vec::new()))
            .map_err(|(_, s)| s)
            .unwrap();
        assert!(e1
            .state_tracker()
            .unwrap()
            .state()
            .satisfied
            .contains(Signals::READABLE));

        // Closing end 0 raises PEER_CLOSED on end 1; READABLE survives
        // while the message is still queued.
        drop(e0);
        let s1 = e1.state_tracker().unwrap().state();
        assert!(s1.satisfied.contains(Signals::PEER_CLOSED));
        assert!(s1.satisfied.contains(Signals::READABLE));
        assert!(!s1.satisfiable.contains(Signals::WRITABLE));

        // Draining the queue removes READABLE from the satisfiable set.
        let p1 = e1.as_message_pipe().unwrap();
        p1.begin_read().unwrap();
        p1.accept_read().unwrap();
        let s1 = e1.state_tracker().unwrap().state();
        assert!(!s1.satisfiable.contains(Signals::READABLE));
        assert_eq!(p1.begin_read().unwrap_err(), Status::ChannelClosed);
    }

    #[test]
    fn write_to_closed_peer_returns_packet() {
        setup();
        let (e0, e1) = endpoints();
        drop(e1);
        let p0 = e0.as_message_pipe().unwrap();
        let (msg, status) = p0
            .write(MessagePacket::new(b"lost".to_vec(), Vec::new()))
            .unwrap_err();
        assert_eq!(status, Status::BadState);
        assert_eq!(msg.data, b"lost");
    }

    #[test]
    fn destroying_unread_packet_destroys_its_handles() {
        setup();
        let (e0, e1) = endpoints();
        let (event, ev_rights) = EventDispatcher::create(0);
        let ev_handle = make_handle(event.clone(), ev_rights).unwrap();

        e0.as_message_pipe()
            .unwrap()
            .write(MessagePacket::new(Vec::new(), alloc::vec![ev_handle]))
            .map_err(|(_, s)| s)
            .unwrap();

        // Close the reader with the message still queued: the packet and
        // the event handle inside it are destroyed, dropping the event's
        // handle count to zero.
        drop(e1);
        // The only remaining references are ours; the tracker shows no
        // observers and user_signal still works (object alive via Arc).
        assert_eq!(Arc::strong_count(&event), 1);
    }

    #[test]
    fn pipe_end_lost_in_transit_closes_its_peer() {
        setup();
        // Send q-pipe carrier, p-pipe cargo: p1 travels through q0 and is
        // destroyed, still unread, when q1 closes.
        let (q0, q1) = endpoints();
        let (p0, p1, p_rights) = MessagePipeDispatcher::create(0).unwrap();
        let p1_handle = make_handle(p1.clone(), p_rights).unwrap();
        let p1_koid = p1.koid();
        drop(p1);

        q0.as_message_pipe()
            .unwrap()
            .write(MessagePacket::new(Vec::new(), alloc::vec![p1_handle]))
            .map_err(|(_, s)| s)
            .unwrap();

        // Before the close, the cargo dispatcher is alive and reachable.
        assert_ne!(p1_koid, 0);
        let s0 = p0.state_tracker().unwrap().state();
        assert!(!s0.satisfied.contains(Signals::PEER_CLOSED));

        // Closing the carrier's reading end destroys the queued packet and
        // with it p1; p0 observes PEER_CLOSED.
        drop(q1);
        let s0 = p0.state_tracker().unwrap().state();
        assert!(s0.satisfied.contains(Signals::PEER_CLOSED));
        assert!(!s0.satisfiable.contains(Signals::WRITABLE));
    }
}
