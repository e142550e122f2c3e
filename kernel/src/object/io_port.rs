//! I/O ports: bounded FIFOs of fixed-size packets.
//!
//! Packets arrive from `port_queue` (user packets) or from an
//! [`IoPortClient`] bound to a source dispatcher's state tracker, which
//! turns signal edges into IOSN packets. `port_wait` blocks until a packet
//! is available.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crossbeam_queue::ArrayQueue;
use helion_syscall::data::{IoPacket, PacketHeader, PKT_TYPE_IOSN};
use helion_syscall::{Rights, Signals, Status, Time};
use zerocopy::AsBytes;

use crate::object::{Dispatcher, DispatcherKind};
use crate::sync::{SpinLock, WaitQueue};

const DEFAULT_IO_PORT_RIGHTS: Rights = Rights::basic();

/// Bound on queued packets per port.
const PORT_DEPTH: usize = 128;

pub struct IoPortDispatcher {
    _options: u32,
    packets: ArrayQueue<Vec<u8>>,
    no_clients: SpinLock<bool>,
    waiters: WaitQueue,
}

impl IoPortDispatcher {
    pub fn create(options: u32) -> (Arc<Dispatcher>, Rights) {
        let port = IoPortDispatcher {
            _options: options,
            packets: ArrayQueue::new(PORT_DEPTH),
            no_clients: SpinLock::new(false),
            waiters: WaitQueue::new(),
        };
        (
            Dispatcher::new(DispatcherKind::IoPort(port)),
            DEFAULT_IO_PORT_RIGHTS,
        )
    }

    /// Enqueue a raw packet (header already in place).
    pub fn queue(&self, packet: Vec<u8>) -> Result<(), Status> {
        {
            let no_clients = self.no_clients.lock();
            if *no_clients {
                return Err(Status::Unavailable);
            }
            self.packets.push(packet).map_err(|_| Status::NoResources)?;
        }
        self.waiters.wake_one();
        Ok(())
    }

    /// Build and enqueue an IOSN packet for a signal edge.
    pub fn queue_signal_packet(&self, key: u64, signals: Signals) -> Result<(), Status> {
        let packet = IoPacket {
            hdr: PacketHeader {
                key,
                packet_type: PKT_TYPE_IOSN,
                extra: 0,
            },
            timestamp: crate::sched::now(),
            bytes: 0,
            signals: signals.bits(),
            reserved: 0,
        };
        self.queue(packet.as_bytes().into())
    }

    /// Dequeue the next packet, blocking until one arrives.
    pub fn wait(&self, deadline: Option<Time>) -> Result<Vec<u8>, Status> {
        self.waiters
            .wait_until_deadline(deadline, || self.packets.pop())
    }

    pub(crate) fn on_zero_handles(&self) {
        let mut no_clients = self.no_clients.lock();
        *no_clients = true;
        while self.packets.pop().is_some() {}
    }
}

/// Binds an I/O port to a source dispatcher's state tracker: whenever any
/// of the bound signals becomes satisfied the port receives an IOSN
/// packet carrying the user key.
pub struct IoPortClient {
    key: u64,
    signals: Signals,
    port: SpinLock<Option<Arc<Dispatcher>>>,
}

impl IoPortClient {
    pub fn new(port: Arc<Dispatcher>, key: u64, signals: Signals) -> Result<Self, Status> {
        port.as_io_port()?;
        Ok(IoPortClient {
            key,
            signals,
            port: SpinLock::new(Some(port)),
        })
    }

    /// Deliver `signals` if they intersect the bound mask. Called by the
    /// source object under its own lock; must not block.
    pub fn signal(&self, signals: Signals) -> bool {
        if !signals.intersects(self.signals) {
            return true;
        }
        let port = self.port.lock().clone();
        let Some(port) = port else {
            return true;
        };
        let io_port = port.as_io_port().expect("client bound to non-port");
        match io_port.queue_signal_packet(self.key, signals & self.signals) {
            Ok(()) => true,
            Err(Status::Unavailable) => {
                // The port has no clients left and survives only through
                // our reference; release it.
                self.port.lock().take();
                true
            }
            Err(_) => false,
        }
    }
}
