//! Kernel objects: dispatchers, handles and the signal/wait layer.
//!
//! A [`Dispatcher`] is a shared, ref-counted kernel object with a frozen
//! koid and type tag. Polymorphism over the object kinds is a tagged enum
//! plus a small capability surface (state tracker, user signal, zero-handle
//! hook, typed accessors) — one runtime check per syscall entry point.

pub mod event;
pub mod handle;
pub mod interrupt;
pub mod io_port;
pub mod log;
pub mod resource;
pub mod state_tracker;
pub mod vmo;
pub mod wait_event;
pub mod wait_set;
pub mod waiter;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use helion_syscall::data::ObjectType;
use helion_syscall::{Koid, Signals, Status};

use crate::ipc::data_pipe::{DataPipeConsumer, DataPipeProducer};
use crate::ipc::message_pipe::MessagePipeDispatcher;
use crate::ipc::socket::SocketDispatcher;
use crate::process::process::ProcessDispatcher;
use crate::process::thread::ThreadDispatcher;
use event::{EventDispatcher, EventPairDispatcher};
use interrupt::InterruptDispatcher;
use io_port::IoPortDispatcher;
use resource::ResourceDispatcher;
use self::log::LogDispatcher;
use state_tracker::StateTracker;
use vmo::VmObjectDispatcher;
use wait_set::WaitSetDispatcher;

/// One-time setup of the object layer globals.
pub fn init() {
    handle::init();
}

// Koids are globally monotonic and never reused. Zero is invalid; low
// values are left unused to make accidental-zero bugs visible.
static NEXT_KOID: AtomicU64 = AtomicU64::new(1024);

pub fn generate_koid() -> Koid {
    NEXT_KOID.fetch_add(1, Ordering::Relaxed)
}

pub enum DispatcherKind {
    Process(Arc<ProcessDispatcher>),
    Thread(ThreadDispatcher),
    VmObject(VmObjectDispatcher),
    MessagePipe(MessagePipeDispatcher),
    Event(EventDispatcher),
    EventPair(EventPairDispatcher),
    IoPort(IoPortDispatcher),
    DataPipeProducer(DataPipeProducer),
    DataPipeConsumer(DataPipeConsumer),
    Interrupt(InterruptDispatcher),
    Log(LogDispatcher),
    WaitSet(WaitSetDispatcher),
    Socket(SocketDispatcher),
    Resource(ResourceDispatcher),
}

pub struct Dispatcher {
    koid: Koid,
    handle_count: AtomicU32,
    kind: DispatcherKind,
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("koid", &self.koid)
            .field("type", &self.object_type())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(kind: DispatcherKind) -> Arc<Self> {
        Self::with_koid(generate_koid(), kind)
    }

    /// For objects that generated their koid before construction (process,
    /// thread) so inner structures can carry the same id.
    pub fn with_koid(koid: Koid, kind: DispatcherKind) -> Arc<Self> {
        Arc::new(Dispatcher {
            koid,
            handle_count: AtomicU32::new(0),
            kind,
        })
    }

    pub fn koid(&self) -> Koid {
        self.koid
    }

    pub fn kind(&self) -> &DispatcherKind {
        &self.kind
    }

    pub fn object_type(&self) -> ObjectType {
        match &self.kind {
            DispatcherKind::Process(_) => ObjectType::Process,
            DispatcherKind::Thread(_) => ObjectType::Thread,
            DispatcherKind::VmObject(_) => ObjectType::VmObject,
            DispatcherKind::MessagePipe(_) => ObjectType::MessagePipe,
            DispatcherKind::Event(_) => ObjectType::Event,
            DispatcherKind::EventPair(_) => ObjectType::EventPair,
            DispatcherKind::IoPort(_) => ObjectType::IoPort,
            DispatcherKind::DataPipeProducer(_) => ObjectType::DataPipeProducer,
            DispatcherKind::DataPipeConsumer(_) => ObjectType::DataPipeConsumer,
            DispatcherKind::Interrupt(_) => ObjectType::Interrupt,
            DispatcherKind::Log(_) => ObjectType::Log,
            DispatcherKind::WaitSet(_) => ObjectType::WaitSet,
            DispatcherKind::Socket(_) => ObjectType::Socket,
            DispatcherKind::Resource(_) => ObjectType::Resource,
        }
    }

    pub fn state_tracker(&self) -> Option<&StateTracker> {
        match &self.kind {
            DispatcherKind::Process(p) => Some(p.state_tracker()),
            DispatcherKind::Thread(t) => Some(t.thread().state_tracker()),
            DispatcherKind::MessagePipe(mp) => Some(mp.state_tracker()),
            DispatcherKind::Event(e) => Some(e.state_tracker()),
            DispatcherKind::EventPair(ep) => Some(ep.state_tracker()),
            DispatcherKind::DataPipeProducer(p) => Some(p.state_tracker()),
            DispatcherKind::DataPipeConsumer(c) => Some(c.state_tracker()),
            DispatcherKind::Socket(s) => Some(s.state_tracker()),
            DispatcherKind::WaitSet(ws) => Some(ws.state_tracker()),
            DispatcherKind::VmObject(_)
            | DispatcherKind::IoPort(_)
            | DispatcherKind::Interrupt(_)
            | DispatcherKind::Log(_)
            | DispatcherKind::Resource(_) => None,
        }
    }

    pub fn is_waitable(&self) -> bool {
        self.state_tracker().map_or(false, |t| t.is_waitable())
    }

    /// Koid of an inner or peer object: the shared pipe for message-pipe
    /// ends, the peer for event pairs, the user thread for thread
    /// dispatchers. Zero otherwise.
    pub fn inner_koid(&self) -> Koid {
        match &self.kind {
            DispatcherKind::MessagePipe(mp) => mp.pipe_koid(),
            DispatcherKind::EventPair(ep) => ep.peer_koid(),
            DispatcherKind::Thread(t) => t.thread().koid(),
            _ => 0,
        }
    }

    /// `object_signal`: set/clear user signals where the type allows it.
    pub fn user_signal(&self, clear: Signals, set: Signals) -> Result<(), Status> {
        match &self.kind {
            DispatcherKind::Event(e) => e.user_signal(clear, set),
            DispatcherKind::EventPair(ep) => ep.user_signal(clear, set),
            _ => Err(Status::NotSupported),
        }
    }

    pub(crate) fn add_handle_ref(&self) {
        self.handle_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_handle_ref(&self) {
        let previous = self.handle_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous != 0, "handle count underflow");
        if previous == 1 {
            self.on_zero_handles();
        }
    }

    /// Type-specific reaction to the last handle going away. Uniform
    /// across dispatcher kinds; there is no out-of-band close path.
    fn on_zero_handles(&self) {
        match &self.kind {
            DispatcherKind::Process(p) => p.all_handles_closed(),
            DispatcherKind::EventPair(ep) => ep.on_zero_handles(),
            DispatcherKind::IoPort(port) => port.on_zero_handles(),
            DispatcherKind::Socket(s) => s.on_zero_handles(),
            _ => {}
        }
    }

    // ── Typed accessors ──────────────────────────────────────────────────

    pub fn as_process(&self) -> Result<&Arc<ProcessDispatcher>, Status> {
        match &self.kind {
            DispatcherKind::Process(p) => Ok(p),
            _ => Err(Status::WrongType),
        }
    }

    pub fn as_thread(&self) -> Result<&ThreadDispatcher, Status> {
        match &self.kind {
            DispatcherKind::Thread(t) => Ok(t),
            _ => Err(Status::WrongType),
        }
    }

    pub fn as_vmo(&self) -> Result<&VmObjectDispatcher, Status> {
        match &self.kind {
            DispatcherKind::VmObject(v) => Ok(v),
            _ => Err(Status::WrongType),
        }
    }

    pub fn as_message_pipe(&self) -> Result<&MessagePipeDispatcher, Status> {
        match &self.kind {
            DispatcherKind::MessagePipe(mp) => Ok(mp),
            _ => Err(Status::WrongType),
        }
    }

    pub fn as_io_port(&self) -> Result<&IoPortDispatcher, Status> {
        match &self.kind {
            DispatcherKind::IoPort(p) => Ok(p),
            _ => Err(Status::WrongType),
        }
    }

    pub fn as_data_producer(&self) -> Result<&DataPipeProducer, Status> {
        match &self.kind {
            DispatcherKind::DataPipeProducer(p) => Ok(p),
            _ => Err(Status::WrongType),
        }
    }

    pub fn as_data_consumer(&self) -> Result<&DataPipeConsumer, Status> {
        match &self.kind {
            DispatcherKind::DataPipeConsumer(c) => Ok(c),
            _ => Err(Status::WrongType),
        }
    }

    pub fn as_socket(&self) -> Result<&SocketDispatcher, Status> {
        match &self.kind {
            DispatcherKind::Socket(s) => Ok(s),
            _ => Err(Status::WrongType),
        }
    }

    pub fn as_wait_set(&self) -> Result<&WaitSetDispatcher, Status> {
        match &self.kind {
            DispatcherKind::WaitSet(ws) => Ok(ws),
            _ => Err(Status::WrongType),
        }
    }

    pub fn as_log(&self) -> Result<&LogDispatcher, Status> {
        match &self.kind {
            DispatcherKind::Log(l) => Ok(l),
            _ => Err(Status::WrongType),
        }
    }

    pub fn as_interrupt(&self) -> Result<&InterruptDispatcher, Status> {
        match &self.kind {
            DispatcherKind::Interrupt(i) => Ok(i),
            _ => Err(Status::WrongType),
        }
    }

    pub fn as_resource(&self) -> Result<&ResourceDispatcher, Status> {
        match &self.kind {
            DispatcherKind::Resource(r) => Ok(r),
            _ => Err(Status::WrongType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn koids_are_monotonic_and_nonzero() {
        let a = generate_koid();
        let b = generate_koid();
        assert!(a != 0 && b > a);
    }
}
