//! Exception ports and fault delivery.
//!
//! An exception port is a message-pipe end plus a key, registered at
//! thread, process or system scope (at most one per scope). The
//! architecture's fault glue synthesizes an [`ExceptionContext`] and calls
//! [`deliver_fault`] on the faulting thread; the core walks the scopes in
//! thread → process → system order, writes the serialized report into the
//! first registered pipe, and blocks the thread until the handler resumes
//! it with `task_resume` or lets it fall through to the next scope.

use alloc::sync::Arc;
use alloc::vec::Vec;

use helion_syscall::data::{
    ExceptionContext, ExceptionReport, PacketHeader, EXCEPTION_TYPE_ARCH, EXCEPTION_TYPE_GONE,
    PKT_TYPE_EXCEPTION,
};
use helion_syscall::{Koid, Status};
use zerocopy::{AsBytes, FromZeroes};

use crate::ipc::message_pipe::MessagePacket;
use crate::object::Dispatcher;
use crate::process::UserThread;
use crate::sync::SpinLock;

pub struct ExceptionPort {
    /// The pipe end the kernel writes reports into; the handler reads
    /// from the peer end.
    pipe: Arc<Dispatcher>,
    key: u64,
}

impl ExceptionPort {
    pub fn create(pipe: Arc<Dispatcher>, key: u64) -> Result<Arc<ExceptionPort>, Status> {
        pipe.as_message_pipe()?;
        Ok(Arc::new(ExceptionPort { pipe, key }))
    }

    /// Serialize and queue one report.
    pub fn send_report(&self, report: &ExceptionReport) -> Result<(), Status> {
        let header = PacketHeader {
            key: self.key,
            packet_type: PKT_TYPE_EXCEPTION,
            extra: 0,
        };
        let mut data = Vec::with_capacity(
            core::mem::size_of::<PacketHeader>() + core::mem::size_of::<ExceptionReport>(),
        );
        data.extend_from_slice(header.as_bytes());
        data.extend_from_slice(report.as_bytes());

        self.pipe
            .as_message_pipe()
            .expect("checked at create")
            .write(MessagePacket::new(data, Vec::new()))
            .map_err(|(_, status)| status)
    }

    /// Gone notification for a process with this port registered. Not
    /// replied to; the send result is ignored because there is nothing
    /// else to do.
    pub fn on_process_exit(&self, pid: Koid) {
        let mut context = ExceptionContext::new_zeroed();
        context.pid = pid;
        let _ = self.send_report(&ExceptionReport::new(EXCEPTION_TYPE_GONE, context));
    }

    /// Gone notification for a thread with this port registered.
    pub fn on_thread_exit(&self, pid: Koid, tid: Koid) {
        let mut context = ExceptionContext::new_zeroed();
        context.pid = pid;
        context.tid = tid;
        let _ = self.send_report(&ExceptionReport::new(EXCEPTION_TYPE_GONE, context));
    }
}

// ── System exception port ────────────────────────────────────────────────────

static SYSTEM_EXCEPTION_PORT: SpinLock<Option<Arc<ExceptionPort>>> = SpinLock::new(None);

pub fn set_system_exception_port(eport: Arc<ExceptionPort>) -> Result<(), Status> {
    let mut slot = SYSTEM_EXCEPTION_PORT.lock();
    if slot.is_some() {
        return Err(Status::BadState);
    }
    *slot = Some(eport);
    Ok(())
}

pub fn reset_system_exception_port() {
    SYSTEM_EXCEPTION_PORT.lock().take();
}

pub fn system_exception_port() -> Option<Arc<ExceptionPort>> {
    SYSTEM_EXCEPTION_PORT.lock().clone()
}

// ── Delivery ─────────────────────────────────────────────────────────────────

/// What the faulting thread should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// A handler accepted the fault; retry the faulting instruction.
    Resumed,
    /// No handler resumed it; the process has been killed and the calling
    /// thread must exit.
    Killed,
}

/// Entry point for the architecture's fault glue, called on the faulting
/// thread. `context.pid`/`context.tid` are filled in here.
pub fn deliver_fault(thread: &Arc<UserThread>, mut context: ExceptionContext) -> FaultOutcome {
    context.pid = thread.process().koid();
    context.tid = thread.koid();
    let report = ExceptionReport::new(EXCEPTION_TYPE_ARCH, context);

    let ports = [
        thread.exception_port(),
        thread.process().exception_port(),
        system_exception_port(),
    ];

    let mut handled = false;
    for eport in ports.into_iter().flatten() {
        handled = true;
        match thread.exception_handler_exchange(&eport, &report) {
            Ok(true) => return FaultOutcome::Resumed,
            Ok(false) => continue,
            Err(_) => continue,
        }
    }

    if !handled {
        log::error!(
            "unhandled fault (subtype {}) in thread '{}' of process '{}' at pc {:#x}",
            report.context.subtype,
            thread.name(),
            thread.process().name(),
            report.context.pc
        );
    }

    thread.process().kill();
    FaultOutcome::Killed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::message_pipe::MessagePipeDispatcher;
    use crate::object::event::EventDispatcher;
    use crate::object::handle::make_handle;
    use crate::process::process::ProcessState;
    use crate::syscall::task;
    use crate::testutil;
    use helion_syscall::data::{
        ExceptionReport, EXC_FATAL_PAGE_FAULT, EXCEPTION_STATUS_NOT_HANDLED,
        EXCEPTION_STATUS_RESUME,
    };
    use helion_syscall::Status;
    use std::sync::atomic::{AtomicU32, Ordering};
    use zerocopy::FromBytes;

    /// Create (but do not start) a child whose program immediately takes a
    /// page fault. Returns the child process and a starter closure, so the
    /// test can bind exception ports before any fault can fire.
    fn create_faulting_child(
        up: &alloc::sync::Arc<crate::process::ProcessDispatcher>,
        base: u64,
        pc: u64,
        outcome: &'static AtomicU32,
    ) -> (
        alloc::sync::Arc<crate::process::ProcessDispatcher>,
        impl FnOnce(),
    ) {
        crate::sched::host::register_program(pc, move |regs| {
            let thread = crate::process::current_thread().unwrap();
            let mut context = ExceptionContext::new_zeroed();
            context.subtype = EXC_FATAL_PAGE_FAULT;
            context.pc = regs.pc;
            context.fault_addr = 0xdead_f000;
            match deliver_fault(&thread, context) {
                FaultOutcome::Resumed => outcome.store(1, Ordering::SeqCst),
                FaultOutcome::Killed => outcome.store(2, Ordering::SeqCst),
            }
        });

        testutil::poke(up, base, b"faulty");
        let proc_hv = task::sys_process_create(up, base, 6, 0).unwrap();
        let thread_hv = task::sys_thread_create(up, proc_hv, base, 6, 0).unwrap();
        let (event, ev_rights) = EventDispatcher::create(0);
        let arg = up.add_handle(make_handle(event, ev_rights).unwrap());

        let (child, _) = up.get_dispatcher(proc_hv).unwrap();
        let child = child.as_process().unwrap().clone();

        let up = up.clone();
        let start = move || {
            task::sys_process_start(&up, proc_hv, thread_hv, pc, 0, arg, 0).unwrap();
        };
        (child, start)
    }

    fn read_exception_packet(reader: &MessagePipeDispatcher) -> (PacketHeader, ExceptionReport) {
        // Poll: delivery happens on the faulting thread.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            match reader.begin_read() {
                Ok(_) => break,
                Err(Status::BadState) => {
                    assert!(std::time::Instant::now() < deadline, "no report arrived");
                    std::thread::yield_now();
                }
                Err(e) => panic!("unexpected read error {e:?}"),
            }
        }
        let msg = reader.accept_read().unwrap();
        let header = PacketHeader::read_from_prefix(&msg.data[..]).unwrap();
        let report = ExceptionReport::read_from_prefix(
            &msg.data[core::mem::size_of::<PacketHeader>()..],
        )
        .unwrap();
        (header, report)
    }

    #[test]
    fn process_port_receives_fault_and_resumes() {
        static OUTCOME: AtomicU32 = AtomicU32::new(0);
        let (up, base) = testutil::new_process_with_mem("exc-launcher", 2);

        let (kernel_end, handler_end, _) = MessagePipeDispatcher::create(0).unwrap();
        let (child, start) = create_faulting_child(&up, base, 0x31_0000, &OUTCOME);

        // Bind before start so the fault cannot race the bind.
        let eport = ExceptionPort::create(kernel_end, 0x5151).unwrap();
        child.set_exception_port(eport).unwrap();
        // A second bind at the same scope is refused until cleared.
        let (k2, _h2, _) = MessagePipeDispatcher::create(0).unwrap();
        let eport2 = ExceptionPort::create(k2, 1).unwrap();
        assert_eq!(child.set_exception_port(eport2), Err(Status::BadState));

        start();

        let reader = handler_end.as_message_pipe().unwrap();
        let (header, report) = read_exception_packet(reader);
        assert_eq!(header.key, 0x5151);
        assert_eq!(header.packet_type, PKT_TYPE_EXCEPTION);
        assert_eq!(report.header.exc_type, EXCEPTION_TYPE_ARCH);
        assert_eq!(report.context.pid, child.koid());
        assert_eq!(report.context.subtype, EXC_FATAL_PAGE_FAULT);
        assert_eq!(report.context.fault_addr, 0xdead_f000);
        let tid = report.context.tid;
        assert_ne!(tid, 0);

        // Resume the thread; the program observes Resumed and finishes.
        let thread = child.lookup_thread_by_koid(tid).unwrap();
        thread
            .mark_exception_handled(EXCEPTION_STATUS_RESUME)
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while OUTCOME.load(Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline);
            std::thread::yield_now();
        }
        assert_eq!(OUTCOME.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unhandled_fault_kills_and_signals_the_process() {
        static OUTCOME: AtomicU32 = AtomicU32::new(0);
        let (up, base) = testutil::new_process_with_mem("exc-kill", 2);

        let (kernel_end, handler_end, _) = MessagePipeDispatcher::create(0).unwrap();
        let (child, start) = create_faulting_child(&up, base, 0x32_0000, &OUTCOME);
        let eport = ExceptionPort::create(kernel_end, 7).unwrap();
        child.set_exception_port(eport).unwrap();
        start();

        let reader = handler_end.as_message_pipe().unwrap();
        let (_, report) = read_exception_packet(reader);
        let thread = child.lookup_thread_by_koid(report.context.tid).unwrap();

        // Decline: no other scope is registered, so the process dies.
        thread
            .mark_exception_handled(EXCEPTION_STATUS_NOT_HANDLED)
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while child.state() != ProcessState::Dead {
            assert!(std::time::Instant::now() < deadline);
            std::thread::yield_now();
        }
        assert_eq!(OUTCOME.load(Ordering::SeqCst), 2);
        assert!(child
            .state_tracker()
            .state()
            .satisfied
            .contains(helion_syscall::signals::SIGNAL_SIGNALED));

        // The registered port also got the process-gone notification.
        let (_, gone) = read_exception_packet(reader);
        assert_eq!(gone.header.exc_type, EXCEPTION_TYPE_GONE);
        assert_eq!(gone.context.pid, child.koid());
    }
}
