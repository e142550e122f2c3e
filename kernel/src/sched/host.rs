//! std-thread implementation of the scheduler contract, test builds only.
//!
//! `std::thread::park`/`unpark` already carry the wake-pending token the
//! contract requires. User programs are looked up in a table keyed by the
//! fake entry PC handed to `thread_start`, so a test "loads a program" by
//! registering a closure under an address of its choosing.

use std::boxed::Box;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use helion_syscall::{Status, Time};

use super::{ParkResult, ThreadHost, ThreadId, UserRegs};

type Program = Arc<dyn Fn(&UserRegs) + Send + Sync>;

pub struct TestHost {
    epoch: Instant,
    next_id: AtomicU64,
    /// host id → std thread handle, for unpark.
    threads: Mutex<HashMap<ThreadId, thread::Thread>>,
    /// std thread id → host id, for current().
    ids: Mutex<HashMap<thread::ThreadId, ThreadId>>,
    programs: Mutex<HashMap<u64, Program>>,
}

impl TestHost {
    fn new() -> Self {
        TestHost {
            epoch: Instant::now(),
            next_id: AtomicU64::new(1),
            threads: Mutex::new(HashMap::new()),
            ids: Mutex::new(HashMap::new()),
            programs: Mutex::new(HashMap::new()),
        }
    }

    fn register_thread(&self, id: ThreadId) {
        self.threads
            .lock()
            .unwrap()
            .insert(id, thread::current());
        self.ids
            .lock()
            .unwrap()
            .insert(thread::current().id(), id);
    }

    fn forget_thread(&self, id: ThreadId) {
        self.threads.lock().unwrap().remove(&id);
        self.ids.lock().unwrap().remove(&thread::current().id());
    }
}

impl ThreadHost for TestHost {
    fn current(&self) -> Option<ThreadId> {
        let std_id = thread::current().id();
        if let Some(id) = self.ids.lock().unwrap().get(&std_id) {
            return Some(*id);
        }
        // A test body calling in from a thread the host did not spawn:
        // adopt it on the fly.
        let id = ThreadId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.register_thread(id);
        Some(id)
    }

    fn spawn(&self, name: &str, main: Box<dyn FnOnce() + Send>) -> Result<ThreadId, Status> {
        let id = ThreadId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (ready_tx, ready_rx) = mpsc::channel();
        let host = global();
        let result = thread::Builder::new().name(name.into()).spawn(move || {
            host.register_thread(id);
            ready_tx.send(()).ok();
            main();
            host.forget_thread(id);
        });
        if result.is_err() {
            return Err(Status::NoResources);
        }
        // Wait until the child can be unparked by id.
        ready_rx.recv().map_err(|_| Status::Internal)?;
        Ok(id)
    }

    fn park(&self, deadline: Option<Time>) -> ParkResult {
        match deadline {
            None => {
                thread::park();
                ParkResult::Woken
            }
            Some(d) => {
                let now = self.now();
                if now >= d {
                    return ParkResult::TimedOut;
                }
                thread::park_timeout(Duration::from_nanos(d - now));
                if self.now() >= d {
                    ParkResult::TimedOut
                } else {
                    ParkResult::Woken
                }
            }
        }
    }

    fn unpark(&self, id: ThreadId) {
        let handle = self.threads.lock().unwrap().get(&id).cloned();
        if let Some(handle) = handle {
            handle.unpark();
        }
    }

    fn now(&self) -> Time {
        self.epoch.elapsed().as_nanos() as Time + 1
    }

    fn yield_now(&self) {
        thread::yield_now();
    }

    fn enter_user(&self, regs: &UserRegs) {
        let program = self.programs.lock().unwrap().get(&regs.pc).cloned();
        match program {
            Some(program) => program(regs),
            None => log::warn!("test host: no program at pc {:#x}", regs.pc),
        }
    }
}

fn global() -> &'static TestHost {
    static HOST: spin::Once<&'static TestHost> = spin::Once::new();
    HOST.call_once(|| Box::leak(Box::new(TestHost::new())))
}

/// Install the test host (idempotent across the test binary).
pub fn install() {
    super::install(global());
}

/// Register a user program under a fake entry PC.
pub fn register_program<F>(pc: u64, program: F)
where
    F: Fn(&UserRegs) + Send + Sync + 'static,
{
    global()
        .programs
        .lock()
        .unwrap()
        .insert(pc, Arc::new(program));
}
