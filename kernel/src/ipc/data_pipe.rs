//! Data pipes: unidirectional element rings with copy and two-phase
//! transfer paths.
//!
//! The ring is a VM object so the two-phase path can map it directly into
//! the caller's address space; `begin_write`/`begin_read` expose a
//! contiguous subrange at the cursor and `end_*` commits how much was
//! actually produced or consumed (zero releases without advancing).
//!
//! WRITABLE is satisfied while free space ≥ the write threshold; READABLE
//! while available bytes ≥ the read threshold. Thresholds default to one
//! element.

use alloc::sync::Arc;

use helion_syscall::data::MAX_DATA_PIPE_CAPACITY;
use helion_syscall::{Rights, Signals, SignalsState, Status};

use crate::memory::{page_align_up, AddressSpace, VmObject};
use crate::object::state_tracker::StateTracker;
use crate::object::{Dispatcher, DispatcherKind};
use crate::sync::SpinLock;

const PRODUCER_RIGHTS: Rights = Rights::TRANSFER
    .union(Rights::WRITE)
    .union(Rights::GET_PROPERTY)
    .union(Rights::SET_PROPERTY);

const CONSUMER_RIGHTS: Rights = Rights::TRANSFER
    .union(Rights::READ)
    .union(Rights::GET_PROPERTY)
    .union(Rights::SET_PROPERTY);

/// Options for the copy-mode consumer read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub all_or_none: bool,
    /// Consume without copying out.
    pub discard: bool,
    /// Copy without consuming.
    pub peek: bool,
}

struct EndPoint {
    alive: bool,
    cursor: usize,
    /// Nonzero while a two-phase transaction is outstanding.
    expected: usize,
    aspace: Option<Arc<AddressSpace>>,
    vad_base: u64,
}

impl EndPoint {
    fn new() -> Self {
        EndPoint {
            alive: true,
            cursor: 0,
            expected: 0,
            aspace: None,
            vad_base: 0,
        }
    }

    fn unmap(&mut self) {
        if let Some(aspace) = self.aspace.take() {
            let _ = aspace.unmap(self.vad_base, 0);
            self.vad_base = 0;
        }
    }
}

struct Ring {
    vmo: Arc<VmObject>,
    free: usize,
    producer: EndPoint,
    consumer: EndPoint,
    write_threshold: usize,
    read_threshold: usize,
}

pub struct DataPipe {
    element_size: usize,
    capacity: usize,
    producer_tracker: StateTracker,
    consumer_tracker: StateTracker,
    ring: SpinLock<Ring>,
}

impl DataPipe {
    pub fn create(
        element_size: usize,
        capacity: usize,
    ) -> Result<(Arc<Dispatcher>, Arc<Dispatcher>, Rights, Rights), Status> {
        if element_size == 0 || capacity == 0 || capacity % element_size != 0 {
            return Err(Status::InvalidArgs);
        }
        if capacity > MAX_DATA_PIPE_CAPACITY {
            return Err(Status::NoMemory);
        }
        let vmo = VmObject::create(page_align_up(capacity as u64))?;
        let pipe = Arc::new(DataPipe {
            element_size,
            capacity,
            producer_tracker: StateTracker::new(
                true,
                SignalsState::new(
                    Signals::WRITABLE,
                    Signals::WRITABLE | Signals::PEER_CLOSED,
                ),
            ),
            consumer_tracker: StateTracker::new(
                true,
                SignalsState::new(
                    Signals::empty(),
                    Signals::READABLE | Signals::PEER_CLOSED,
                ),
            ),
            ring: SpinLock::new(Ring {
                vmo,
                free: capacity,
                producer: EndPoint::new(),
                consumer: EndPoint::new(),
                write_threshold: 0,
                read_threshold: 0,
            }),
        });
        let producer = Dispatcher::new(DispatcherKind::DataPipeProducer(DataPipeProducer {
            pipe: pipe.clone(),
        }));
        let consumer = Dispatcher::new(DispatcherKind::DataPipeConsumer(DataPipeConsumer {
            pipe,
        }));
        Ok((producer, consumer, PRODUCER_RIGHTS, CONSUMER_RIGHTS))
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    fn write_threshold(&self, ring: &Ring) -> usize {
        if ring.write_threshold == 0 {
            self.element_size
        } else {
            ring.write_threshold
        }
    }

    fn read_threshold(&self, ring: &Ring) -> usize {
        if ring.read_threshold == 0 {
            self.element_size
        } else {
            ring.read_threshold
        }
    }

    fn update_signals(&self, ring: &Ring) {
        if ring.producer.alive && ring.consumer.alive {
            if ring.free >= self.write_threshold(ring) {
                self.producer_tracker
                    .update_satisfied(Signals::empty(), Signals::WRITABLE);
            } else {
                self.producer_tracker
                    .update_satisfied(Signals::WRITABLE, Signals::empty());
            }
        }
        if ring.consumer.alive {
            let available = self.capacity - ring.free;
            if available >= self.read_threshold(ring) {
                self.consumer_tracker
                    .update_satisfied(Signals::empty(), Signals::READABLE);
            } else {
                self.consumer_tracker
                    .update_satisfied(Signals::READABLE, Signals::empty());
            }
        }
    }

    fn contiguous_free(&self, ring: &Ring) -> usize {
        debug_assert!(ring.free > 0);
        if ring.producer.cursor >= ring.consumer.cursor {
            (self.capacity - ring.producer.cursor).min(ring.free)
        } else {
            ring.consumer.cursor - ring.producer.cursor
        }
    }

    fn contiguous_available(&self, ring: &Ring) -> usize {
        debug_assert!(ring.free < self.capacity);
        let available = self.capacity - ring.free;
        if ring.producer.cursor > ring.consumer.cursor {
            ring.producer.cursor - ring.consumer.cursor
        } else {
            (self.capacity - ring.consumer.cursor).min(available)
        }
    }

    // ── Producer side ────────────────────────────────────────────────────

    fn producer_write(&self, buf: &[u8], all_or_none: bool) -> Result<usize, Status> {
        if buf.is_empty() || buf.len() % self.element_size != 0 {
            return Err(Status::InvalidArgs);
        }
        let mut ring = self.ring.lock();
        if ring.producer.expected != 0 {
            return Err(Status::Busy);
        }
        if !ring.consumer.alive {
            return Err(Status::ChannelClosed);
        }
        if ring.free == 0 {
            return Err(Status::ShouldWait);
        }
        let n = buf.len().min(ring.free);
        if all_or_none && n < buf.len() {
            return Err(Status::ShouldWait);
        }

        // At most two chunks: cursor→end, then start→rest.
        let first = (self.capacity - ring.producer.cursor).min(n);
        let cursor = ring.producer.cursor as u64;
        ring.vmo.write(&buf[..first], cursor)?;
        if n > first {
            ring.vmo.write(&buf[first..n], 0)?;
        }

        ring.free -= n;
        ring.producer.cursor = (ring.producer.cursor + n) % self.capacity;
        self.update_signals(&ring);
        Ok(n)
    }

    fn producer_begin_write(
        &self,
        aspace: &Arc<AddressSpace>,
    ) -> Result<(u64, usize), Status> {
        let mut ring = self.ring.lock();
        if ring.producer.expected != 0 {
            return Err(Status::Busy);
        }
        if !ring.consumer.alive {
            return Err(Status::ChannelClosed);
        }
        if ring.free == 0 {
            return Err(Status::ShouldWait);
        }
        self.map_endpoint(&mut ring, /*producer=*/ true, aspace)?;

        let avail = self.contiguous_free(&ring);
        ring.producer.expected = avail;
        Ok((ring.producer.vad_base + ring.producer.cursor as u64, avail))
    }

    fn producer_end_write(&self, written: usize) -> Result<(), Status> {
        let mut ring = self.ring.lock();
        if ring.producer.expected == 0 {
            return Err(Status::BadState);
        }
        if written > ring.producer.expected || written % self.element_size != 0 {
            return Err(Status::InvalidArgs);
        }
        ring.free -= written;
        ring.producer.cursor = (ring.producer.cursor + written) % self.capacity;
        ring.producer.expected = 0;
        self.update_signals(&ring);
        Ok(())
    }

    // ── Consumer side ────────────────────────────────────────────────────

    fn consumer_read(&self, buf: &mut [u8], opts: ReadOptions) -> Result<usize, Status> {
        let wanted = buf.len();
        if wanted == 0 || wanted % self.element_size != 0 {
            return Err(Status::InvalidArgs);
        }
        let mut ring = self.ring.lock();
        if ring.consumer.expected != 0 {
            return Err(Status::Busy);
        }
        let available = self.capacity - ring.free;
        if available == 0 {
            return Err(if ring.producer.alive {
                Status::ShouldWait
            } else {
                Status::ChannelClosed
            });
        }
        let n = wanted.min(available);
        if opts.all_or_none && n < wanted {
            return Err(Status::ShouldWait);
        }

        if !opts.discard {
            let first = (self.capacity - ring.consumer.cursor).min(n);
            let cursor = ring.consumer.cursor as u64;
            ring.vmo.read(&mut buf[..first], cursor)?;
            if n > first {
                ring.vmo.read(&mut buf[first..n], 0)?;
            }
        }
        if !opts.peek {
            ring.free += n;
            ring.consumer.cursor = (ring.consumer.cursor + n) % self.capacity;
        }
        self.update_signals(&ring);
        Ok(n)
    }

    fn consumer_query(&self) -> usize {
        let ring = self.ring.lock();
        self.capacity - ring.free
    }

    fn consumer_begin_read(&self, aspace: &Arc<AddressSpace>) -> Result<(u64, usize), Status> {
        let mut ring = self.ring.lock();
        if ring.consumer.expected != 0 {
            return Err(Status::Busy);
        }
        if self.capacity - ring.free == 0 {
            return Err(if ring.producer.alive {
                Status::ShouldWait
            } else {
                Status::ChannelClosed
            });
        }
        self.map_endpoint(&mut ring, /*producer=*/ false, aspace)?;

        let avail = self.contiguous_available(&ring);
        ring.consumer.expected = avail;
        Ok((ring.consumer.vad_base + ring.consumer.cursor as u64, avail))
    }

    fn consumer_end_read(&self, read: usize) -> Result<(), Status> {
        let mut ring = self.ring.lock();
        if ring.consumer.expected == 0 {
            return Err(Status::BadState);
        }
        if read > ring.consumer.expected || read % self.element_size != 0 {
            return Err(Status::InvalidArgs);
        }
        ring.free += read;
        ring.consumer.cursor = (ring.consumer.cursor + read) % self.capacity;
        ring.consumer.expected = 0;
        self.update_signals(&ring);
        Ok(())
    }

    // ── Thresholds ───────────────────────────────────────────────────────

    fn get_write_threshold(&self) -> usize {
        let ring = self.ring.lock();
        self.write_threshold(&ring)
    }

    fn set_write_threshold(&self, threshold: usize) -> Result<(), Status> {
        if threshold % self.element_size != 0 || threshold > self.capacity {
            return Err(Status::InvalidArgs);
        }
        let mut ring = self.ring.lock();
        ring.write_threshold = threshold;
        self.update_signals(&ring);
        Ok(())
    }

    fn get_read_threshold(&self) -> usize {
        let ring = self.ring.lock();
        self.read_threshold(&ring)
    }

    fn set_read_threshold(&self, threshold: usize) -> Result<(), Status> {
        if threshold % self.element_size != 0 || threshold > self.capacity {
            return Err(Status::InvalidArgs);
        }
        let mut ring = self.ring.lock();
        ring.read_threshold = threshold;
        self.update_signals(&ring);
        Ok(())
    }

    /// Map the whole ring into `aspace` for the given endpoint if not
    /// already mapped there. A transferred endpoint remaps on next use.
    fn map_endpoint(
        &self,
        ring: &mut Ring,
        producer: bool,
        aspace: &Arc<AddressSpace>,
    ) -> Result<(), Status> {
        use helion_syscall::data::VmFlags;

        let vmo = ring.vmo.clone();
        let ep = if producer {
            &mut ring.producer
        } else {
            &mut ring.consumer
        };
        if let Some(current) = &ep.aspace {
            if Arc::ptr_eq(current, aspace) {
                return Ok(());
            }
            ep.unmap();
        }
        let prot = if producer {
            VmFlags::PERM_READ | VmFlags::PERM_WRITE
        } else {
            VmFlags::PERM_READ
        };
        let base = aspace.map(vmo, 0, page_align_up(self.capacity as u64), 0, prot)?;
        ep.aspace = Some(aspace.clone());
        ep.vad_base = base;
        Ok(())
    }

    fn on_producer_destruction(&self) {
        let mut ring = self.ring.lock();
        ring.producer.alive = false;
        ring.producer.unmap();
        if ring.consumer.alive {
            let empty = ring.free == self.capacity;
            let satisfiable_clear = if empty {
                Signals::READABLE
            } else {
                Signals::empty()
            };
            self.consumer_tracker.update_state(
                Signals::empty(),
                Signals::PEER_CLOSED,
                satisfiable_clear,
                Signals::empty(),
            );
        }
    }

    fn on_consumer_destruction(&self) {
        let mut ring = self.ring.lock();
        ring.consumer.alive = false;
        ring.consumer.unmap();
        if ring.producer.alive {
            self.producer_tracker.update_state(
                Signals::WRITABLE,
                Signals::PEER_CLOSED,
                Signals::WRITABLE,
                Signals::empty(),
            );
        }
    }
}

/// Producer endpoint dispatcher.
pub struct DataPipeProducer {
    pipe: Arc<DataPipe>,
}

impl DataPipeProducer {
    pub fn state_tracker(&self) -> &StateTracker {
        &self.pipe.producer_tracker
    }

    pub fn element_size(&self) -> usize {
        self.pipe.element_size
    }

    pub fn write(&self, buf: &[u8], all_or_none: bool) -> Result<usize, Status> {
        self.pipe.producer_write(buf, all_or_none)
    }

    pub fn begin_write(&self, aspace: &Arc<AddressSpace>) -> Result<(u64, usize), Status> {
        self.pipe.producer_begin_write(aspace)
    }

    pub fn end_write(&self, written: usize) -> Result<(), Status> {
        self.pipe.producer_end_write(written)
    }

    pub fn write_threshold(&self) -> usize {
        self.pipe.get_write_threshold()
    }

    pub fn set_write_threshold(&self, threshold: usize) -> Result<(), Status> {
        self.pipe.set_write_threshold(threshold)
    }
}

impl Drop for DataPipeProducer {
    fn drop(&mut self) {
        self.pipe.on_producer_destruction();
    }
}

/// Consumer endpoint dispatcher.
pub struct DataPipeConsumer {
    pipe: Arc<DataPipe>,
}

impl DataPipeConsumer {
    pub fn state_tracker(&self) -> &StateTracker {
        &self.pipe.consumer_tracker
    }

    pub fn element_size(&self) -> usize {
        self.pipe.element_size
    }

    pub fn read(&self, buf: &mut [u8], opts: ReadOptions) -> Result<usize, Status> {
        self.pipe.consumer_read(buf, opts)
    }

    pub fn query(&self) -> usize {
        self.pipe.consumer_query()
    }

    pub fn begin_read(&self, aspace: &Arc<AddressSpace>) -> Result<(u64, usize), Status> {
        self.pipe.consumer_begin_read(aspace)
    }

    pub fn end_read(&self, read: usize) -> Result<(), Status> {
        self.pipe.consumer_end_read(read)
    }

    pub fn read_threshold(&self) -> usize {
        self.pipe.get_read_threshold()
    }

    pub fn set_read_threshold(&self, threshold: usize) -> Result<(), Status> {
        self.pipe.set_read_threshold(threshold)
    }
}

impl Drop for DataPipeConsumer {
    fn drop(&mut self) {
        self.pipe.on_consumer_destruction();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() {
        crate::sched::host::install();
        crate::cprng::init(b"datapipe-tests");
        crate::object::init();
    }

    fn byte_pipe(capacity: usize) -> (Arc<Dispatcher>, Arc<Dispatcher>) {
        let (p, c, _, _) = DataPipe::create(1, capacity).unwrap();
        (p, c)
    }

    #[test]
    fn copy_path_roundtrip_with_wraparound() {
        setup();
        let (p, c) = byte_pipe(8);
        let producer = p.as_data_producer().unwrap();
        let consumer = c.as_data_consumer().unwrap();

        assert_eq!(producer.write(b"abcdef", false).unwrap(), 6);
        let mut buf = [0u8; 4];
        assert_eq!(consumer.read(&mut buf, ReadOptions::default()).unwrap(), 4);
        assert_eq!(&buf, b"abcd");

        // Wraps: 2 left in ring, room for 6.
        assert_eq!(producer.write(b"ghijkl", false).unwrap(), 6);
        let mut buf = [0u8; 8];
        assert_eq!(consumer.read(&mut buf, ReadOptions::default()).unwrap(), 8);
        assert_eq!(&buf, b"efghijkl");
    }

    #[test]
    fn all_or_none_and_backpressure() {
        setup();
        let (p, c) = byte_pipe(4);
        let producer = p.as_data_producer().unwrap();
        let consumer = c.as_data_consumer().unwrap();

        assert_eq!(producer.write(&[1; 6], true).unwrap_err(), Status::ShouldWait);
        assert_eq!(producer.write(&[1; 4], true).unwrap(), 4);
        assert_eq!(producer.write(&[1; 1], false).unwrap_err(), Status::ShouldWait);

        let mut buf = [0u8; 8];
        assert_eq!(
            consumer
                .read(&mut buf, ReadOptions { all_or_none: true, ..Default::default() })
                .unwrap_err(),
            Status::ShouldWait
        );
        assert_eq!(consumer.read(&mut buf[..4], ReadOptions::default()).unwrap(), 4);
    }

    #[test]
    fn peek_discard_query() {
        setup();
        let (p, c) = byte_pipe(16);
        let producer = p.as_data_producer().unwrap();
        let consumer = c.as_data_consumer().unwrap();
        producer.write(b"watermelon", false).unwrap();
        assert_eq!(consumer.query(), 10);

        let mut buf = [0u8; 5];
        consumer
            .read(&mut buf, ReadOptions { peek: true, ..Default::default() })
            .unwrap();
        assert_eq!(&buf, b"water");
        assert_eq!(consumer.query(), 10);

        consumer
            .read(&mut [0u8; 5], ReadOptions { discard: true, ..Default::default() })
            .unwrap();
        assert_eq!(consumer.query(), 5);
        let mut buf = [0u8; 5];
        consumer.read(&mut buf, ReadOptions::default()).unwrap();
        assert_eq!(&buf, b"melon");
    }

    #[test]
    fn two_phase_write_then_read() {
        setup();
        let aspace = AddressSpace::new();
        let (p, c) = byte_pipe(4096);
        let producer = p.as_data_producer().unwrap();
        let consumer = c.as_data_consumer().unwrap();

        let (addr, avail) = producer.begin_write(&aspace).unwrap();
        assert_eq!(avail, 4096);
        // A second begin while one is pending is busy.
        assert_eq!(producer.begin_write(&aspace).unwrap_err(), Status::Busy);
        aspace.write_user(addr, b"direct").unwrap();
        producer.end_write(6).unwrap();

        let (raddr, ravail) = consumer.begin_read(&aspace).unwrap();
        assert_eq!(ravail, 6);
        let mut buf = [0u8; 6];
        aspace.read_user(raddr, &mut buf).unwrap();
        assert_eq!(&buf, b"direct");
        consumer.end_read(6).unwrap();
        assert_eq!(consumer.query(), 0);

        // end without begin is a state error.
        assert_eq!(consumer.end_read(0), Err(Status::BadState));
    }

    #[test]
    fn element_granularity_is_enforced() {
        setup();
        let (p, c, _, _) = DataPipe::create(4, 16).unwrap();
        let producer = p.as_data_producer().unwrap();
        let consumer = c.as_data_consumer().unwrap();
        assert_eq!(producer.write(&[0; 6], false).unwrap_err(), Status::InvalidArgs);
        assert_eq!(producer.write(&[7; 8], false).unwrap(), 8);
        let mut buf = [0u8; 6];
        assert_eq!(
            consumer.read(&mut buf, ReadOptions::default()).unwrap_err(),
            Status::InvalidArgs
        );
        assert!(matches!(DataPipe::create(4, 10), Err(Status::InvalidArgs)));
    }

    #[test]
    fn threshold_signals() {
        setup();
        let (p, c) = byte_pipe(8);
        let producer = p.as_data_producer().unwrap();
        let consumer = c.as_data_consumer().unwrap();

        consumer.set_read_threshold(4).unwrap();
        producer.write(&[1; 2], false).unwrap();
        assert!(!c
            .state_tracker()
            .unwrap()
            .state()
            .satisfied
            .contains(Signals::READABLE));
        producer.write(&[1; 2], false).unwrap();
        assert!(c
            .state_tracker()
            .unwrap()
            .state()
            .satisfied
            .contains(Signals::READABLE));

        // Write threshold: free is 4 now; requiring 8 free clears WRITABLE.
        producer.set_write_threshold(8).unwrap();
        assert!(!p
            .state_tracker()
            .unwrap()
            .state()
            .satisfied
            .contains(Signals::WRITABLE));
    }

    #[test]
    fn peer_close_signalling() {
        setup();
        let (p, c) = byte_pipe(8);
        p.as_data_producer().unwrap().write(b"left", false).unwrap();
        drop(p);

        let cs = c.state_tracker().unwrap().state();
        assert!(cs.satisfied.contains(Signals::PEER_CLOSED));
        // Buffer still drains.
        assert!(cs.satisfiable.contains(Signals::READABLE));
        let consumer = c.as_data_consumer().unwrap();
        let mut buf = [0u8; 4];
        consumer.read(&mut buf, ReadOptions::default()).unwrap();
        assert_eq!(&buf, b"left");
        assert_eq!(
            consumer.read(&mut buf, ReadOptions::default()).unwrap_err(),
            Status::ChannelClosed
        );
    }
}
