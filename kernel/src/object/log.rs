//! The kernel debug log and its dispatcher.
//!
//! A single global ring of timestamped records. Writers append; each
//! readable log handle carries its own cursor, skipping forward when the
//! ring has overwritten records it never saw.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use helion_syscall::data::{
    LogRecordHeader, LOG_FLAG_KERNEL, LOG_FLAG_READABLE, LOG_RECORD_MAX,
};
use helion_syscall::{Rights, Status};
use zerocopy::AsBytes;

use crate::object::{Dispatcher, DispatcherKind};
use crate::sync::{SpinLock, WaitQueue};

const DEFAULT_LOG_RIGHTS: Rights = Rights::TRANSFER
    .union(Rights::WRITE)
    .union(Rights::DUPLICATE);

const KLOG_CAPACITY: usize = 1024;
const MAX_DATA_LEN: usize = LOG_RECORD_MAX - core::mem::size_of::<LogRecordHeader>();

struct KlogRecord {
    seq: u64,
    timestamp: u64,
    flags: u16,
    data: Vec<u8>,
}

struct Klog {
    records: VecDeque<KlogRecord>,
    next_seq: u64,
}

static KLOG: SpinLock<Klog> = SpinLock::new(Klog {
    records: VecDeque::new(),
    next_seq: 0,
});
static KLOG_READERS: WaitQueue = WaitQueue::new();

/// Append a record to the global ring.
pub fn klog_write(flags: u32, data: &[u8]) -> Result<(), Status> {
    if data.len() > MAX_DATA_LEN {
        return Err(Status::OutOfRange);
    }
    {
        let mut klog = KLOG.lock();
        let seq = klog.next_seq;
        klog.next_seq += 1;
        if klog.records.len() == KLOG_CAPACITY {
            klog.records.pop_front();
        }
        klog.records.push_back(KlogRecord {
            seq,
            timestamp: crate::sched::now(),
            flags: flags as u16,
            data: data.into(),
        });
    }
    KLOG_READERS.wake_all();
    Ok(())
}

/// Kernel-side logging path used by the `log` facade backend. Truncates
/// instead of failing; losing a tail beats losing the record.
pub fn klog_write_kernel(data: &[u8]) {
    let n = data.len().min(MAX_DATA_LEN);
    let _ = klog_write(LOG_FLAG_KERNEL, &data[..n]);
}

pub struct LogDispatcher {
    flags: u32,
    /// Next sequence number this reader wants; meaningful only with
    /// LOG_FLAG_READABLE.
    cursor: SpinLock<u64>,
}

impl LogDispatcher {
    pub fn create(flags: u32) -> (Arc<Dispatcher>, Rights) {
        let rights = if flags & LOG_FLAG_READABLE != 0 {
            DEFAULT_LOG_RIGHTS | Rights::READ
        } else {
            DEFAULT_LOG_RIGHTS
        };
        let log = LogDispatcher {
            flags,
            cursor: SpinLock::new(0),
        };
        (Dispatcher::new(DispatcherKind::Log(log)), rights)
    }

    pub fn write(&self, data: &[u8], _flags: u32) -> Result<(), Status> {
        klog_write(self.flags, data)
    }

    /// Pop the next unseen record as `LogRecordHeader` + payload bytes.
    /// `ShouldWait` when nothing new is available; the syscall layer
    /// blocks on [`wait_readable`] for LOG_FLAG_WAIT reads.
    pub fn read(&self, max: usize) -> Result<Vec<u8>, Status> {
        if self.flags & LOG_FLAG_READABLE == 0 {
            return Err(Status::BadState);
        }
        let mut cursor = self.cursor.lock();
        let klog = KLOG.lock();

        let record = klog.records.iter().find(|r| r.seq >= *cursor);
        let Some(record) = record else {
            return Err(Status::ShouldWait);
        };

        let header = LogRecordHeader {
            reserved: 0,
            datalen: record.data.len() as u16,
            flags: record.flags,
            timestamp: record.timestamp,
        };
        let total = core::mem::size_of::<LogRecordHeader>() + record.data.len();
        if max < total {
            return Err(Status::BufferTooSmall);
        }

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&record.data);
        *cursor = record.seq + 1;
        Ok(out)
    }

    /// Block until a record at or past this reader's cursor exists.
    pub fn wait_readable(&self) -> Result<(), Status> {
        KLOG_READERS.wait_until(|| {
            let cursor = *self.cursor.lock();
            let klog = KLOG.lock();
            klog.records.iter().any(|r| r.seq >= cursor).then_some(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() {
        crate::sched::host::install();
        crate::cprng::init(b"log-tests");
        crate::object::init();
    }

    #[test]
    fn reader_cursor_walks_records() {
        setup();
        let (d, _) = LogDispatcher::create(LOG_FLAG_READABLE);
        let log = d.as_log().unwrap();
        klog_write(0, b"first").unwrap();
        klog_write(0, b"second").unwrap();

        // Drain everything visible to this reader; both our records must
        // come out, in write order, regardless of other ring traffic.
        let mut ours = Vec::new();
        while let Ok(rec) = log.read(LOG_RECORD_MAX) {
            if rec.ends_with(b"first") || rec.ends_with(b"second") {
                ours.push(rec);
            }
            assert!(ours.len() <= KLOG_CAPACITY);
        }
        assert!(ours.len() >= 2);
        assert!(ours[0].ends_with(b"first"));
        assert!(ours[1].ends_with(b"second"));
    }

    #[test]
    fn write_only_log_cannot_read() {
        setup();
        let (d, rights) = LogDispatcher::create(0);
        assert!(!rights.contains(Rights::READ));
        assert_eq!(d.as_log().unwrap().read(256), Err(Status::BadState));
    }

    #[test]
    fn oversize_records_are_rejected() {
        setup();
        let big = [0u8; LOG_RECORD_MAX + 1];
        assert_eq!(klog_write(0, &big), Err(Status::OutOfRange));
    }
}
