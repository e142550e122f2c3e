//! Wire records and limits shared between kernel and userspace.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::{Koid, Time};

// ── Kernel object types ──────────────────────────────────────────────────────

/// Dispatcher type tags. The driver-facing tags (IoMapping, PciDevice,
/// PciInterrupt) are reserved for the driver layer and carry no core
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive)]
#[repr(u32)]
pub enum ObjectType {
    None = 0,
    Process = 1,
    Thread = 2,
    VmObject = 3,
    MessagePipe = 4,
    Event = 5,
    IoPort = 6,
    DataPipeProducer = 7,
    DataPipeConsumer = 8,
    Interrupt = 9,
    IoMapping = 10,
    PciDevice = 11,
    PciInterrupt = 12,
    Log = 13,
    WaitSet = 14,
    Socket = 15,
    Resource = 16,
    EventPair = 17,
}

// ── Size and count limits ────────────────────────────────────────────────────

/// Maximum payload of a single message-pipe message.
pub const MAX_MESSAGE_SIZE: usize = 65536;
/// Maximum handles attached to a single message.
pub const MAX_MESSAGE_HANDLES: usize = 1024;
/// Maximum handle count accepted by `handle_wait_many`.
pub const MAX_WAIT_HANDLE_COUNT: usize = 256;
/// Maximum data-pipe capacity in bytes.
pub const MAX_DATA_PIPE_CAPACITY: usize = 256 * 1024 * 1024;
/// Maximum size of an I/O-port packet, header included.
pub const PORT_MAX_PKT_SIZE: usize = 128;
/// Per-call cap on `cprng_draw`.
pub const CPRNG_DRAW_MAX_LEN: usize = 256;
/// Per-call cap on `cprng_add_entropy`.
pub const CPRNG_ADD_ENTROPY_MAX_LEN: usize = 256;

// ── Flags ────────────────────────────────────────────────────────────────────

/// `msgpipe_create` flag: the second endpoint is a reply pipe. Writes on a
/// reply pipe must transfer the pipe's own other end, placed last.
pub const MSGPIPE_FLAG_REPLY_PIPE: u32 = 1 << 0;

bitflags::bitflags! {
    /// Flags for `process_map_vm` and `process_protect_vm`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmFlags: u32 {
        const FIXED        = 1 << 0;
        const PERM_READ    = 1 << 1;
        const PERM_WRITE   = 1 << 2;
        const PERM_EXECUTE = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Flags for `datapipe_read`. DISCARD, QUERY and PEEK are mutually
    /// exclusive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataPipeReadFlags: u32 {
        const ALL_OR_NONE = 1 << 0;
        const DISCARD     = 1 << 1;
        const QUERY       = 1 << 2;
        const PEEK        = 1 << 3;
    }
}

/// Flag for `datapipe_write`.
pub const DATAPIPE_WRITE_FLAG_ALL_OR_NONE: u32 = 1 << 0;

/// `socket_write`/`socket_read` flag selecting the out-of-band channel.
pub const SOCKET_CONTROL: u32 = 1 << 0;
/// Capacity of the out-of-band channel.
pub const SOCKET_CONTROL_MAX_LEN: usize = 1024;

// ── Object properties ────────────────────────────────────────────────────────

pub const PROP_BAD_HANDLE_POLICY: u32 = 1;
pub const PROP_DATAPIPE_WRITE_THRESHOLD: u32 = 2;
pub const PROP_DATAPIPE_READ_THRESHOLD: u32 = 3;

pub const POLICY_BAD_HANDLE_IGNORE: u32 = 0;
pub const POLICY_BAD_HANDLE_LOG: u32 = 1;
pub const POLICY_BAD_HANDLE_EXIT: u32 = 2;

// ── object_get_info ──────────────────────────────────────────────────────────

pub const INFO_TOPIC_HANDLE_VALID: u32 = 1;
pub const INFO_TOPIC_HANDLE_BASIC: u32 = 2;
pub const INFO_TOPIC_PROCESS: u32 = 3;

/// Object property bit reported in `HandleBasicRecord::props`.
pub const OBJ_PROP_WAITABLE: u32 = 1;

/// Common header for every `object_get_info` reply.
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct InfoHeader {
    pub topic: u32,
    pub avail_topic_size: u16,
    pub topic_size: u16,
    pub avail_count: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct HandleBasicRecord {
    pub koid: Koid,
    pub rights: u32,
    pub obj_type: u32,
    pub props: u32,
    pub reserved: u32,
}

#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct ProcessRecord {
    pub return_code: i32,
}

// ── I/O port packets ─────────────────────────────────────────────────────────

pub const PKT_TYPE_KERN: u32 = 0;
pub const PKT_TYPE_IOSN: u32 = 1;
pub const PKT_TYPE_USER: u32 = 2;
pub const PKT_TYPE_EXCEPTION: u32 = 3;

#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct PacketHeader {
    pub key: u64,
    pub packet_type: u32,
    pub extra: u32,
}

/// Packet queued automatically when a bound signal edge fires.
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct IoPacket {
    pub hdr: PacketHeader,
    pub timestamp: Time,
    pub bytes: u64,
    pub signals: u32,
    pub reserved: u32,
}

// ── Wait sets ────────────────────────────────────────────────────────────────

/// One result record produced by `waitset_wait`.
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct WaitSetResult {
    pub cookie: u64,
    pub wait_result: i32,
    pub reserved: u32,
    pub satisfied: u32,
    pub satisfiable: u32,
}

// ── Exception reports ────────────────────────────────────────────────────────

pub const EXCEPTION_TYPE_ARCH: u32 = 0;
pub const EXCEPTION_TYPE_START: u32 = 1;
pub const EXCEPTION_TYPE_GONE: u32 = 2;

pub const ARCH_ID_UNKNOWN: u32 = 0;
pub const ARCH_ID_X86_64: u32 = 1;
pub const ARCH_ID_ARM_64: u32 = 2;

pub const EXC_FATAL_PAGE_FAULT: u32 = 0;
pub const EXC_UNDEFINED_INSTRUCTION: u32 = 1;
pub const EXC_GENERAL: u32 = 2;

/// Fixed-size architectural register snapshot. Large enough for the general
/// register file of the supported architectures; unused tail slots are zero.
pub const EXC_REGISTER_COUNT: usize = 34;

#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct ExceptionHeader {
    /// Size of the whole report in bytes, this header included.
    pub size: u32,
    pub exc_type: u32,
}

#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct ExceptionContext {
    pub arch_id: u32,
    pub subtype: u32,
    pub pid: Koid,
    /// Zero in process-gone reports.
    pub tid: Koid,
    pub pc: u64,
    /// Fault address; zero unless the subtype is a page fault.
    pub fault_addr: u64,
    pub regs: [u64; EXC_REGISTER_COUNT],
}

#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct ExceptionReport {
    pub header: ExceptionHeader,
    pub context: ExceptionContext,
}

impl ExceptionReport {
    pub fn new(exc_type: u32, context: ExceptionContext) -> Self {
        ExceptionReport {
            header: ExceptionHeader {
                size: core::mem::size_of::<ExceptionReport>() as u32,
                exc_type,
            },
            context,
        }
    }
}

/// Status written back by the handler via `task_resume`.
pub const EXCEPTION_STATUS_HANDLER_GONE: i32 = -2;
pub const EXCEPTION_STATUS_WAITING: i32 = -1;
pub const EXCEPTION_STATUS_NOT_HANDLED: i32 = 0;
pub const EXCEPTION_STATUS_RESUME: i32 = 1;

/// `task_resume` option bits.
pub const RESUME_EXCEPTION: u32 = 1;
pub const RESUME_NOT_HANDLED: u32 = 2;

// ── Log records ──────────────────────────────────────────────────────────────

pub const LOG_RECORD_MAX: usize = 256;

pub const LOG_FLAG_KERNEL: u32 = 0x0100;
pub const LOG_FLAG_READABLE: u32 = 0x4000_0000;
pub const LOG_FLAG_WAIT: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct LogRecordHeader {
    pub reserved: u32,
    pub datalen: u16,
    pub flags: u16,
    pub timestamp: Time,
}
