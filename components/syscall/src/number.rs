//! Helion-OS syscall numbers.

// Block 0-99: handles and generic object operations
pub const SYS_NULL: u32 = 0;
pub const SYS_HANDLE_CLOSE: u32 = 1;
pub const SYS_HANDLE_DUPLICATE: u32 = 2;
pub const SYS_HANDLE_REPLACE: u32 = 3;
pub const SYS_HANDLE_WAIT_ONE: u32 = 4;
pub const SYS_HANDLE_WAIT_MANY: u32 = 5;
pub const SYS_OBJECT_GET_INFO: u32 = 10;
pub const SYS_OBJECT_GET_PROPERTY: u32 = 11;
pub const SYS_OBJECT_SET_PROPERTY: u32 = 12;
pub const SYS_OBJECT_SIGNAL: u32 = 13;
pub const SYS_OBJECT_BIND_EXCEPTION_PORT: u32 = 14;

// Block 100-199: memory
pub const SYS_VMO_CREATE: u32 = 100;
pub const SYS_VMO_READ: u32 = 101;
pub const SYS_VMO_WRITE: u32 = 102;
pub const SYS_VMO_GET_SIZE: u32 = 103;
pub const SYS_VMO_SET_SIZE: u32 = 104;
pub const SYS_VMO_OP_RANGE: u32 = 105;
pub const SYS_PROCESS_MAP_VM: u32 = 110;
pub const SYS_PROCESS_UNMAP_VM: u32 = 111;
pub const SYS_PROCESS_PROTECT_VM: u32 = 112;

// Block 200-299: IPC
pub const SYS_MSGPIPE_CREATE: u32 = 200;
pub const SYS_MSGPIPE_READ: u32 = 201;
pub const SYS_MSGPIPE_WRITE: u32 = 202;
pub const SYS_DATAPIPE_CREATE: u32 = 220;
pub const SYS_DATAPIPE_WRITE: u32 = 221;
pub const SYS_DATAPIPE_READ: u32 = 222;
pub const SYS_DATAPIPE_BEGIN_WRITE: u32 = 223;
pub const SYS_DATAPIPE_END_WRITE: u32 = 224;
pub const SYS_DATAPIPE_BEGIN_READ: u32 = 225;
pub const SYS_DATAPIPE_END_READ: u32 = 226;
pub const SYS_SOCKET_CREATE: u32 = 240;
pub const SYS_SOCKET_WRITE: u32 = 241;
pub const SYS_SOCKET_READ: u32 = 242;
pub const SYS_PORT_CREATE: u32 = 260;
pub const SYS_PORT_QUEUE: u32 = 261;
pub const SYS_PORT_WAIT: u32 = 262;
pub const SYS_PORT_BIND: u32 = 263;
pub const SYS_WAITSET_CREATE: u32 = 280;
pub const SYS_WAITSET_ADD: u32 = 281;
pub const SYS_WAITSET_REMOVE: u32 = 282;
pub const SYS_WAITSET_WAIT: u32 = 283;

// Block 300-399: tasks
pub const SYS_PROCESS_CREATE: u32 = 300;
pub const SYS_PROCESS_START: u32 = 301;
pub const SYS_THREAD_CREATE: u32 = 302;
pub const SYS_THREAD_START: u32 = 303;
pub const SYS_THREAD_EXIT: u32 = 304;
pub const SYS_TASK_KILL: u32 = 305;
pub const SYS_TASK_RESUME: u32 = 306;
pub const SYS_EXIT: u32 = 310;
pub const SYS_FUTEX_WAIT: u32 = 320;
pub const SYS_FUTEX_WAKE: u32 = 321;
pub const SYS_FUTEX_REQUEUE: u32 = 322;

// Block 400-499: events, time, randomness, log
pub const SYS_NANOSLEEP: u32 = 400;
pub const SYS_CURRENT_TIME: u32 = 401;
pub const SYS_CPRNG_DRAW: u32 = 402;
pub const SYS_CPRNG_ADD_ENTROPY: u32 = 403;
pub const SYS_EVENT_CREATE: u32 = 410;
pub const SYS_EVENTPAIR_CREATE: u32 = 411;
pub const SYS_LOG_CREATE: u32 = 420;
pub const SYS_LOG_WRITE: u32 = 421;
pub const SYS_LOG_READ: u32 = 422;
