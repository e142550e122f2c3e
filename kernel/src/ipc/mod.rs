//! Inter-process communication objects.
//!
//! Three transports, all built around shared pipe cores with thin
//! per-endpoint dispatchers:
//! - [`message_pipe`]: bidirectional packet channel that carries bytes and
//!   handles
//! - [`data_pipe`]: unidirectional element ring with copy and two-phase
//!   (mapped) transfer paths
//! - [`socket`]: bidirectional byte stream with an out-of-band control
//!   channel

pub mod data_pipe;
pub mod message_pipe;
pub mod socket;
