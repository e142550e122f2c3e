//! Resource dispatcher: the capability gating privileged syscalls.
//!
//! Currently a single kernel-scope token handed to the root process at
//! boot; finer-grained resources hang off it later.

use alloc::sync::Arc;

use helion_syscall::{Rights, Status};

use crate::object::{Dispatcher, DispatcherKind};

const DEFAULT_RESOURCE_RIGHTS: Rights = Rights::READ
    .union(Rights::DUPLICATE)
    .union(Rights::TRANSFER);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Kernel,
}

pub struct ResourceDispatcher {
    kind: ResourceKind,
}

impl ResourceDispatcher {
    pub fn create() -> (Arc<Dispatcher>, Rights) {
        let resource = ResourceDispatcher {
            kind: ResourceKind::Kernel,
        };
        (
            Dispatcher::new(DispatcherKind::Resource(resource)),
            DEFAULT_RESOURCE_RIGHTS,
        )
    }

    pub fn resource_kind(&self) -> ResourceKind {
        self.kind
    }

    /// Gate for privileged operations.
    pub fn validate(&self, wanted: ResourceKind) -> Result<(), Status> {
        if self.kind == wanted {
            Ok(())
        } else {
            Err(Status::AccessDenied)
        }
    }
}
