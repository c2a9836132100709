use core::fmt;

use crate::{address::ProcessId, mmap::MapId, VirtAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No physical page is left, even after evicting a victim
    OutOfPhysicalMemory,
    /// Every slot of the swap device holds live data
    SwapExhausted,
    /// A precondition of `mmap` was violated
    InvalidMapping(&'static str),
    /// Short read or write while filling or flushing a page
    BackingStoreIo,
    /// `set` was called for an address that already has an entry
    DuplicateEntry(VirtAddr),
    /// `clear` was called for an address without an entry
    MissingEntry(VirtAddr),
    /// Fault on an address the process never mapped
    InvalidAccess(VirtAddr),
    /// Write fault on a read-only page
    PermissionViolation(VirtAddr),
    UnknownProcess(ProcessId),
    UnknownMapping(MapId),
    /// The page table of that process is currently in use by its owner
    AddressSpaceBusy(ProcessId),
}

impl VmError {
    /// Errors that signal a broken kernel invariant or an exhausted resource
    /// rather than a misbehaving process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmError::OutOfPhysicalMemory
                | VmError::SwapExhausted
                | VmError::DuplicateEntry(_)
                | VmError::MissingEntry(_)
        )
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::OutOfPhysicalMemory => write!(f, "out of physical pages"),
            VmError::SwapExhausted => write!(f, "no free swap slot left"),
            VmError::InvalidMapping(reason) => write!(f, "invalid mapping: {}", reason),
            VmError::BackingStoreIo => write!(f, "short read or write on backing store"),
            VmError::DuplicateEntry(vaddr) => write!(f, "page {} is already mapped", vaddr),
            VmError::MissingEntry(vaddr) => write!(f, "page {} is not mapped", vaddr),
            VmError::InvalidAccess(vaddr) => write!(f, "access to unmapped address {}", vaddr),
            VmError::PermissionViolation(vaddr) => write!(f, "write to read-only page {}", vaddr),
            VmError::UnknownProcess(pid) => write!(f, "unknown process ({})", pid),
            VmError::UnknownMapping(id) => write!(f, "unknown mapping id {}", id),
            VmError::AddressSpaceBusy(pid) => write!(f, "page table of {} is busy", pid),
        }
    }
}

impl std::error::Error for VmError {}
