//! Entry points for the system call layer and the page fault interrupt.
//!
//! These only translate between the error values of this crate and what a
//! user process gets to see.

use log::{error, info, warn};

use crate::{
    modules::block_device::BlockDeviceModule, MapId, ProcessId, VirtAddr, VirtualMemory, VmError,
};

/// Returned by `sys_mmap` on failure
pub const MAP_FAILED: MapId = -1;

/// Exit status of a process killed by the memory subsystem
pub const EXIT_FAILURE: i32 = -1;

pub fn sys_mmap<B: BlockDeviceModule>(
    vm: &VirtualMemory<B>,
    pid: ProcessId,
    fd: i32,
    addr: usize,
) -> MapId {
    match vm.mmap(pid, fd, VirtAddr::new(addr)) {
        Ok(id) => id,
        Err(err) => {
            info!("{}: mmap({}, {:#x}) failed: {}", pid, fd, addr, err);
            MAP_FAILED
        }
    }
}

pub fn sys_munmap<B: BlockDeviceModule>(vm: &VirtualMemory<B>, pid: ProcessId, id: MapId) -> bool {
    match vm.munmap(pid, id) {
        Ok(()) => true,
        Err(err) => {
            warn!("{}: munmap({}) failed: {}", pid, id, err);
            false
        }
    }
}

/// Resolves a page fault of `pid`.
///
/// If the process has to be terminated, it is torn down and the exit status
/// to report is returned. Panics on errors that leave the kernel itself in a
/// broken state.
pub fn page_fault<B: BlockDeviceModule>(
    vm: &VirtualMemory<B>,
    pid: ProcessId,
    addr: usize,
    write: bool,
) -> Result<(), i32> {
    let err = match vm.handle_page_fault(pid, VirtAddr::new(addr), write) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    if err.is_fatal() {
        error!("{}: fatal page fault at {:#x}: {}", pid, addr, err);
        panic!("page fault: {}", err);
    }

    info!("{}: killed at {:#x}: {}", pid, addr, err);
    if !matches!(err, VmError::UnknownProcess(_)) {
        if let Err(exit_err) = vm.exit_process(pid) {
            warn!("{}: teardown incomplete: {}", pid, exit_err);
        }
    }

    Err(EXIT_FAILURE)
}
