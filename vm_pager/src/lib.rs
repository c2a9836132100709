mod address;
mod address_space;
mod error;
mod frame_table;
mod mmap;
mod physical_memory;
mod supplemental_page_table;
mod swap;
mod util;
mod vm_config;
mod virtual_memory;

#[cfg(feature = "benchmarks")]
pub mod benchmarks;
pub mod modules;
pub mod palloc;
pub mod syscall;

#[cfg(test)]
mod test;

pub use address::{KernelAddr, ProcessId, VirtAddr, PAGE_SIZE, PHYS_BASE, SECTORS_PER_PAGE, SECTOR_SIZE};
pub use address_space::{AddressSpace, FileTable, STDIN_FILENO, STDOUT_FILENO};
pub use error::VmError;
pub use frame_table::{Frame, FrameTable};
pub use mmap::{MapId, MMapManager, MMapRegion};
pub use palloc::PallocFlags;
pub use supplemental_page_table::{FileSpan, PageBacking, PageMapEntry, SupplementalPageTable};
pub use swap::{SwapSlot, SwapStore};
pub use virtual_memory::VirtualMemory;
pub use vm_config::VmConfig;
