mod soft_page_directory;

pub use soft_page_directory::SoftPageDirectory;

use crate::{KernelAddr, VirtAddr};

/// The hardware page table of one process.
///
/// Implementations have to be usable through a shared reference: the frame table
/// queries and clears accessed bits of foreign processes while selecting a victim.
pub trait PageDirectoryModule: Send + Sync {
    /// Maps the page `vaddr` to the physical page at `kaddr`.
    ///
    /// Fails if `vaddr` is already mapped.
    fn install_page(&self, vaddr: VirtAddr, kaddr: KernelAddr, writable: bool) -> Result<(), ()>;

    /// Removes the mapping of `vaddr`, later accesses fault again
    fn clear_page(&self, vaddr: VirtAddr);

    /// Translates `vaddr` into the kernel address of its physical page
    fn get_page(&self, vaddr: VirtAddr) -> Option<KernelAddr>;

    fn is_accessed(&self, vaddr: VirtAddr) -> bool;

    fn set_accessed(&self, vaddr: VirtAddr, accessed: bool);

    fn is_dirty(&self, vaddr: VirtAddr) -> bool;

    fn set_dirty(&self, vaddr: VirtAddr, dirty: bool);

    fn is_writable(&self, vaddr: VirtAddr) -> bool;
}
