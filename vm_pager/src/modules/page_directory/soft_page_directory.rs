use std::collections::BTreeMap;

use spin::Mutex;

use super::PageDirectoryModule;
use crate::{KernelAddr, VirtAddr};

#[derive(Debug, Clone, Copy)]
struct SoftPageTableEntry {
    kaddr: KernelAddr,
    writable: bool,
    accessed: bool,
    dirty: bool,
}

/// Page directory kept entirely in software.
///
/// There is no MMU behind it: `VirtualMemory::read_user` and `write_user` set
/// the accessed and dirty bits the same way the hardware would.
pub struct SoftPageDirectory {
    entries: Mutex<BTreeMap<VirtAddr, SoftPageTableEntry>>,
}

impl SoftPageDirectory {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of installed mappings
    pub fn mapped_pages(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for SoftPageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PageDirectoryModule for SoftPageDirectory {
    fn install_page(&self, vaddr: VirtAddr, kaddr: KernelAddr, writable: bool) -> Result<(), ()> {
        debug_assert!(vaddr.is_page_aligned());
        debug_assert!(kaddr.is_page_aligned());

        let mut entries = self.entries.lock();
        if entries.contains_key(&vaddr) {
            return Err(());
        }

        entries.insert(
            vaddr,
            SoftPageTableEntry {
                kaddr,
                writable,
                accessed: false,
                dirty: false,
            },
        );
        Ok(())
    }

    fn clear_page(&self, vaddr: VirtAddr) {
        self.entries.lock().remove(&vaddr.page_round_down());
    }

    fn get_page(&self, vaddr: VirtAddr) -> Option<KernelAddr> {
        self.entries
            .lock()
            .get(&vaddr.page_round_down())
            .map(|entry| entry.kaddr)
    }

    fn is_accessed(&self, vaddr: VirtAddr) -> bool {
        self.entries
            .lock()
            .get(&vaddr.page_round_down())
            .map_or(false, |entry| entry.accessed)
    }

    fn set_accessed(&self, vaddr: VirtAddr, accessed: bool) {
        if let Some(entry) = self.entries.lock().get_mut(&vaddr.page_round_down()) {
            entry.accessed = accessed;
        }
    }

    fn is_dirty(&self, vaddr: VirtAddr) -> bool {
        self.entries
            .lock()
            .get(&vaddr.page_round_down())
            .map_or(false, |entry| entry.dirty)
    }

    fn set_dirty(&self, vaddr: VirtAddr, dirty: bool) {
        if let Some(entry) = self.entries.lock().get_mut(&vaddr.page_round_down()) {
            entry.dirty = dirty;
        }
    }

    fn is_writable(&self, vaddr: VirtAddr) -> bool {
        self.entries
            .lock()
            .get(&vaddr.page_round_down())
            .map_or(false, |entry| entry.writable)
    }
}
