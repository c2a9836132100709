use log::{debug, trace};

use super::Frame;
use crate::{
    modules::block_device::BlockDeviceModule,
    supplemental_page_table::{flush_to_file, PageBacking},
    VirtualMemory, VmError,
};

impl<B: BlockDeviceModule> VirtualMemory<B> {
    /// Clock probe: tests and clears the accessed bit of the page behind `frame`
    /// in its owner's page directory
    pub(crate) fn probe_accessed(&self, frame: &Frame) -> Option<bool> {
        let vaddr = frame.vaddr?;
        let owner = self.process(frame.owner)?;
        let page_directory = owner.page_directory();

        let accessed = page_directory.is_accessed(vaddr);
        if accessed {
            page_directory.set_accessed(vaddr, false);
        }

        Some(accessed)
    }

    /// Writes the content of `frame` to its backing store and unmaps it from its owner.
    ///
    /// Mapped file pages are written back to their file if dirty, every other
    /// page goes to a fresh swap slot and its entry is retagged as swapped.
    /// The frame itself is not freed here.
    ///
    /// Fails with `AddressSpaceBusy` if the owner's page table is locked and
    /// with `MissingEntry` if the frame no longer backs the page it was
    /// installed at.
    pub(crate) fn evict(&self, frame: &Frame) -> Result<(), VmError> {
        let vaddr = frame.vaddr.ok_or(VmError::OutOfPhysicalMemory)?;
        let owner = self
            .process(frame.owner)
            .ok_or(VmError::UnknownProcess(frame.owner))?;

        // never wait for a foreign address space: its owner might be waiting for us
        let mut page_table = owner
            .try_lock_page_table()
            .ok_or(VmError::AddressSpaceBusy(frame.owner))?;
        let page_directory = owner.page_directory();

        let entry = match page_table.get_mut(vaddr) {
            Some(entry) if entry.is_loaded() => entry,
            _ => return Err(VmError::MissingEntry(vaddr)),
        };
        if page_directory.get_page(vaddr) != Some(frame.kaddr) {
            return Err(VmError::MissingEntry(vaddr));
        }

        // hold the page until it is unmapped, so no write gets lost in between
        let page = self.allocator.memory().page(frame.kaddr);

        let swapped = match entry.backing() {
            PageBacking::MappedFile(span) => {
                if page_directory.is_dirty(vaddr) {
                    trace!("flush dirty page {} of {}", vaddr, frame.owner);
                    flush_to_file(span, &page)?;
                }
                None
            }
            PageBacking::Anonymous | PageBacking::Executable(_) | PageBacking::Swap(_) => {
                Some(self.swap.allocate_and_write(&page)?)
            }
        };

        if let Some(slot) = swapped {
            debug!("page {} of {} swapped out to {:?}", vaddr, frame.owner, slot);
            entry.set_backing(PageBacking::Swap(slot));
        }

        entry.set_loaded(false);
        page_directory.clear_page(vaddr);
        drop(page);

        Ok(())
    }
}
