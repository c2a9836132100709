mod load;

pub(crate) use load::{flush_to_file, load_on_demand};

use core::fmt;
use std::collections::BTreeMap;

use log::{error, trace, warn};

use crate::{
    modules::{block_device::BlockDeviceModule, filesystem::FileHandle, page_directory::PageDirectoryModule},
    SwapSlot, VirtAddr, VirtualMemory, VmError, PAGE_SIZE,
};

/// Part of a file that backs one virtual page.
///
/// The first `read_bytes` of the page come from `file` at `offset`,
/// the following `zero_bytes` are zero. Both add up to `PAGE_SIZE`.
#[derive(Clone)]
pub struct FileSpan {
    pub file: FileHandle,
    pub offset: usize,
    pub read_bytes: usize,
    pub zero_bytes: usize,
}

impl FileSpan {
    pub fn new(file: FileHandle, offset: usize, read_bytes: usize) -> Self {
        debug_assert!(read_bytes <= PAGE_SIZE);

        Self {
            file,
            offset,
            read_bytes,
            zero_bytes: PAGE_SIZE - read_bytes,
        }
    }
}

impl fmt::Debug for FileSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSpan")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .finish()
    }
}

/// Where the content of a virtual page comes from while it is not loaded
#[derive(Debug, Clone)]
pub enum PageBacking {
    /// Zero filled on first access, e.g. a stack page
    Anonymous,
    /// Part of an executable segment
    Executable(FileSpan),
    /// Part of a memory mapped file, written back to it
    MappedFile(FileSpan),
    /// Evicted to swap. Only present while the page is not loaded.
    Swap(SwapSlot),
}

/// Bookkeeping of one virtual page of a process
#[derive(Debug, Clone)]
pub struct PageMapEntry {
    vaddr: VirtAddr,
    loaded: bool,
    writable: bool,
    backing: PageBacking,
}

impl PageMapEntry {
    /// Creates an entry that is not loaded yet
    pub fn new(vaddr: VirtAddr, writable: bool, backing: PageBacking) -> Self {
        debug_assert!(vaddr.is_page_aligned());

        Self {
            vaddr,
            loaded: false,
            writable,
            backing,
        }
    }

    pub fn vaddr(&self) -> VirtAddr {
        self.vaddr
    }

    /// Whether a frame backs this page right now
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn backing(&self) -> &PageBacking {
        &self.backing
    }

    pub(crate) fn set_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }

    pub(crate) fn set_backing(&mut self, backing: PageBacking) {
        self.backing = backing;
    }
}

/// Every virtual page a process may access, keyed by page address.
///
/// Removing an entry is the only way to destroy it. Whatever it still holds
/// (frame, swap slot, dirty file data) is released on the way out.
pub struct SupplementalPageTable {
    entries: BTreeMap<VirtAddr, PageMapEntry>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry of the page containing `vaddr`
    pub fn get(&self, vaddr: VirtAddr) -> Option<&PageMapEntry> {
        self.entries.get(&vaddr.page_round_down())
    }

    pub(crate) fn get_mut(&mut self, vaddr: VirtAddr) -> Option<&mut PageMapEntry> {
        self.entries.get_mut(&vaddr.page_round_down())
    }

    pub fn contains(&self, vaddr: VirtAddr) -> bool {
        self.entries.contains_key(&vaddr.page_round_down())
    }

    /// Adds `entry`. An existing entry for the same page is never replaced.
    pub fn set(&mut self, entry: PageMapEntry) -> Result<(), VmError> {
        let vaddr = entry.vaddr();
        if self.entries.contains_key(&vaddr) {
            return Err(VmError::DuplicateEntry(vaddr));
        }

        trace!("new entry for {}: {:?}", vaddr, entry.backing());
        self.entries.insert(vaddr, entry);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageMapEntry> {
        self.entries.values()
    }

    /// Removes the entry without releasing anything.
    /// Only valid for entries that are not loaded and not swapped.
    pub(crate) fn remove(&mut self, vaddr: VirtAddr) -> Option<PageMapEntry> {
        let entry = self.entries.remove(&vaddr.page_round_down())?;
        debug_assert!(!entry.is_loaded());
        debug_assert!(!matches!(entry.backing(), PageBacking::Swap(_)));
        Some(entry)
    }

    /// Removes the entry of `vaddr` and releases what it holds.
    ///
    /// A loaded mapped file page is written back first if the page directory
    /// has it marked dirty. Its mapping is cleared and its frame returned to
    /// the allocator even if that write back fails, in which case
    /// `BackingStoreIo` is returned afterwards.
    pub fn clear<B: BlockDeviceModule>(
        &mut self,
        vaddr: VirtAddr,
        page_directory: &dyn PageDirectoryModule,
        vm: &VirtualMemory<B>,
    ) -> Result<(), VmError> {
        let vaddr = vaddr.page_round_down();
        let entry = self
            .entries
            .remove(&vaddr)
            .ok_or(VmError::MissingEntry(vaddr))?;

        release_entry(entry, page_directory, vm)
    }

    /// Clears every entry. Keeps going after a failure and returns the first one.
    pub fn destroy<B: BlockDeviceModule>(
        &mut self,
        page_directory: &dyn PageDirectoryModule,
        vm: &VirtualMemory<B>,
    ) -> Result<(), VmError> {
        let mut res = Ok(());

        for (_, entry) in core::mem::take(&mut self.entries) {
            let vaddr = entry.vaddr();
            if let Err(err) = release_entry(entry, page_directory, vm) {
                warn!("could not release page {}: {}", vaddr, err);
                res = res.and(Err(err));
            }
        }

        res
    }
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new()
    }
}

fn release_entry<B: BlockDeviceModule>(
    entry: PageMapEntry,
    page_directory: &dyn PageDirectoryModule,
    vm: &VirtualMemory<B>,
) -> Result<(), VmError> {
    let vaddr = entry.vaddr();

    if !entry.is_loaded() {
        if let PageBacking::Swap(slot) = entry.backing() {
            vm.swap().release(*slot);
        }
        return Ok(());
    }

    // without the translation there is no way to tell which frame to free
    let kaddr = match page_directory.get_page(vaddr) {
        Some(kaddr) => kaddr,
        None => {
            error!("loaded page {} has no mapping", vaddr);
            return Err(VmError::MissingEntry(vaddr));
        }
    };

    let mut res = Ok(());
    if let PageBacking::MappedFile(span) = entry.backing() {
        if page_directory.is_dirty(vaddr) {
            trace!("write back {} before release", vaddr);
            let page = vm.allocator.memory().page(kaddr);
            res = flush_to_file(span, &page);
        }
    }

    // no stale translation may point to a frame that is handed out again
    page_directory.clear_page(vaddr);
    vm.free_page(kaddr);

    res
}

#[cfg(test)]
mod test {
    use super::{FileSpan, PageBacking, PageMapEntry, SupplementalPageTable};
    use crate::{
        modules::filesystem::MemoryFile,
        test::{get_test_vm, spawn_process},
        VirtAddr, VmError, PAGE_SIZE,
    };

    const BASE: usize = 0x0804_8000;

    fn page(i: usize) -> VirtAddr {
        VirtAddr::new(BASE + i * PAGE_SIZE)
    }

    #[test]
    fn test_set_get() {
        let mut table = SupplementalPageTable::new();
        table
            .set(PageMapEntry::new(page(0), true, PageBacking::Anonymous))
            .unwrap();

        let entry = table.get(VirtAddr::new(BASE + 123)).unwrap();
        assert_eq!(entry.vaddr(), page(0));
        assert!(entry.is_writable());
        assert!(!entry.is_loaded());
        assert!(table.get(page(1)).is_none());

        assert_eq!(
            table.set(PageMapEntry::new(page(0), false, PageBacking::Anonymous)),
            Err(VmError::DuplicateEntry(page(0)))
        );
        // the first entry is untouched
        assert!(table.get(page(0)).unwrap().is_writable());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_clear_missing_entry() {
        let vm = get_test_vm(2, 4);
        let (_, space) = spawn_process(&vm, 1);

        let mut table = SupplementalPageTable::new();
        let file = MemoryFile::create(vec![1u8; PAGE_SIZE]);
        table
            .set(PageMapEntry::new(
                page(3),
                false,
                PageBacking::Executable(FileSpan::new(file, 0, PAGE_SIZE)),
            ))
            .unwrap();

        table.clear(page(3), space.page_directory(), &vm).unwrap();
        assert!(table.is_empty());

        assert_eq!(
            table.clear(page(3), space.page_directory(), &vm),
            Err(VmError::MissingEntry(page(3)))
        );
        assert_eq!(vm.free_user_pages(), 2);
    }

    #[test]
    fn test_clear_releases_swap_slot() {
        let vm = get_test_vm(2, 4);
        let (_, space) = spawn_process(&vm, 1);

        let slot = vm.swap().allocate_and_write(&vec![5u8; PAGE_SIZE]).unwrap();
        let mut table = SupplementalPageTable::new();
        table
            .set(PageMapEntry::new(page(0), true, PageBacking::Swap(slot)))
            .unwrap();

        table.clear(page(0), space.page_directory(), &vm).unwrap();
        assert!(!vm.swap().is_used(slot));
        assert_eq!(vm.swap().used_slots(), 0);
    }

    #[test]
    fn test_destroy_clears_everything() {
        let vm = get_test_vm(2, 4);
        let (_, space) = spawn_process(&vm, 1);

        let slot = vm.swap().allocate_and_write(&vec![5u8; PAGE_SIZE]).unwrap();
        let mut table = SupplementalPageTable::new();
        table
            .set(PageMapEntry::new(page(0), true, PageBacking::Anonymous))
            .unwrap();
        table
            .set(PageMapEntry::new(page(1), true, PageBacking::Swap(slot)))
            .unwrap();

        table.destroy(space.page_directory(), &vm).unwrap();
        assert!(table.is_empty());
        assert_eq!(vm.swap().used_slots(), 0);
    }

    #[test]
    fn test_clear_loaded_page_without_mapping() {
        let vm = get_test_vm(2, 4);
        let (_, space) = spawn_process(&vm, 1);

        let mut table = SupplementalPageTable::new();
        let mut entry = PageMapEntry::new(page(0), true, PageBacking::Anonymous);
        entry.set_loaded(true);
        table.set(entry).unwrap();

        assert_eq!(
            table.clear(page(0), space.page_directory(), &vm),
            Err(VmError::MissingEntry(page(0)))
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_file_span_zero_fill() {
        let file = MemoryFile::create(vec![0u8; 100]);
        let span = FileSpan::new(file, 0, 100);
        assert_eq!(span.zero_bytes, PAGE_SIZE - 100);
    }
}
