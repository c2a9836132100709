use std::sync::Arc;

use log::{debug, warn};

use crate::{
    modules::{block_device::BlockDeviceModule, filesystem::FileHandle, page_directory::PageDirectoryModule},
    util::pages_for,
    FileSpan, FileTable, PageBacking, PageMapEntry, SupplementalPageTable, VirtAddr, VirtualMemory,
    VmError, PAGE_SIZE, PHYS_BASE, STDIN_FILENO, STDOUT_FILENO,
};

/// Identifies a mapping within its process
pub type MapId = i32;

/// A file mapped into the address space of a process, one entry per page
pub struct MMapRegion {
    id: MapId,
    /// Own handle of the mapping, independent of the descriptor it was created from
    file: FileHandle,
    pages: Vec<VirtAddr>,
}

impl MMapRegion {
    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn file(&self) -> &FileHandle {
        &self.file
    }

    pub fn pages(&self) -> &[VirtAddr] {
        &self.pages
    }

    pub fn start(&self) -> VirtAddr {
        self.pages[0]
    }
}

/// Memory mapped files of one process
pub struct MMapManager {
    regions: Vec<MMapRegion>,
}

impl MMapManager {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn ids(&self) -> Vec<MapId> {
        self.regions.iter().map(|region| region.id).collect()
    }

    /// 0 for the first mapping, else one more than the largest id in use
    fn next_id(&self) -> MapId {
        self.regions
            .iter()
            .map(|region| region.id)
            .max()
            .map_or(0, |id| id + 1)
    }

    /// Checks whether the file open as `fd` may be mapped at `addr`.
    ///
    /// Every page of the rounded up file span has to be unused in `table`
    /// and below `PHYS_BASE`. Returns the file of `fd`.
    pub fn validate(
        fd: i32,
        addr: VirtAddr,
        files: &FileTable,
        table: &SupplementalPageTable,
    ) -> Result<FileHandle, VmError> {
        if addr.as_usize() == 0 {
            return Err(VmError::InvalidMapping("null address"));
        }
        if !addr.is_page_aligned() {
            return Err(VmError::InvalidMapping("address not page aligned"));
        }
        if fd == STDIN_FILENO || fd == STDOUT_FILENO {
            return Err(VmError::InvalidMapping("standard stream"));
        }

        let file = files
            .get(fd)
            .ok_or(VmError::InvalidMapping("descriptor not open"))?;
        let length = file.length();
        if length == 0 {
            return Err(VmError::InvalidMapping("empty file"));
        }

        let end = addr
            .checked_add(length)
            .and_then(|end| end.page_round_up())
            .ok_or(VmError::InvalidMapping("span overflows"))?;
        if end.as_usize() > PHYS_BASE {
            return Err(VmError::InvalidMapping("span reaches kernel space"));
        }

        let overlaps = (addr.as_usize()..end.as_usize())
            .step_by(PAGE_SIZE)
            .any(|page| table.contains(VirtAddr::new(page)));
        if overlaps {
            return Err(VmError::InvalidMapping("overlaps existing pages"));
        }

        Ok(file)
    }

    /// Maps `file` at `addr`. All pages start out unloaded.
    ///
    /// Call `validate` first. If an entry can not be added anyway, the ones
    /// added so far are removed again.
    pub fn establish(
        &mut self,
        file: &FileHandle,
        addr: VirtAddr,
        table: &mut SupplementalPageTable,
    ) -> Result<MapId, VmError> {
        let file = file
            .reopen()
            .map_err(|_| VmError::InvalidMapping("reopen failed"))?;
        let length = file.length();

        let mut pages = Vec::with_capacity(pages_for(length));
        for i in 0..pages_for(length) {
            let offset = i * PAGE_SIZE;
            let vaddr = VirtAddr::new(addr.as_usize() + offset);
            let span = FileSpan::new(file.clone(), offset, (length - offset).min(PAGE_SIZE));

            if let Err(err) = table.set(PageMapEntry::new(vaddr, true, PageBacking::MappedFile(span))) {
                for page in pages {
                    table.remove(page);
                }
                return Err(err);
            }
            pages.push(vaddr);
        }

        let id = self.next_id();
        debug!("mapping {} at {} ({} pages)", id, addr, pages.len());
        self.regions.push(MMapRegion { id, file, pages });

        Ok(id)
    }

    pub fn find(&self, id: MapId) -> Option<&MMapRegion> {
        self.regions.iter().find(|region| region.id == id)
    }

    /// Mapping created from `file` or a handle sharing its identity
    pub fn find_by_file(&self, file: &FileHandle) -> Option<&MMapRegion> {
        self.regions
            .iter()
            .find(|region| Arc::ptr_eq(&region.file, file))
    }

    /// Removes the record of mapping `id`, see `teardown`
    pub fn take(&mut self, id: MapId) -> Option<MMapRegion> {
        let index = self.regions.iter().position(|region| region.id == id)?;
        Some(self.regions.remove(index))
    }

    /// Clears every page of `region`, which writes back dirty pages and
    /// releases their frames and swap slots, then closes the file.
    ///
    /// Keeps going after a failed page and returns the first failure.
    pub fn teardown<B: BlockDeviceModule>(
        region: MMapRegion,
        table: &mut SupplementalPageTable,
        page_directory: &dyn PageDirectoryModule,
        vm: &VirtualMemory<B>,
    ) -> Result<(), VmError> {
        let mut res = Ok(());

        for vaddr in region.pages.iter().copied() {
            if let Err(err) = table.clear(vaddr, page_directory, vm) {
                warn!("mapping {}: could not clear {}: {}", region.id, vaddr, err);
                res = res.and(Err(err));
            }
        }

        debug!("mapping {} torn down", region.id);
        drop(region.file);
        res
    }
}

impl Default for MMapManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::MMapManager;
    use crate::{
        modules::filesystem::MemoryFile, FileTable, PageBacking, PageMapEntry,
        SupplementalPageTable, VirtAddr, VmError, PAGE_SIZE, PHYS_BASE, STDIN_FILENO,
        STDOUT_FILENO,
    };

    const ADDR: VirtAddr = VirtAddr::new(0x1000_0000);

    fn setup(length: usize) -> (FileTable, i32, SupplementalPageTable) {
        let mut files = FileTable::new();
        let fd = files.open(MemoryFile::create(vec![0xaau8; length]));
        (files, fd, SupplementalPageTable::new())
    }

    fn rejected(res: Result<impl Sized, VmError>) -> bool {
        matches!(res, Err(VmError::InvalidMapping(_)))
    }

    #[test]
    fn test_validate_arguments() {
        let (files, fd, table) = setup(PAGE_SIZE);

        assert!(MMapManager::validate(fd, ADDR, &files, &table).is_ok());

        assert!(rejected(MMapManager::validate(fd, VirtAddr::new(0), &files, &table)));
        assert!(rejected(MMapManager::validate(
            fd,
            VirtAddr::new(ADDR.as_usize() + 12),
            &files,
            &table
        )));
        assert!(rejected(MMapManager::validate(STDIN_FILENO, ADDR, &files, &table)));
        assert!(rejected(MMapManager::validate(STDOUT_FILENO, ADDR, &files, &table)));
        assert!(rejected(MMapManager::validate(fd + 1, ADDR, &files, &table)));
        assert!(rejected(MMapManager::validate(
            fd,
            VirtAddr::new(PHYS_BASE),
            &files,
            &table
        )));
        assert!(rejected(MMapManager::validate(
            fd,
            VirtAddr::new(usize::MAX & !(PAGE_SIZE - 1)),
            &files,
            &table
        )));
    }

    #[test]
    fn test_validate_empty_file() {
        let (files, fd, table) = setup(0);
        assert!(rejected(MMapManager::validate(fd, ADDR, &files, &table)));
    }

    #[test]
    fn test_validate_overlap() {
        let (files, fd, mut table) = setup(2 * PAGE_SIZE + 1);

        // third page of the rounded up span
        let taken = VirtAddr::new(ADDR.as_usize() + 2 * PAGE_SIZE);
        table
            .set(PageMapEntry::new(taken, true, PageBacking::Anonymous))
            .unwrap();
        assert!(rejected(MMapManager::validate(fd, ADDR, &files, &table)));

        // a span ending below the taken page is fine
        assert!(MMapManager::validate(fd, VirtAddr::new(ADDR.as_usize() - 3 * PAGE_SIZE), &files, &table).is_ok());
    }

    #[test]
    fn test_establish_pages() {
        let length = 2 * PAGE_SIZE + 100;
        let (files, fd, mut table) = setup(length);
        let mut mmaps = MMapManager::new();

        let file = MMapManager::validate(fd, ADDR, &files, &table).unwrap();
        let id = mmaps.establish(&file, ADDR, &mut table).unwrap();
        assert_eq!(id, 0);
        assert_eq!(table.len(), 3);

        for (i, entry) in table.iter().enumerate() {
            assert_eq!(entry.vaddr(), VirtAddr::new(ADDR.as_usize() + i * PAGE_SIZE));
            assert!(!entry.is_loaded());
            assert!(entry.is_writable());
            match entry.backing() {
                PageBacking::MappedFile(span) => {
                    assert_eq!(span.offset, i * PAGE_SIZE);
                    let expected = if i == 2 { 100 } else { PAGE_SIZE };
                    assert_eq!(span.read_bytes, expected);
                    assert_eq!(span.zero_bytes, PAGE_SIZE - expected);
                }
                backing => panic!("unexpected backing {:?}", backing),
            }
        }

        let region = mmaps.find(id).unwrap();
        assert_eq!(region.start(), ADDR);
        assert_eq!(region.pages().len(), 3);
        // the mapping keeps its own handle
        assert!(mmaps.find_by_file(&file).is_none());
        let own = region.file().clone();
        assert_eq!(mmaps.find_by_file(&own).unwrap().id(), id);
    }

    #[test]
    fn test_establish_rolls_back() {
        let (files, fd, mut table) = setup(3 * PAGE_SIZE);
        let mut mmaps = MMapManager::new();
        let file = files.get(fd).unwrap();

        let taken = VirtAddr::new(ADDR.as_usize() + 2 * PAGE_SIZE);
        table
            .set(PageMapEntry::new(taken, false, PageBacking::Anonymous))
            .unwrap();

        assert_eq!(
            mmaps.establish(&file, ADDR, &mut table),
            Err(VmError::DuplicateEntry(taken))
        );
        assert_eq!(table.len(), 1);
        assert!(mmaps.is_empty());
    }

    #[test]
    fn test_mapping_ids() {
        let (files, fd, mut table) = setup(PAGE_SIZE);
        let mut mmaps = MMapManager::new();
        let file = files.get(fd).unwrap();

        let at = |i: usize| VirtAddr::new(ADDR.as_usize() + i * PAGE_SIZE);
        assert_eq!(mmaps.establish(&file, at(0), &mut table), Ok(0));
        assert_eq!(mmaps.establish(&file, at(1), &mut table), Ok(1));
        assert_eq!(mmaps.establish(&file, at(2), &mut table), Ok(2));

        let first = mmaps.take(0).unwrap();
        assert_eq!(first.id(), 0);
        assert_eq!(mmaps.establish(&file, at(3), &mut table), Ok(3));

        for id in [1, 2, 3] {
            assert!(mmaps.take(id).is_some());
        }
        assert!(mmaps.take(3).is_none());
        assert_eq!(mmaps.establish(&file, at(4), &mut table), Ok(0));
        assert_eq!(mmaps.ids(), vec![0]);
    }
}
