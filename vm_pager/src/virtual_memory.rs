use std::{collections::BTreeMap, sync::Arc};

use log::{debug, info, trace, warn};
use spin::{Mutex, MutexGuard};

use crate::{
    address_space::AddressSpace,
    modules::{block_device::BlockDeviceModule, filesystem::FileHandle, page_directory::PageDirectoryModule},
    palloc::PhysicalPageAllocator,
    supplemental_page_table::load_on_demand,
    util::pages_for,
    FileSpan, FrameTable, KernelAddr, MMapManager, MapId, PageBacking, PageMapEntry,
    PallocFlags, ProcessId, SupplementalPageTable, SwapStore, VirtAddr, VmConfig, VmError,
    PAGE_SIZE,
};

/// The virtual memory subsystem: physical pages, frames, swap and the
/// address spaces of all processes.
pub struct VirtualMemory<B: BlockDeviceModule> {
    pub(crate) config: VmConfig,
    pub(crate) allocator: PhysicalPageAllocator,
    pub(crate) frame_table: Mutex<FrameTable>,
    pub(crate) swap: SwapStore<B>,
    processes: Mutex<BTreeMap<ProcessId, Arc<AddressSpace>>>,
}

impl<B: BlockDeviceModule> VirtualMemory<B> {
    pub fn new(config: VmConfig, swap_device: B) -> Self {
        info!(
            "virtual memory: {} kernel pages, {} user pages",
            config.kernel_pages, config.user_pages
        );

        Self {
            allocator: PhysicalPageAllocator::new(config.kernel_pages, config.user_pages),
            frame_table: Mutex::new(FrameTable::new()),
            swap: SwapStore::new(swap_device),
            processes: Mutex::new(BTreeMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn swap(&self) -> &SwapStore<B> {
        &self.swap
    }

    pub fn frame_table(&self) -> MutexGuard<'_, FrameTable> {
        self.frame_table.lock()
    }

    /// Registers a new, empty address space.
    ///
    /// Panics if `pid` is already in use.
    pub fn create_process(
        &self,
        pid: ProcessId,
        page_directory: Box<dyn PageDirectoryModule>,
    ) -> Arc<AddressSpace> {
        let space = Arc::new(AddressSpace::new(pid, page_directory));

        let mut processes = self.processes.lock();
        assert!(!processes.contains_key(&pid), "{} exists already", pid);
        processes.insert(pid, space.clone());

        debug!("created {}", pid);
        space
    }

    pub fn process(&self, pid: ProcessId) -> Option<Arc<AddressSpace>> {
        self.processes.lock().get(&pid).cloned()
    }

    fn process_or_err(&self, pid: ProcessId) -> Result<Arc<AddressSpace>, VmError> {
        self.process(pid).ok_or(VmError::UnknownProcess(pid))
    }

    /// Tears down the address space of `pid`.
    ///
    /// All mappings are unmapped first so their dirty pages reach the files,
    /// then every remaining page is released. The process is gone afterwards
    /// even if some of that failed; the first failure is returned.
    pub fn exit_process(&self, pid: ProcessId) -> Result<(), VmError> {
        let space = self.process_or_err(pid)?;
        let mut res = Ok(());

        {
            let mut table = space.lock_page_table();

            let ids = space.mmaps().ids();
            for id in ids {
                if let Err(err) = self.unmap_locked(&space, &mut table, id) {
                    res = res.and(Err(err));
                }
            }

            if let Err(err) = table.destroy(space.page_directory(), self) {
                res = res.and(Err(err));
            }
        }

        self.processes.lock().remove(&pid);
        debug!("{} exited", pid);
        res
    }

    /// Makes `file` available to `pid` under a new descriptor
    pub fn open_file(&self, pid: ProcessId, file: FileHandle) -> Result<i32, VmError> {
        Ok(self.process_or_err(pid)?.files().open(file))
    }

    /// Registers the pages of an executable segment starting at `upage`.
    ///
    /// The first `read_bytes` come from `file` at `offset`, the following
    /// `zero_bytes` are zero. Nothing is read before the first access.
    #[allow(clippy::too_many_arguments)]
    pub fn load_segment(
        &self,
        pid: ProcessId,
        file: &FileHandle,
        offset: usize,
        upage: VirtAddr,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<(), VmError> {
        if !upage.is_page_aligned() || (read_bytes + zero_bytes) % PAGE_SIZE != 0 {
            return Err(VmError::InvalidMapping("segment not page aligned"));
        }

        let space = self.process_or_err(pid)?;
        let mut table = space.lock_page_table();

        let mut remaining = read_bytes;
        for i in 0..pages_for(read_bytes + zero_bytes) {
            let page_read = remaining.min(PAGE_SIZE);
            let vaddr = upage
                .checked_add(i * PAGE_SIZE)
                .filter(|vaddr| vaddr.is_user())
                .ok_or(VmError::InvalidMapping("segment reaches kernel space"))?;

            let backing = PageBacking::Executable(FileSpan::new(
                file.clone(),
                offset + i * PAGE_SIZE,
                page_read,
            ));
            table.set(PageMapEntry::new(vaddr, writable, backing))?;
            remaining -= page_read;
        }

        trace!("{}: segment at {} registered", pid, upage);
        Ok(())
    }

    /// Registers a zero filled page at `upage`, e.g. the initial stack page
    pub fn map_zeroed(&self, pid: ProcessId, upage: VirtAddr, writable: bool) -> Result<(), VmError> {
        if !upage.is_page_aligned() || !upage.is_user() {
            return Err(VmError::InvalidMapping("bad page address"));
        }

        let space = self.process_or_err(pid)?;
        let mut table = space.lock_page_table();
        table.set(PageMapEntry::new(upage, writable, PageBacking::Anonymous))
    }

    /// Maps the file open as `fd` at `addr`
    pub fn mmap(&self, pid: ProcessId, fd: i32, addr: VirtAddr) -> Result<MapId, VmError> {
        let space = self.process_or_err(pid)?;
        let mut table = space.lock_page_table();
        let mut mmaps = space.mmaps();

        let file = MMapManager::validate(fd, addr, &space.files(), &table)?;
        mmaps.establish(&file, addr, &mut table)
    }

    pub fn munmap(&self, pid: ProcessId, id: MapId) -> Result<(), VmError> {
        let space = self.process_or_err(pid)?;
        let mut table = space.lock_page_table();
        self.unmap_locked(&space, &mut table, id)
    }

    fn unmap_locked(
        &self,
        space: &AddressSpace,
        table: &mut SupplementalPageTable,
        id: MapId,
    ) -> Result<(), VmError> {
        let region = space
            .mmaps()
            .take(id)
            .ok_or(VmError::UnknownMapping(id))?;

        MMapManager::teardown(region, table, space.page_directory(), self)
    }

    /// Resolves a fault of `pid` at `fault_addr` by loading the page.
    ///
    /// Does nothing if the page is loaded already. The page table is not
    /// locked while a frame is allocated, so everything is checked again
    /// before the new frame is filled.
    pub fn handle_page_fault(
        &self,
        pid: ProcessId,
        fault_addr: VirtAddr,
        write: bool,
    ) -> Result<(), VmError> {
        let space = self.process_or_err(pid)?;
        let vaddr = fault_addr.page_round_down();

        {
            let table = space.lock_page_table();
            let entry = table
                .get(vaddr)
                .filter(|_| fault_addr.is_user())
                .ok_or(VmError::InvalidAccess(fault_addr))?;
            if write && !entry.is_writable() {
                return Err(VmError::PermissionViolation(fault_addr));
            }
            if entry.is_loaded() {
                return Ok(());
            }
        }

        let kaddr = self.get_page(pid, PallocFlags::USER)?;

        let mut table = space.lock_page_table();
        match self.load_page(&space, &mut table, vaddr, kaddr) {
            Ok(true) => {
                trace!("{}: loaded {} into {}", pid, vaddr, kaddr);
                Ok(())
            }
            res => {
                drop(table);
                self.free_page(kaddr);
                res.map(|_| ())
            }
        }
    }

    /// Fills `kaddr` for the entry of `vaddr` and maps it.
    /// Returns false if someone else loaded the page in the meantime.
    fn load_page(
        &self,
        space: &AddressSpace,
        table: &mut SupplementalPageTable,
        vaddr: VirtAddr,
        kaddr: KernelAddr,
    ) -> Result<bool, VmError> {
        let entry = match table.get_mut(vaddr) {
            Some(entry) if entry.is_loaded() => return Ok(false),
            Some(entry) => entry,
            None => return Err(VmError::InvalidAccess(vaddr)),
        };

        {
            let mut page = self.allocator.memory().page(kaddr);
            load_on_demand(entry.backing(), &mut page, &self.swap)?;
        }

        // the slot was released by the read
        if let PageBacking::Swap(_) = entry.backing() {
            entry.set_backing(PageBacking::Anonymous);
        }

        space
            .page_directory()
            .install_page(vaddr, kaddr, entry.is_writable())
            .map_err(|_| VmError::DuplicateEntry(vaddr))?;
        entry.set_loaded(true);

        if !self.frame_table.lock().install_vaddr(kaddr, vaddr) {
            warn!("no frame for {} backing {}", kaddr, vaddr);
        }

        Ok(true)
    }

    /// Copies `dest.len()` bytes at `addr` out of the address space of `pid`,
    /// faulting pages in as needed
    pub fn read_user(&self, pid: ProcessId, addr: VirtAddr, dest: &mut [u8]) -> Result<(), VmError> {
        let space = self.process_or_err(pid)?;

        let mut done = 0;
        while done < dest.len() {
            let cur = addr
                .checked_add(done)
                .ok_or(VmError::InvalidAccess(addr))?;
            let len = (PAGE_SIZE - cur.page_offset()).min(dest.len() - done);

            let chunk = &mut dest[done..done + len];
            self.access_page(&space, cur, false, |page| chunk.copy_from_slice(&page[..len]))?;
            done += len;
        }

        Ok(())
    }

    /// Copies `src` to `addr` in the address space of `pid`,
    /// faulting pages in as needed
    pub fn write_user(&self, pid: ProcessId, addr: VirtAddr, src: &[u8]) -> Result<(), VmError> {
        let space = self.process_or_err(pid)?;

        let mut done = 0;
        while done < src.len() {
            let cur = addr
                .checked_add(done)
                .ok_or(VmError::InvalidAccess(addr))?;
            let len = (PAGE_SIZE - cur.page_offset()).min(src.len() - done);

            let chunk = &src[done..done + len];
            self.access_page(&space, cur, true, |page| page[..len].copy_from_slice(chunk))?;
            done += len;
        }

        Ok(())
    }

    /// Runs `f` on the bytes of the page containing `addr`, starting at `addr`.
    ///
    /// Acts like the MMU: translates through the page directory, sets the
    /// accessed and dirty bits and raises a page fault on a missing translation.
    fn access_page<F>(&self, space: &AddressSpace, addr: VirtAddr, write: bool, f: F) -> Result<(), VmError>
    where
        F: FnOnce(&mut [u8]),
    {
        let vaddr = addr.page_round_down();
        let page_directory = space.page_directory();

        loop {
            if !addr.is_user() {
                return Err(VmError::InvalidAccess(addr));
            }

            let kaddr = match page_directory.get_page(vaddr) {
                Some(kaddr) => kaddr,
                None => {
                    self.handle_page_fault(space.pid(), addr, write)?;
                    continue;
                }
            };
            if write && !page_directory.is_writable(vaddr) {
                return Err(VmError::PermissionViolation(addr));
            }

            let mut page = self.allocator.memory().page(kaddr);
            // evicted between translation and lock
            if page_directory.get_page(vaddr) != Some(kaddr) {
                continue;
            }

            page_directory.set_accessed(vaddr, true);
            if write {
                page_directory.set_dirty(vaddr, true);
            }
            f(&mut page[addr.page_offset()..]);
            return Ok(());
        }
    }
}
