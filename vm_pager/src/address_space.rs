use std::collections::BTreeMap;

use spin::{Mutex, MutexGuard};
use try_lock::{Locked, TryLock};

use crate::{
    modules::{filesystem::FileHandle, page_directory::PageDirectoryModule},
    MMapManager, ProcessId, SupplementalPageTable,
};

pub const STDIN_FILENO: i32 = 0;
pub const STDOUT_FILENO: i32 = 1;

/// Open files of one process
pub struct FileTable {
    files: BTreeMap<i32, FileHandle>,
    next_fd: i32,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            next_fd: STDOUT_FILENO + 1,
        }
    }

    /// Adds `file` and returns its descriptor
    pub fn open(&mut self, file: FileHandle) -> i32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.files.insert(fd, file);
        fd
    }

    pub fn get(&self, fd: i32) -> Option<FileHandle> {
        self.files.get(&fd).cloned()
    }

    pub fn close(&mut self, fd: i32) -> bool {
        self.files.remove(&fd).is_some()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the memory subsystem knows about one process.
///
/// Locking order: page table, then mappings, then files.
pub struct AddressSpace {
    pid: ProcessId,
    page_directory: Box<dyn PageDirectoryModule>,

    /// Owner side users spin on it, evictors of other threads only try once
    page_table: TryLock<SupplementalPageTable>,
    mmaps: Mutex<MMapManager>,
    files: Mutex<FileTable>,
}

impl AddressSpace {
    pub(crate) fn new(pid: ProcessId, page_directory: Box<dyn PageDirectoryModule>) -> Self {
        Self {
            pid,
            page_directory,
            page_table: TryLock::new(SupplementalPageTable::new()),
            mmaps: Mutex::new(MMapManager::new()),
            files: Mutex::new(FileTable::new()),
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn page_directory(&self) -> &dyn PageDirectoryModule {
        self.page_directory.as_ref()
    }

    /// Waits until the page table is free.
    ///
    /// Evictors never wait for it, so this only ever waits for another
    /// thread working on the same process or a short eviction.
    pub fn lock_page_table(&self) -> Locked<'_, SupplementalPageTable> {
        loop {
            if let Some(guard) = self.page_table.try_lock() {
                return guard;
            }
            core::hint::spin_loop();
        }
    }

    pub(crate) fn try_lock_page_table(&self) -> Option<Locked<'_, SupplementalPageTable>> {
        self.page_table.try_lock()
    }

    pub fn mmaps(&self) -> MutexGuard<'_, MMapManager> {
        self.mmaps.lock()
    }

    pub fn files(&self) -> MutexGuard<'_, FileTable> {
        self.files.lock()
    }
}
