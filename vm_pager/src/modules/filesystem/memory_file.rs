use std::sync::Arc;

use spin::Mutex;

use super::{BackingFile, FileHandle};

/// File that lives in RAM. All handles created by `reopen` share one inode.
pub struct MemoryFile {
    inode: Arc<Mutex<Vec<u8>>>,
}

impl MemoryFile {
    pub fn create(contents: Vec<u8>) -> FileHandle {
        Arc::new(MemoryFile {
            inode: Arc::new(Mutex::new(contents)),
        })
    }
}

impl BackingFile for MemoryFile {
    fn read_at(&self, offset: usize, dest: &mut [u8]) -> usize {
        let data = self.inode.lock();
        if offset >= data.len() {
            return 0;
        }

        let len = dest.len().min(data.len() - offset);
        dest[..len].copy_from_slice(&data[offset..offset + len]);
        len
    }

    fn write_at(&self, offset: usize, src: &[u8]) -> usize {
        let mut data = self.inode.lock();
        if offset >= data.len() {
            return 0;
        }

        let len = src.len().min(data.len() - offset);
        data[offset..offset + len].copy_from_slice(&src[..len]);
        len
    }

    fn length(&self) -> usize {
        self.inode.lock().len()
    }

    fn reopen(&self) -> Result<FileHandle, ()> {
        Ok(Arc::new(MemoryFile {
            inode: self.inode.clone(),
        }))
    }
}
