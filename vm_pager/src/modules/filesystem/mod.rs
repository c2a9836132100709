#[cfg(not(no_std))]
mod host_file;
mod memory_file;

#[cfg(not(no_std))]
pub use host_file::HostFile;
pub use memory_file::MemoryFile;

use std::sync::Arc;

/// An open file. Dropping the last handle closes it.
pub type FileHandle = Arc<dyn BackingFile>;

/// File operations this subsystem needs from the filesystem
pub trait BackingFile: Send + Sync {
    /// Reads up to `dest.len()` bytes starting at `offset`.
    /// Returns the number of bytes read, which is short at end of file.
    fn read_at(&self, offset: usize, dest: &mut [u8]) -> usize;

    /// Writes up to `src.len()` bytes starting at `offset`.
    /// Files do not grow: returns the number of bytes written before end of file.
    fn write_at(&self, offset: usize, src: &[u8]) -> usize;

    /// Length of the file in bytes
    fn length(&self) -> usize;

    /// Opens the same file again, with its own independent handle
    fn reopen(&self) -> Result<FileHandle, ()>;
}
