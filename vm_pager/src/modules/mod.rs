pub mod block_device;
pub mod filesystem;
pub mod page_directory;
