#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Pages in the kernel pool
    pub kernel_pages: usize,

    /// Pages in the user pool, the ones that get evicted
    pub user_pages: usize,

    /// How often `FrameTable::replace_victim` selects again
    /// before it gives up and resets the cursor
    pub victim_retry_limit: usize,

    /// How many successful evictions a single user page request may run
    /// before it fails with `OutOfPhysicalMemory`. More than one is only
    /// needed if other threads take the freed pages first.
    pub eviction_rounds: usize,

    /// How many clock sweeps in which every frame had to be skipped
    /// (owner busy or exiting) a request waits through before it fails
    pub busy_sweeps: usize,

    /// Fill freed pages with `0xcc`
    pub poison_freed_pages: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            kernel_pages: 64,
            user_pages: 32,
            victim_retry_limit: 10,
            eviction_rounds: 16,
            busy_sweeps: 256,
            poison_freed_pages: cfg!(debug_assertions),
        }
    }
}
