use spin::{Mutex, MutexGuard};

use crate::{KernelAddr, PAGE_SIZE, PHYS_BASE};

pub(crate) type PageBuf = Box<[u8]>;

/// Simulated RAM. Page `i` lives at kernel address `PHYS_BASE + i * PAGE_SIZE`.
///
/// Every page carries its own lock, so filling one frame never blocks
/// accesses to another.
pub(crate) struct PhysicalMemory {
    pages: Vec<Mutex<PageBuf>>,
}

impl PhysicalMemory {
    pub(crate) fn new(page_count: usize) -> Self {
        Self {
            pages: (0..page_count)
                .map(|_| Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()))
                .collect(),
        }
    }

    pub(crate) fn addr_of(&self, page_number: usize) -> KernelAddr {
        debug_assert!(page_number < self.pages.len());
        KernelAddr::new(PHYS_BASE + page_number * PAGE_SIZE)
    }

    pub(crate) fn contains(&self, kaddr: KernelAddr) -> bool {
        kaddr.as_usize() >= PHYS_BASE && kaddr.page_number() < self.pages.len()
    }

    /// Locks the page at `kaddr` for direct access
    pub(crate) fn page(&self, kaddr: KernelAddr) -> MutexGuard<'_, PageBuf> {
        assert!(
            kaddr.is_page_aligned() && self.contains(kaddr),
            "{} is not a physical page",
            kaddr
        );
        self.pages[kaddr.page_number()].lock()
    }

    pub(crate) fn fill(&self, kaddr: KernelAddr, cnt: usize, value: u8) {
        for i in 0..cnt {
            self.page(KernelAddr::new(kaddr.as_usize() + i * PAGE_SIZE)).fill(value);
        }
    }
}
