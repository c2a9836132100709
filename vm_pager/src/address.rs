use core::fmt;

use static_assertions::const_assert;

pub const PAGE_SIZE: usize = 4096;

/// Size of one sector of a block device
pub const SECTOR_SIZE: usize = 512;

/// How many consecutive sectors one page occupies on a block device
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Start of kernel space. Every user virtual address lies below it
/// and simulated physical memory is mapped from here on.
pub const PHYS_BASE: usize = 0xc000_0000;

const_assert!(PAGE_SIZE % SECTOR_SIZE == 0);
const_assert!(PAGE_SIZE.is_power_of_two());
const_assert!(PHYS_BASE % PAGE_SIZE == 0);

/// A user virtual address
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub usize);

/// Kernel address of a physical page
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct KernelAddr(pub usize);

/// Identifies one address space (one user process)
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

impl VirtAddr {
    pub const fn new(addr: usize) -> Self {
        VirtAddr(addr)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    pub const fn page_round_down(self) -> Self {
        VirtAddr(self.0 & !(PAGE_SIZE - 1))
    }

    /// Rounds up to the next page boundary, `None` on overflow
    pub fn page_round_up(self) -> Option<Self> {
        self.0
            .checked_add(PAGE_SIZE - 1)
            .map(|addr| VirtAddr(addr & !(PAGE_SIZE - 1)))
    }

    pub const fn is_user(self) -> bool {
        self.0 < PHYS_BASE
    }

    pub fn checked_add(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(VirtAddr)
    }
}

impl KernelAddr {
    pub const fn new(addr: usize) -> Self {
        KernelAddr(addr)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// Page number counted from `PHYS_BASE`
    pub const fn page_number(self) -> usize {
        (self.0 - PHYS_BASE) / PAGE_SIZE
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Display for KernelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}
