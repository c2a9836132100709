//! Page allocator. Hands out physical memory in page sized chunks.
//!
//! Memory is split into a kernel pool and a user pool. User pages back virtual
//! pages of processes and are the only ones that get evicted, so the kernel
//! always keeps memory for its own operations even if user processes swap like mad.

use core::ops::BitOr;

use log::{debug, error, info, trace, warn};
use spin::Mutex;

use crate::{
    frame_table::Frame,
    modules::block_device::BlockDeviceModule,
    physical_memory::PhysicalMemory,
    util::bit_array::BitArray,
    KernelAddr, ProcessId, VirtualMemory, VmError, PAGE_SIZE,
};

/// Flags of a page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PallocFlags(u8);

impl PallocFlags {
    /// Panic instead of returning an error if no page is left
    pub const ASSERT: Self = Self(0b001);
    /// Fill the returned pages with zeros
    pub const ZERO: Self = Self(0b010);
    /// Take the pages from the user pool
    pub const USER: Self = Self(0b100);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PallocFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Kernel,
    User,
}

struct Pool {
    name: &'static str,
    /// set bit: page is in use
    used_map: Mutex<BitArray>,
    /// page number of the first page of this pool
    first_page: usize,
    page_count: usize,
}

impl Pool {
    fn new(name: &'static str, first_page: usize, page_count: usize) -> Self {
        info!("{} pages available in {}", page_count, name);

        Self {
            name,
            used_map: Mutex::new(BitArray::new(page_count)),
            first_page,
            page_count,
        }
    }

    fn contains(&self, page_number: usize) -> bool {
        page_number >= self.first_page && page_number < self.first_page + self.page_count
    }
}

/// The two page pools and the memory they hand out
pub(crate) struct PhysicalPageAllocator {
    kernel_pool: Pool,
    user_pool: Pool,
    memory: PhysicalMemory,
}

impl PhysicalPageAllocator {
    pub(crate) fn new(kernel_pages: usize, user_pages: usize) -> Self {
        Self {
            kernel_pool: Pool::new("kernel pool", 0, kernel_pages),
            user_pool: Pool::new("user pool", kernel_pages, user_pages),
            memory: PhysicalMemory::new(kernel_pages + user_pages),
        }
    }

    pub(crate) fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    fn pool(&self, kind: PoolKind) -> &Pool {
        match kind {
            PoolKind::Kernel => &self.kernel_pool,
            PoolKind::User => &self.user_pool,
        }
    }

    pub(crate) fn pool_of(&self, kaddr: KernelAddr) -> Option<PoolKind> {
        if !self.memory.contains(kaddr) {
            return None;
        }

        let page_number = kaddr.page_number();
        if self.kernel_pool.contains(page_number) {
            Some(PoolKind::Kernel)
        } else if self.user_pool.contains(page_number) {
            Some(PoolKind::User)
        } else {
            None
        }
    }

    /// Number of unused pages in the given pool
    pub(crate) fn free_pages(&self, kind: PoolKind) -> usize {
        self.pool(kind).used_map.lock().count(false)
    }

    /// Scans the pool for `cnt` contiguous free pages and marks them as used.
    /// Never evicts anything.
    pub(crate) fn try_allocate(&self, kind: PoolKind, cnt: usize, zero: bool) -> Option<KernelAddr> {
        if cnt == 0 {
            return None;
        }

        let pool = self.pool(kind);
        let page_idx = pool.used_map.lock().scan_and_flip(cnt, false)?;
        let kaddr = self.memory.addr_of(pool.first_page + page_idx);

        if zero {
            self.memory.fill(kaddr, cnt, 0);
        }

        trace!("{}: allocated {} page(s) at {}", pool.name, cnt, kaddr);
        Some(kaddr)
    }

    /// Marks the `cnt` pages at `kaddr` as free again.
    ///
    /// Panics if the run is not page aligned, does not belong to a pool
    /// or is not completely allocated.
    pub(crate) fn release(&self, kaddr: KernelAddr, cnt: usize, poison: bool) -> PoolKind {
        assert!(kaddr.is_page_aligned(), "{} is not page aligned", kaddr);

        let kind = match self.pool_of(kaddr) {
            Some(kind) => kind,
            None => panic!("{} does not belong to any pool", kaddr),
        };
        let pool = self.pool(kind);
        let page_idx = kaddr.page_number() - pool.first_page;

        if poison {
            self.memory.fill(kaddr, cnt, 0xcc);
        }

        let mut used_map = pool.used_map.lock();
        assert!(
            used_map.all(page_idx, cnt, true),
            "{}: freeing {} page(s) at {} that are not allocated",
            pool.name,
            cnt,
            kaddr
        );
        used_map.set_multiple(page_idx, cnt, false);

        kind
    }
}

impl<B: BlockDeviceModule> VirtualMemory<B> {
    /// Obtains a single free page for `owner`.
    ///
    /// A single user page that is not available right away is made available by
    /// evicting the current victim of the frame table.
    pub fn get_page(&self, owner: ProcessId, flags: PallocFlags) -> Result<KernelAddr, VmError> {
        self.get_pages(owner, flags, 1)
    }

    /// Obtains `cnt` contiguous free pages.
    ///
    /// If `PallocFlags::ASSERT` is set, running out of pages panics.
    pub fn get_pages(
        &self,
        owner: ProcessId,
        flags: PallocFlags,
        cnt: usize,
    ) -> Result<KernelAddr, VmError> {
        let kind = if flags.contains(PallocFlags::USER) {
            PoolKind::User
        } else {
            PoolKind::Kernel
        };
        let zero = flags.contains(PallocFlags::ZERO);
        let tracked = kind == PoolKind::User && cnt == 1;

        let res = match self.allocator.try_allocate(kind, cnt, zero) {
            Some(kaddr) => Ok(kaddr),
            None if tracked => self.evict_and_allocate(zero),
            None => Err(VmError::OutOfPhysicalMemory),
        };

        match res {
            Ok(kaddr) => {
                if tracked {
                    self.frame_table.lock().register(Frame::new(kaddr, owner));
                }
                Ok(kaddr)
            }
            Err(err) => {
                if flags.contains(PallocFlags::ASSERT) {
                    error!("palloc_get: out of pages ({} requested, {})", cnt, err);
                    panic!("palloc_get: out of pages");
                }
                Err(err)
            }
        }
    }

    /// Evicts victims until a user page can be allocated again.
    ///
    /// Victims whose owner is busy or gone are skipped without counting as a
    /// round; after a whole sweep of skipped frames the request spins and
    /// sweeps again, at most `busy_sweeps` times. Every successful eviction is
    /// followed by a single rescan of the pool. If another thread took the
    /// freed page in between, the next round evicts again, at most
    /// `eviction_rounds` times.
    fn evict_and_allocate(&self, zero: bool) -> Result<KernelAddr, VmError> {
        let mut rounds = 0;
        let mut skipped = 0;
        let mut busy_sweeps = 0;

        loop {
            let (victim, frames) = {
                let mut frame_table = self.frame_table.lock();
                let victim = frame_table.current_victim(|frame| self.probe_accessed(frame));
                (victim, frame_table.len())
            };

            let victim = match victim {
                Some(victim) => victim,
                None => {
                    warn!("no evictable frame left");
                    return self
                        .allocator
                        .try_allocate(PoolKind::User, 1, zero)
                        .ok_or(VmError::OutOfPhysicalMemory);
                }
            };

            match self.evict(&victim) {
                Ok(()) => {
                    debug!(
                        "round {}: evicted {} ({} at {:?})",
                        rounds, victim.kaddr, victim.owner, victim.vaddr
                    );
                    self.free_pages(victim.kaddr, 1);

                    if let Some(kaddr) = self.allocator.try_allocate(PoolKind::User, 1, zero) {
                        return Ok(kaddr);
                    }

                    rounds += 1;
                    if rounds >= self.config.eviction_rounds.max(1) {
                        return Err(VmError::OutOfPhysicalMemory);
                    }
                    debug!("freed page {} was taken by someone else", victim.kaddr);
                    skipped = 0;
                }
                Err(
                    err @ (VmError::AddressSpaceBusy(_)
                    | VmError::MissingEntry(_)
                    | VmError::UnknownProcess(_)),
                ) => {
                    // owner is busy with this page or already gone, try the next one
                    trace!("skipping victim {}: {}", victim.kaddr, err);
                    self.frame_table
                        .lock()
                        .select_victim(|frame| self.probe_accessed(frame));

                    skipped += 1;
                    if skipped < frames {
                        continue;
                    }

                    // nothing in a whole sweep could be evicted
                    skipped = 0;
                    busy_sweeps += 1;
                    if let Some(kaddr) = self.allocator.try_allocate(PoolKind::User, 1, zero) {
                        return Ok(kaddr);
                    }
                    if busy_sweeps >= self.config.busy_sweeps {
                        warn!("every frame stayed busy for {} sweeps", busy_sweeps);
                        return Err(VmError::OutOfPhysicalMemory);
                    }
                    core::hint::spin_loop();
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn free_page(&self, kaddr: KernelAddr) {
        self.free_pages(kaddr, 1)
    }

    /// Frees the `cnt` pages starting at `kaddr`.
    ///
    /// A single user page also loses its frame. If that frame is the current
    /// victim, the cursor is moved away first.
    pub fn free_pages(&self, kaddr: KernelAddr, cnt: usize) {
        if cnt == 0 {
            return;
        }

        // the frame has to be gone before the page can be handed out again
        if cnt == 1 && self.allocator.pool_of(kaddr) == Some(PoolKind::User) {
            let mut frame_table = self.frame_table.lock();
            if frame_table.is_victim(kaddr) {
                frame_table.replace_victim(kaddr, self.config.victim_retry_limit, |frame| {
                    self.probe_accessed(frame)
                });
            }

            if frame_table.unregister(kaddr).is_none() {
                warn!("freed user page {} had no frame", kaddr);
            }
        }

        self.allocator
            .release(kaddr, cnt, self.config.poison_freed_pages);
        trace!("freed {} page(s) at {}", cnt, kaddr);
    }

    /// Free pages left in the user pool
    pub fn free_user_pages(&self) -> usize {
        self.allocator.free_pages(PoolKind::User)
    }

    /// Free pages left in the kernel pool
    pub fn free_kernel_pages(&self) -> usize {
        self.allocator.free_pages(PoolKind::Kernel)
    }

    /// Copies the content of the physical page at `kaddr`
    pub fn page_content(&self, kaddr: KernelAddr) -> Vec<u8> {
        let page = self.allocator.memory().page(kaddr);
        debug_assert_eq!(page.len(), PAGE_SIZE);
        page.to_vec()
    }
}

#[cfg(test)]
mod test {
    use super::{PallocFlags, PhysicalPageAllocator, PoolKind};
    use crate::{
        test::{get_test_vm, spawn_process},
        VmError, PAGE_SIZE,
    };

    #[test]
    fn test_pools_are_separate() {
        let allocator = PhysicalPageAllocator::new(4, 2);

        let kernel = allocator.try_allocate(PoolKind::Kernel, 4, false).unwrap();
        assert_eq!(allocator.pool_of(kernel), Some(PoolKind::Kernel));
        assert_eq!(allocator.try_allocate(PoolKind::Kernel, 1, false), None);

        let user = allocator.try_allocate(PoolKind::User, 1, false).unwrap();
        assert_eq!(allocator.pool_of(user), Some(PoolKind::User));
        assert_eq!(allocator.free_pages(PoolKind::User), 1);

        assert_eq!(allocator.release(user, 1, false), PoolKind::User);
        assert_eq!(allocator.free_pages(PoolKind::User), 2);
    }

    #[test]
    fn test_contiguous_run_and_zeroing() {
        let allocator = PhysicalPageAllocator::new(8, 0);

        let first = allocator.try_allocate(PoolKind::Kernel, 3, false).unwrap();
        allocator.memory().fill(first, 3, 0x55);
        allocator.release(first, 3, false);

        let again = allocator.try_allocate(PoolKind::Kernel, 2, true).unwrap();
        assert_eq!(again, first);
        assert!(allocator.memory().page(again).iter().all(|b| *b == 0));

        assert_eq!(allocator.try_allocate(PoolKind::Kernel, 0, false), None);
        assert_eq!(allocator.try_allocate(PoolKind::Kernel, 7, false), None);
    }

    #[test]
    fn test_poison_on_free() {
        let allocator = PhysicalPageAllocator::new(1, 0);
        let page = allocator.try_allocate(PoolKind::Kernel, 1, true).unwrap();

        allocator.release(page, 1, true);
        assert!(allocator.memory().page(page).iter().all(|b| *b == 0xcc));
    }

    #[test]
    #[should_panic]
    fn test_double_free_panics() {
        let allocator = PhysicalPageAllocator::new(2, 0);
        let page = allocator.try_allocate(PoolKind::Kernel, 1, false).unwrap();

        allocator.release(page, 1, false);
        allocator.release(page, 1, false);
    }

    #[test]
    #[should_panic]
    fn test_misaligned_free_panics() {
        let allocator = PhysicalPageAllocator::new(2, 0);
        let page = allocator.try_allocate(PoolKind::Kernel, 1, false).unwrap();

        allocator.release(crate::KernelAddr::new(page.as_usize() + 8), 1, false);
    }

    #[test]
    fn test_user_page_registers_frame() {
        let vm = get_test_vm(4, 8);
        let (pid, _) = spawn_process(&vm, 1);

        let kaddr = vm.get_page(pid, PallocFlags::USER | PallocFlags::ZERO).unwrap();
        {
            let frame_table = vm.frame_table();
            let frame = frame_table.lookup(kaddr).unwrap();
            assert_eq!(frame.owner, pid);
            assert_eq!(frame.vaddr, None);
        }
        assert_eq!(vm.page_content(kaddr), vec![0u8; PAGE_SIZE]);

        vm.free_page(kaddr);
        assert!(vm.frame_table().lookup(kaddr).is_none());
        assert_eq!(vm.free_user_pages(), 4);
    }

    #[test]
    fn test_kernel_pages_are_not_frames() {
        let vm = get_test_vm(2, 8);
        let (pid, _) = spawn_process(&vm, 1);

        let kaddr = vm.get_pages(pid, PallocFlags::ZERO, 3).unwrap();
        assert!(vm.frame_table().is_empty());
        vm.free_pages(kaddr, 3);
    }

    #[test]
    fn test_exhausted_without_victim() {
        let vm = get_test_vm(1, 8);
        let (pid, _) = spawn_process(&vm, 1);

        // the only frame is not installed yet, so it can not be evicted
        let _page = vm.get_page(pid, PallocFlags::USER).unwrap();
        assert_eq!(
            vm.get_page(pid, PallocFlags::USER),
            Err(VmError::OutOfPhysicalMemory)
        );
        assert_eq!(
            vm.get_pages(pid, PallocFlags::USER, 2),
            Err(VmError::OutOfPhysicalMemory)
        );
    }

    #[test]
    #[should_panic]
    fn test_assert_flag_panics() {
        let vm = get_test_vm(1, 8);
        let (pid, _) = spawn_process(&vm, 1);

        let _ = vm.get_pages(pid, PallocFlags::ASSERT, 1000);
    }
}
