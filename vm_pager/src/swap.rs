use log::{info, trace, warn};
use spin::Mutex;

use crate::{
    modules::block_device::BlockDeviceModule, util::bit_array::BitArray, VmError, PAGE_SIZE,
    SECTORS_PER_PAGE,
};

/// Index of a page sized slot on the swap device.
///
/// Slot `i` occupies the sectors `[i * SECTORS_PER_PAGE, (i + 1) * SECTORS_PER_PAGE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(usize);

impl SwapSlot {
    pub const fn index(self) -> usize {
        self.0
    }

    const fn first_sector(self) -> usize {
        self.0 * SECTORS_PER_PAGE
    }
}

struct SwapInner<B: BlockDeviceModule> {
    device: B,
    /// set bit: slot holds live data
    used_map: BitArray,
}

/// Page granular swap area on a block device.
///
/// Only the free bitmap is kept, nothing about the slots is written to the device.
pub struct SwapStore<B: BlockDeviceModule> {
    inner: Mutex<SwapInner<B>>,
    capacity: usize,
}

impl<B: BlockDeviceModule> SwapStore<B> {
    pub fn new(device: B) -> Self {
        let capacity = device.sector_count() / SECTORS_PER_PAGE;
        info!("{} swap slots available", capacity);

        Self {
            inner: Mutex::new(SwapInner {
                device,
                used_map: BitArray::new(capacity),
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used_slots(&self) -> usize {
        self.inner.lock().used_map.count(true)
    }

    pub fn is_used(&self, slot: SwapSlot) -> bool {
        let inner = self.inner.lock();
        slot.index() < inner.used_map.len() && inner.used_map.is_set(slot.index())
    }

    /// Takes the first free slot and writes the page `src` to it
    pub fn allocate_and_write(&self, src: &[u8]) -> Result<SwapSlot, VmError> {
        debug_assert_eq!(src.len(), PAGE_SIZE);

        let mut inner = self.inner.lock();
        let slot = SwapSlot(
            inner
                .used_map
                .scan_and_flip(1, false)
                .ok_or(VmError::SwapExhausted)?,
        );

        if inner.device.write_page(slot.first_sector(), src).is_err() {
            inner.used_map.set(false, slot.index());
            return Err(VmError::BackingStoreIo);
        }

        trace!("wrote {:?}", slot);
        Ok(slot)
    }

    /// Marks `slot` as free. The data stays on the device.
    pub fn release(&self, slot: SwapSlot) {
        if slot.index() >= self.capacity {
            warn!("release of invalid {:?}", slot);
            return;
        }

        let mut inner = self.inner.lock();
        if !inner.used_map.is_set(slot.index()) {
            warn!("{:?} released twice", slot);
            return;
        }
        inner.used_map.set(false, slot.index());
        trace!("released {:?}", slot);
    }

    /// Reads `slot` into `dest` and frees it.
    ///
    /// The slot is only freed once the read succeeded, as it might hold the
    /// only copy of that page.
    pub fn read_and_release(&self, slot: SwapSlot, dest: &mut [u8]) -> Result<(), VmError> {
        debug_assert_eq!(dest.len(), PAGE_SIZE);

        let mut inner = self.inner.lock();
        if slot.index() >= self.capacity || !inner.used_map.is_set(slot.index()) {
            return Err(VmError::BackingStoreIo);
        }

        inner
            .device
            .read_page(slot.first_sector(), dest)
            .map_err(|_| VmError::BackingStoreIo)?;
        inner.used_map.set(false, slot.index());

        trace!("read and released {:?}", slot);
        Ok(())
    }
}
