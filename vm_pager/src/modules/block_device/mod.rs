#[cfg(not(no_std))]
mod file_block_device;
mod memory_block_device;

#[cfg(not(no_std))]
pub use file_block_device::FileBlockDevice;
pub use memory_block_device::MemoryBlockDevice;

use crate::{SECTORS_PER_PAGE, SECTOR_SIZE};

/// A disk-like device that is only accessible in whole sectors
pub trait BlockDeviceModule: Send {
    /// Number of `SECTOR_SIZE` byte sectors on this device
    fn sector_count(&self) -> usize;

    /// Reads sector `sector` into `dest`, which is exactly `SECTOR_SIZE` bytes long.
    ///
    /// If this call fails, it could be that already some data was written to `dest`.
    fn read_sector(&mut self, sector: usize, dest: &mut [u8]) -> Result<(), ()>;

    /// Writes `src`, which is exactly `SECTOR_SIZE` bytes long, to sector `sector`
    fn write_sector(&mut self, sector: usize, src: &[u8]) -> Result<(), ()>;

    /// Reads `SECTORS_PER_PAGE` consecutive sectors starting at `first_sector`
    fn read_page(&mut self, first_sector: usize, dest: &mut [u8]) -> Result<(), ()> {
        debug_assert_eq!(dest.len(), SECTOR_SIZE * SECTORS_PER_PAGE);

        for (i, chunk) in dest.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.read_sector(first_sector + i, chunk)?;
        }

        Ok(())
    }

    /// Writes `src` to `SECTORS_PER_PAGE` consecutive sectors starting at `first_sector`
    fn write_page(&mut self, first_sector: usize, src: &[u8]) -> Result<(), ()> {
        debug_assert_eq!(src.len(), SECTOR_SIZE * SECTORS_PER_PAGE);

        for (i, chunk) in src.chunks_exact(SECTOR_SIZE).enumerate() {
            self.write_sector(first_sector + i, chunk)?;
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::{BlockDeviceModule, FileBlockDevice};
    use crate::{PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE};

    #[cfg(not(no_std))]
    pub(crate) fn get_test_device(test_name: &str, sectors: usize) -> FileBlockDevice {
        FileBlockDevice::new(format!("/tmp/{}.swap", test_name), sectors).unwrap()
    }

    fn gen_number(i: usize) -> u8 {
        (i * 3 + (i % 3) * 7 + (i % 11) * 51) as u8
    }

    pub(super) const BLOCK_DEVICE_NORMAL_TEST_SECTORS: usize = 4 * SECTORS_PER_PAGE;

    /// test if sector writes save all data and reads restore all of it
    pub(super) fn test_block_device_normal<T: BlockDeviceModule>(mut device: T) {
        assert_eq!(device.sector_count(), BLOCK_DEVICE_NORMAL_TEST_SECTORS);

        let mut sector = [0u8; SECTOR_SIZE];
        for s in 0..BLOCK_DEVICE_NORMAL_TEST_SECTORS {
            for x in 0..SECTOR_SIZE {
                sector[x] = gen_number(s * SECTOR_SIZE + x);
            }
            device.write_sector(s, &sector).unwrap();
        }

        for s in 0..BLOCK_DEVICE_NORMAL_TEST_SECTORS {
            device.read_sector(s, &mut sector).unwrap();
            for x in 0..SECTOR_SIZE {
                assert_eq!(sector[x], gen_number(s * SECTOR_SIZE + x));
            }
        }
    }

    /// test that page sized accesses cover exactly their sector run
    pub(super) fn test_block_device_page<T: BlockDeviceModule>(mut device: T) {
        let filler = [0xabu8; SECTOR_SIZE];
        for s in 0..device.sector_count() {
            device.write_sector(s, &filler).unwrap();
        }

        let page: Vec<u8> = (0..PAGE_SIZE).map(gen_number).collect();
        device.write_page(SECTORS_PER_PAGE, &page).unwrap();

        let mut read_back = vec![0u8; PAGE_SIZE];
        device.read_page(SECTORS_PER_PAGE, &mut read_back).unwrap();
        assert_eq!(read_back, page);

        // neighbouring slots are untouched
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_sector(SECTORS_PER_PAGE - 1, &mut sector).unwrap();
        assert_eq!(sector, filler);
        device.read_sector(2 * SECTORS_PER_PAGE, &mut sector).unwrap();
        assert_eq!(sector, filler);
    }
}
