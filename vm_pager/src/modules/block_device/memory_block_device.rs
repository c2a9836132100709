use super::BlockDeviceModule;
use crate::SECTOR_SIZE;

/// Block device that lives in RAM, for tests and the playground
pub struct MemoryBlockDevice {
    data: Vec<u8>,
}

impl MemoryBlockDevice {
    pub fn new(sectors: usize) -> Self {
        Self {
            data: vec![0u8; sectors * SECTOR_SIZE],
        }
    }
}

impl BlockDeviceModule for MemoryBlockDevice {
    fn sector_count(&self) -> usize {
        self.data.len() / SECTOR_SIZE
    }

    fn read_sector(&mut self, sector: usize, dest: &mut [u8]) -> Result<(), ()> {
        let start = sector * SECTOR_SIZE;
        let src = self.data.get(start..start + SECTOR_SIZE).ok_or(())?;
        dest.get_mut(..SECTOR_SIZE).ok_or(())?.copy_from_slice(src);

        Ok(())
    }

    fn write_sector(&mut self, sector: usize, src: &[u8]) -> Result<(), ()> {
        let start = sector * SECTOR_SIZE;
        let dest = self.data.get_mut(start..start + SECTOR_SIZE).ok_or(())?;
        dest.copy_from_slice(src.get(..SECTOR_SIZE).ok_or(())?);

        Ok(())
    }
}
