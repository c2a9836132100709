use std::hint::black_box;

use serde::Serialize;

use super::{device_name, Benchmark, Timer};
use crate::{modules::block_device::BlockDeviceModule, SwapStore, PAGE_SIZE};

#[derive(Serialize)]
pub struct SwapBenchmarkOptions {
    swap_device: &'static str,
    swap_slots: usize,
}

/// Writes one page to a fresh swap slot
pub struct SwapWriteBenchmark<B: BlockDeviceModule> {
    swap: SwapStore<B>,
    page: Vec<u8>,
}

impl<B: BlockDeviceModule> SwapWriteBenchmark<B> {
    pub fn new(device: B) -> Self {
        Self {
            swap: SwapStore::new(device),
            page: vec![0x5au8; PAGE_SIZE],
        }
    }
}

impl<B: BlockDeviceModule> Benchmark<SwapBenchmarkOptions> for SwapWriteBenchmark<B> {
    fn get_name(&self) -> &'static str {
        "swap_write"
    }

    fn get_bench_options(&self) -> SwapBenchmarkOptions {
        SwapBenchmarkOptions {
            swap_device: device_name::<B>(),
            swap_slots: self.swap.capacity(),
        }
    }

    fn execute<T: Timer>(&mut self) -> u32 {
        let timer = T::start();
        let slot = black_box(self.swap.allocate_and_write(&self.page));
        let duration = timer.stop();

        match slot {
            Ok(slot) => self.swap.release(slot),
            Err(err) => panic!("swap write failed: {}", err),
        }
        duration
    }
}

/// Reads one page back from swap, which also frees its slot
pub struct SwapReadBenchmark<B: BlockDeviceModule> {
    swap: SwapStore<B>,
    page: Vec<u8>,
}

impl<B: BlockDeviceModule> SwapReadBenchmark<B> {
    pub fn new(device: B) -> Self {
        Self {
            swap: SwapStore::new(device),
            page: vec![0u8; PAGE_SIZE],
        }
    }
}

impl<B: BlockDeviceModule> Benchmark<SwapBenchmarkOptions> for SwapReadBenchmark<B> {
    fn get_name(&self) -> &'static str {
        "swap_read"
    }

    fn get_bench_options(&self) -> SwapBenchmarkOptions {
        SwapBenchmarkOptions {
            swap_device: device_name::<B>(),
            swap_slots: self.swap.capacity(),
        }
    }

    fn execute<T: Timer>(&mut self) -> u32 {
        let slot = match self.swap.allocate_and_write(&self.page) {
            Ok(slot) => slot,
            Err(err) => panic!("swap write failed: {}", err),
        };

        let timer = T::start();
        let res = black_box(self.swap.read_and_release(slot, &mut self.page));
        let duration = timer.stop();

        if let Err(err) = res {
            panic!("swap read failed: {}", err);
        }
        duration
    }
}
