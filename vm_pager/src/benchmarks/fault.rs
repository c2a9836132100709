use std::hint::black_box;

use serde::Serialize;

use super::{device_name, Benchmark, Timer, BENCH_PID};
use crate::{modules::block_device::BlockDeviceModule, VirtAddr, VirtualMemory, PAGE_SIZE};

const FIRST_PAGE: usize = 0x1000_0000;

fn page_addr(i: usize) -> VirtAddr {
    VirtAddr::new(FIRST_PAGE + i * PAGE_SIZE)
}

#[derive(Serialize)]
pub struct FaultBenchmarkOptions {
    swap_device: &'static str,
    user_pages: usize,
}

/// Fault on a zero filled page while a free frame is available
pub struct PageFaultBenchmark<B: BlockDeviceModule> {
    vm: VirtualMemory<B>,
}

impl<B: BlockDeviceModule> PageFaultBenchmark<B> {
    pub fn new(vm: VirtualMemory<B>) -> Self {
        Self { vm }
    }
}

impl<B: BlockDeviceModule> Benchmark<FaultBenchmarkOptions> for PageFaultBenchmark<B> {
    fn get_name(&self) -> &'static str {
        "page_fault"
    }

    fn get_bench_options(&self) -> FaultBenchmarkOptions {
        FaultBenchmarkOptions {
            swap_device: device_name::<B>(),
            user_pages: self.vm.config().user_pages,
        }
    }

    fn execute<T: Timer>(&mut self) -> u32 {
        let vaddr = page_addr(0);
        self.vm.map_zeroed(BENCH_PID, vaddr, true).unwrap();

        let timer = T::start();
        black_box(self.vm.handle_page_fault(BENCH_PID, vaddr, true)).unwrap();
        let duration = timer.stop();

        let space = self.vm.process(BENCH_PID).unwrap();
        space
            .lock_page_table()
            .clear(vaddr, space.page_directory(), &self.vm)
            .unwrap();

        duration
    }
}

/// Fault while memory is full, so every fault first evicts a page to swap
pub struct EvictionFaultBenchmark<B: BlockDeviceModule> {
    vm: VirtualMemory<B>,
    next_page: usize,
}

impl<B: BlockDeviceModule> EvictionFaultBenchmark<B> {
    pub fn new(vm: VirtualMemory<B>) -> Self {
        let user_pages = vm.config().user_pages;
        for i in 0..=user_pages {
            vm.map_zeroed(BENCH_PID, page_addr(i), true).unwrap();
        }
        for i in 0..user_pages {
            vm.write_user(BENCH_PID, page_addr(i), &[1]).unwrap();
        }

        Self {
            vm,
            next_page: user_pages,
        }
    }
}

impl<B: BlockDeviceModule> Benchmark<FaultBenchmarkOptions> for EvictionFaultBenchmark<B> {
    fn get_name(&self) -> &'static str {
        "eviction_fault"
    }

    fn get_bench_options(&self) -> FaultBenchmarkOptions {
        FaultBenchmarkOptions {
            swap_device: device_name::<B>(),
            user_pages: self.vm.config().user_pages,
        }
    }

    fn execute<T: Timer>(&mut self) -> u32 {
        // cycling through one page more than fits keeps every access a miss
        let vaddr = page_addr(self.next_page);
        self.next_page = (self.next_page + 1) % (self.vm.config().user_pages + 1);

        let timer = T::start();
        black_box(self.vm.write_user(BENCH_PID, vaddr, &[2])).unwrap();
        timer.stop()
    }
}
