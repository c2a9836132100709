use rand_xoshiro::{
    rand_core::{RngCore, SeedableRng},
    Xoshiro128StarStar,
};
use serde::Serialize;

use super::{device_name, Benchmark, Timer, BENCH_PID};
use crate::{modules::block_device::BlockDeviceModule, VirtAddr, VirtualMemory, PAGE_SIZE};

const FIRST_PAGE: usize = 0x2000_0000;
const ACCESSES: usize = 256;

#[derive(Serialize)]
pub struct WorkingSetBenchmarkOptions {
    swap_device: &'static str,
    user_pages: usize,
    working_set: usize,
    accesses: usize,
}

/// Random reads and writes spread evenly over `working_set` anonymous pages
pub struct WorkingSetBenchmark<B: BlockDeviceModule> {
    vm: VirtualMemory<B>,
    working_set: usize,
    control_rng: Xoshiro128StarStar,
}

impl<B: BlockDeviceModule> WorkingSetBenchmark<B> {
    pub fn new(vm: VirtualMemory<B>, working_set: usize) -> Self {
        const CONTROL_SEED: [u8; 16] = [
            149, 228, 163, 172, 175, 184, 104, 86, 131, 185, 95, 73, 18, 58, 248, 111,
        ];

        let working_set = working_set.max(1);
        for i in 0..working_set {
            vm.map_zeroed(BENCH_PID, Self::page_addr(i), true).unwrap();
        }

        Self {
            vm,
            working_set,
            control_rng: Xoshiro128StarStar::from_seed(CONTROL_SEED),
        }
    }

    fn page_addr(i: usize) -> VirtAddr {
        VirtAddr::new(FIRST_PAGE + i * PAGE_SIZE)
    }
}

impl<B: BlockDeviceModule> Benchmark<WorkingSetBenchmarkOptions> for WorkingSetBenchmark<B> {
    fn get_name(&self) -> &'static str {
        "working_set"
    }

    fn get_bench_options(&self) -> WorkingSetBenchmarkOptions {
        WorkingSetBenchmarkOptions {
            swap_device: device_name::<B>(),
            user_pages: self.vm.config().user_pages,
            working_set: self.working_set,
            accesses: ACCESSES,
        }
    }

    fn execute<T: Timer>(&mut self) -> u32 {
        let mut buffer = [0u8; 8];

        let timer = T::start();
        for _ in 0..ACCESSES {
            let control = self.control_rng.next_u32() as usize;
            let page = control % self.working_set;
            let offset = (control >> 16) % (PAGE_SIZE - buffer.len());
            let addr = VirtAddr::new(Self::page_addr(page).as_usize() + offset);

            if control & 1 == 0 {
                self.vm.read_user(BENCH_PID, addr, &mut buffer).unwrap();
            } else {
                self.vm.write_user(BENCH_PID, addr, &buffer).unwrap();
            }
        }
        timer.stop()
    }
}
