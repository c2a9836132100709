use core::any::type_name;

#[cfg(not(test))]
use std::io::stdout;

use serde::Serialize;

mod fault;
mod swap;
mod working_set;

pub use fault::*;
pub use swap::*;
pub use working_set::*;

use crate::{
    modules::{block_device::BlockDeviceModule, page_directory::SoftPageDirectory},
    ProcessId, VirtualMemory, VmConfig,
};

/// Process all benchmarks run in
pub(crate) const BENCH_PID: ProcessId = ProcessId(1);

#[derive(Default)]
pub struct RunAllBenchmarkOptions {
    pub run_swap_benchmarks: bool,
    pub run_fault_benchmarks: bool,
    pub run_working_set_benchmarks: bool,
}

impl RunAllBenchmarkOptions {
    pub fn all() -> Self {
        Self {
            run_swap_benchmarks: true,
            run_fault_benchmarks: true,
            run_working_set_benchmarks: true,
        }
    }
}

/// Creates a fresh subsystem with one empty process
pub(crate) fn get_bench_vm<B: BlockDeviceModule>(user_pages: usize, swap_device: B) -> VirtualMemory<B> {
    let vm = VirtualMemory::new(
        VmConfig {
            user_pages,
            poison_freed_pages: false,
            ..Default::default()
        },
        swap_device,
    );
    vm.create_process(BENCH_PID, Box::new(SoftPageDirectory::new()));
    vm
}

pub fn run_all_benchmarks<TIMER: Timer, B: BlockDeviceModule, F: Fn() -> B>(
    mut run_options: BenchmarkRunOptions,
    options: RunAllBenchmarkOptions,
    get_swap_device: F,
) {
    const USER_PAGES: [usize; 3] = [4, 16, 64];

    if options.run_swap_benchmarks {
        SwapWriteBenchmark::new(get_swap_device()).run_benchmark::<TIMER>(&mut run_options);
        SwapReadBenchmark::new(get_swap_device()).run_benchmark::<TIMER>(&mut run_options);
    }

    if options.run_fault_benchmarks {
        PageFaultBenchmark::new(get_bench_vm(1, get_swap_device()))
            .run_benchmark::<TIMER>(&mut run_options);

        for user_pages in USER_PAGES {
            EvictionFaultBenchmark::new(get_bench_vm(user_pages, get_swap_device()))
                .run_benchmark::<TIMER>(&mut run_options);
        }
    }

    if options.run_working_set_benchmarks {
        for user_pages in USER_PAGES {
            for working_set in [user_pages / 2, user_pages, 2 * user_pages] {
                WorkingSetBenchmark::new(get_bench_vm(user_pages, get_swap_device()), working_set)
                    .run_benchmark::<TIMER>(&mut run_options);
            }
        }
    }
}

pub trait Benchmark<O: Serialize> {
    fn get_name(&self) -> &'static str;

    fn get_bench_options(&self) -> O;

    fn execute<T: Timer>(&mut self) -> u32;

    #[inline(never)]
    fn run_benchmark<T: Timer>(mut self, options: &mut BenchmarkRunOptions) -> BenchmarkRunResult
    where
        Self: Sized,
    {
        assert_eq!(options.repetitions as usize, options.result_buffer.len());

        print!("Running Benchmark \"{}\" with options ", self.get_name());

        #[cfg(not(test))]
        {
            if let Err(err) = serde_json::to_writer(stdout(), &self.get_bench_options()) {
                print!("<{}>", err);
            }
        }
        println!();

        for _ in 0..options.cold_start {
            self.execute::<T>();
        }

        for i in 0..options.result_buffer.len() {
            options.result_buffer[i] = self.execute::<T>();
        }

        print!("[BENCH-INFO] ");

        #[cfg(not(test))]
        {
            let run_info = BenchmarkRunInfo {
                bench_name: self.get_name(),
                bench_options: &self.get_bench_options(),
                machine_name: options.machine_name,
                cold_start: options.cold_start,
                repetitions: options.repetitions,
                ticks_per_ms: T::get_ticks_per_ms(),
                data: options.result_buffer,
            };
            if let Err(err) = serde_json::to_writer(stdout(), &run_info) {
                print!("<{}>", err);
            }
        }
        println!();

        let res = BenchmarkRunResult::from_buffer(options.result_buffer);
        println!(
            "-> Finished {}: mean={}, min={}, max={}",
            self.get_name(),
            res.mean_latency,
            res.min_latency,
            res.max_latency
        );
        println!();

        res
    }
}

pub struct BenchmarkRunOptions<'a> {
    pub repetitions: u32,
    pub result_buffer: &'a mut [u32],

    pub cold_start: u32,

    pub machine_name: &'static str,
}

#[derive(Serialize)]
pub struct BenchmarkRunInfo<'a, O: Serialize> {
    bench_name: &'static str,
    bench_options: &'a O,
    machine_name: &'static str,
    cold_start: u32,
    repetitions: u32,
    ticks_per_ms: u32,
    data: &'a [u32],
}

pub struct BenchmarkRunResult {
    pub mean_latency: u32,
    pub min_latency: u32,
    pub max_latency: u32,
}

impl BenchmarkRunResult {
    fn from_buffer(buffer: &[u32]) -> Self {
        Self {
            mean_latency: buffer.iter().sum::<u32>() / (buffer.len().max(1) as u32),
            min_latency: buffer.iter().copied().min().unwrap_or(0),
            max_latency: buffer.iter().copied().max().unwrap_or(0),
        }
    }
}

pub trait Timer {
    fn get_ticks_per_ms() -> u32;

    fn start() -> Self;

    fn stop(self) -> u32;
}

/// Name of the swap device type, for the benchmark options
pub(crate) fn device_name<B: BlockDeviceModule>() -> &'static str {
    type_name::<B>()
}
