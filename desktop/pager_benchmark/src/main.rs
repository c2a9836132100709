use std::time::Instant;

use vm_pager::{
    benchmarks::{run_all_benchmarks, BenchmarkRunOptions, RunAllBenchmarkOptions, Timer},
    modules::block_device::FileBlockDevice,
    SECTORS_PER_PAGE,
};

struct DesktopTimer {
    start_time: Instant,
}

impl Timer for DesktopTimer {
    fn get_ticks_per_ms() -> u32 {
        1000
    }

    #[inline]
    fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    #[inline]
    fn stop(self) -> u32 {
        (Instant::now() - self.start_time).subsec_micros()
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(log::LevelFilter::Warn)
        .init();

    run_all_benchmarks::<DesktopTimer, _, _>(
        BenchmarkRunOptions {
            cold_start: 2,
            machine_name: "desktop",
            repetitions: 10,
            result_buffer: &mut [0; 10],
        },
        RunAllBenchmarkOptions::all(),
        get_swap_device,
    );
}

/// Large enough for the biggest working set
fn get_swap_device() -> FileBlockDevice {
    FileBlockDevice::new("bench.swap".into(), 256 * SECTORS_PER_PAGE).unwrap()
}
