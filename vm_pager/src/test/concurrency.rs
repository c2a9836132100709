use std::thread;

use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::{check_invariants, get_test_config, init_logger};
use crate::{
    modules::{block_device::MemoryBlockDevice, page_directory::SoftPageDirectory},
    ProcessId, VirtAddr, VirtualMemory, PAGE_SIZE, SECTORS_PER_PAGE,
};

const THREADS: usize = 3;
const PAGES: usize = 6;

fn page_addr(i: usize) -> VirtAddr {
    VirtAddr::new(0x1000_0000 + i * PAGE_SIZE)
}

fn fill_byte(index: usize, page: usize, round: usize) -> u8 {
    (index * 31 + page * 7 + round * 3) as u8
}

/// Several processes fault and evict each other's pages at the same time
#[test]
fn test_parallel_processes() {
    init_logger();

    let vm = VirtualMemory::new(
        get_test_config(THREADS * 2),
        MemoryBlockDevice::new(THREADS * PAGES * SECTORS_PER_PAGE),
    );

    let spaces: Vec<_> = (0..THREADS)
        .map(|i| {
            let pid = ProcessId(i as u32 + 1);
            let space = vm.create_process(pid, Box::new(SoftPageDirectory::new()));
            for page in 0..PAGES {
                vm.map_zeroed(pid, page_addr(page), true).unwrap();
            }
            space
        })
        .collect();

    thread::scope(|scope| {
        for (index, space) in spaces.iter().enumerate() {
            let vm = &vm;
            let pid = space.pid();

            scope.spawn(move || {
                let mut rand = SmallRng::seed_from_u64(index as u64);

                for round in 0..20 {
                    for page in 0..PAGES {
                        let bytes = [fill_byte(index, page, round); 64];
                        let offset = rand.gen_range(0..PAGE_SIZE / 64) * 64;
                        vm.write_user(pid, page_addr(page), &bytes).unwrap();
                        vm.write_user(pid, VirtAddr::new(page_addr(page).as_usize() + offset), &bytes)
                            .unwrap();
                    }

                    for page in 0..PAGES {
                        let mut bytes = [0u8; 64];
                        vm.read_user(pid, page_addr(page), &mut bytes).unwrap();
                        assert_eq!(bytes, [fill_byte(index, page, round); 64]);
                    }
                }
            });
        }
    });

    let refs: Vec<_> = spaces.iter().collect();
    check_invariants(&vm, &refs);

    for space in spaces.iter() {
        vm.exit_process(space.pid()).unwrap();
    }
    assert_eq!(vm.free_user_pages(), THREADS * 2);
    assert_eq!(vm.swap().used_slots(), 0);
}
