use env_logger::{Builder, Env};
use log::info;
use vm_pager::{
    modules::{
        block_device::FileBlockDevice,
        filesystem::{HostFile, MemoryFile},
        page_directory::SoftPageDirectory,
    },
    syscall::{page_fault, sys_mmap, sys_munmap, MAP_FAILED},
    ProcessId, VirtAddr, VirtualMemory, VmConfig, PAGE_SIZE, PHYS_BASE, SECTORS_PER_PAGE,
};

const CODE: VirtAddr = VirtAddr::new(0x0804_8000);
const STACK: VirtAddr = VirtAddr::new(PHYS_BASE - PAGE_SIZE);
const MAPPED: usize = 0x1000_0000;

fn main() {
    Builder::from_env(Env::default())
        .filter_level(log::LevelFilter::Debug)
        .format_module_path(false)
        .init();

    let swap_path = std::env::temp_dir().join("pager_playground.swap");
    let swap = FileBlockDevice::new(swap_path.to_string_lossy().into_owned(), 64 * SECTORS_PER_PAGE)
        .unwrap();

    let vm = VirtualMemory::new(
        VmConfig {
            user_pages: 4,
            ..Default::default()
        },
        swap,
    );

    let data_path = std::env::temp_dir().join("pager_playground.data");
    std::fs::write(&data_path, vec![b'.'; 3 * PAGE_SIZE]).unwrap();

    let executable = MemoryFile::create((0..2 * PAGE_SIZE).map(|i| (i % 256) as u8).collect());

    let pids: Vec<ProcessId> = (1..=2).map(ProcessId).collect();
    for pid in pids.iter() {
        vm.create_process(*pid, Box::new(SoftPageDirectory::new()));
        vm.load_segment(*pid, &executable, 0, CODE, 2 * PAGE_SIZE, 0, false)
            .unwrap();
        vm.map_zeroed(*pid, STACK, true).unwrap();
    }

    // the first process maps the data file and scribbles into every page
    let writer = pids[0];
    let fd = vm
        .open_file(writer, HostFile::open(&data_path).unwrap())
        .unwrap();
    let id = sys_mmap(&vm, writer, fd, MAPPED);
    assert_ne!(id, MAP_FAILED);

    for i in 0..3 {
        let addr = VirtAddr::new(MAPPED + i * PAGE_SIZE);
        vm.write_user(writer, addr, format!("page {} was here", i).as_bytes())
            .unwrap();
    }

    // both processes run through their code and push to their stacks
    for round in 0..4 {
        for pid in pids.iter() {
            let mut code = vec![0u8; 2 * PAGE_SIZE];
            vm.read_user(*pid, CODE, &mut code).unwrap();

            let top = VirtAddr::new(STACK.as_usize() + PAGE_SIZE - 8);
            vm.write_user(*pid, top, &(round as u64).to_le_bytes()).unwrap();
        }

        info!(
            "round {}: {} frames, {} free user pages, {}/{} swap slots used",
            round,
            vm.frame_table().len(),
            vm.free_user_pages(),
            vm.swap().used_slots(),
            vm.swap().capacity()
        );
    }

    assert!(sys_munmap(&vm, writer, id));
    let contents = std::fs::read(&data_path).unwrap();
    info!(
        "data file starts with {:?}",
        String::from_utf8_lossy(&contents[..16])
    );

    // a stray pointer ends the second process, the first one is left alone
    let victim = pids[1];
    info!("fault at null: {:?}", page_fault(&vm, victim, 0, false));
    info!("{} still alive: {}", victim, vm.process(victim).is_some());

    vm.exit_process(writer).unwrap();
    info!(
        "done: {} free user pages, {} swap slots used",
        vm.free_user_pages(),
        vm.swap().used_slots()
    );

    std::fs::remove_file(&data_path).unwrap();
}
