use std::{collections::BTreeSet, sync::Arc};

use crate::{
    modules::{block_device::MemoryBlockDevice, page_directory::SoftPageDirectory},
    AddressSpace, PageBacking, ProcessId, VirtualMemory, VmConfig, SECTORS_PER_PAGE,
};

mod concurrency;

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn get_test_config(user_pages: usize) -> VmConfig {
    VmConfig {
        kernel_pages: 8,
        user_pages,
        poison_freed_pages: true,
        ..Default::default()
    }
}

pub(crate) fn get_test_vm(user_pages: usize, swap_pages: usize) -> VirtualMemory<MemoryBlockDevice> {
    init_logger();

    VirtualMemory::new(
        get_test_config(user_pages),
        MemoryBlockDevice::new(swap_pages * SECTORS_PER_PAGE),
    )
}

pub(crate) fn spawn_process(
    vm: &VirtualMemory<MemoryBlockDevice>,
    pid: u32,
) -> (ProcessId, Arc<AddressSpace>) {
    let pid = ProcessId(pid);
    (pid, vm.create_process(pid, Box::new(SoftPageDirectory::new())))
}

/// Checks the relations between frames, page tables, page directories and swap slots
pub(crate) fn check_invariants(vm: &VirtualMemory<MemoryBlockDevice>, spaces: &[&Arc<AddressSpace>]) {
    let frames: Vec<_> = vm.frame_table().iter().copied().collect();

    let mut installed = BTreeSet::new();
    for frame in frames.iter() {
        if let Some(vaddr) = frame.vaddr {
            assert!(
                installed.insert((frame.owner, vaddr)),
                "{} of {} backed by two frames",
                vaddr,
                frame.owner
            );
        }
    }

    let mut slots = BTreeSet::new();
    let mut loaded = 0;
    for space in spaces {
        let table = space.lock_page_table();
        for entry in table.iter() {
            let key = (space.pid(), entry.vaddr());
            assert_eq!(
                entry.is_loaded(),
                installed.contains(&key),
                "load status of {} does not match the frame table",
                entry.vaddr()
            );

            if entry.is_loaded() {
                loaded += 1;
                let kaddr = space.page_directory().get_page(entry.vaddr()).unwrap();
                let frame = frames.iter().find(|frame| frame.kaddr == kaddr).unwrap();
                assert_eq!(frame.vaddr, Some(entry.vaddr()));
            } else {
                assert!(space.page_directory().get_page(entry.vaddr()).is_none());
            }

            if let PageBacking::Swap(slot) = entry.backing() {
                assert!(!entry.is_loaded());
                assert!(vm.swap().is_used(*slot));
                assert!(slots.insert(*slot), "{:?} referenced twice", slot);
            }
        }
    }

    assert_eq!(loaded, installed.len());
    assert_eq!(slots.len(), vm.swap().used_slots());
}
