#![no_std]
#![no_main]

mod asm;
mod bio;
mod buf;
mod console;
mod elf;
mod exec;
mod file;
mod fs;
mod kalloc;
mod log;
mod memlayout;
mod param;
mod pipe;
mod plic;
mod printf;
mod proc;
mod riscv;
mod sleeplock;
mod spinlock;
mod start;
mod stat;
mod string;
mod syscall;
mod trap;
mod uart;
mod virtio;
mod vm;

use core::sync::atomic::{AtomicBool, Ordering};

use ::log::info;

use crate::proc::cpuid;
use crate::riscv::sync_synchronize;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    // print even if another hart holds the printer lock.
    printf::printer().locking = false;
    printf!("panic: ");
    if let Some(loc) = info.location() {
        printf!("{}:{}: ", loc.file(), loc.line());
    }
    printf!("{}\n", info.message());
    printf::PANICKED.store(true, Ordering::Relaxed);
    abort();
}

fn abort() -> ! {
    loop {
        unsafe { core::arch::asm!("wfi") }
    }
}

static STARTED: AtomicBool = AtomicBool::new(false);

// start() jumps here in supervisor mode on all harts.
#[no_mangle]
pub extern "C" fn kmain() {
    if cpuid() == 0 {
        console::init();
        printf::init();
        info!("console init successful");

        kalloc::kinit(); // physical frame allocator
        info!("physical memory init successful");

        vm::init(); // create kernel page table
        vm::inithart(); // turn on paging
        info!("virtual memory init successful");

        proc::init(); // process table
        trap::inithart(); // install kernel trap vector

        plic::init(); // set up interrupt controller
        plic::inithart(); // ask PLIC for device interrupts
        info!("trap and interrupt init successful");

        bio::init(); // buffer cache
        virtio::virtio_disk::init(); // emulated hard disk
        info!("disk init successful");

        proc::user_init(); // first user process

        sync_synchronize();
        STARTED.store(true, Ordering::Relaxed);
    } else {
        while !STARTED.load(Ordering::Relaxed) {}

        sync_synchronize();
        info!("hart {} starting", cpuid());
        vm::inithart(); // turn on paging
        trap::inithart(); // install kernel trap vector
        plic::inithart(); // ask PLIC for device interrupts
    }

    proc::scheduler();
}
