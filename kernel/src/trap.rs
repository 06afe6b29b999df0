// Trap entry points and dispatch: system calls, device interrupts,
// and the timer, from both user and supervisor mode.

use core::ptr::addr_of;
use core::ptr::addr_of_mut;

use crate::memlayout::{TRAMPOLINE, UART0_IRQ, VIRTIO0_IRQ};
use crate::memlayout::KSTACK_PAGES;
use crate::plic;
use crate::proc::{self, curr_proc, curr_proc_idx};
use crate::riscv::{
    intr_get, intr_off, intr_on, make_satp, r_satp, r_scause, r_sepc, r_sstatus, r_stval, r_time,
    r_tp, w_sepc, w_sstatus, w_stimecmp, w_stvec, PGSIZE, SSTATUS_SPIE, SSTATUS_SPP,
};
use crate::spinlock::Spinlock;
use crate::syscall;
use crate::uart;
use crate::virtio;

// cycles between timer interrupts; about a tenth of a second in qemu.
const TIMER_INTERVAL: u64 = 1_000_000;

static mut TICKS_LOCK: Spinlock = Spinlock::new("time");
static mut TICKS: u32 = 0;

extern "C" {
    // kernelvec.S, calls kerneltrap().
    fn kernelvec();

    // trampoline.S
    static trampoline: u8;
    static uservec: u8;
    static userret: u8;
}

/// set up to take exceptions and traps while in the kernel.
pub fn inithart() {
    w_stvec(kernelvec as usize as u64);
}

pub fn ticks() -> u32 {
    unsafe { TICKS }
}

pub fn ticks_lock() -> &'static mut Spinlock {
    unsafe { &mut *addr_of_mut!(TICKS_LOCK) }
}

pub fn ticks_chan() -> usize {
    unsafe { addr_of!(TICKS) as usize }
}

/// Handle an interrupt, exception, or system call from user space.
/// Called from trampoline.S.
#[no_mangle]
pub extern "C" fn user_trap() {
    if r_sstatus() & SSTATUS_SPP != 0 {
        panic!("user_trap: not from user mode");
    }

    // send interrupts and exceptions to kerneltrap(), since we're now
    // in the kernel.
    w_stvec(kernelvec as usize as u64);

    let p = curr_proc();

    // save user program counter.
    p.trapframe().epc = r_sepc();

    let mut which_dev = 0;
    if r_scause() == 8 {
        // system call

        if proc::get_killed(p) {
            proc::exit(-1);
        }

        // sepc points to the ecall instruction, but we want to return
        // to the next instruction.
        p.trapframe().epc += 4;

        // an interrupt will change sepc, scause, and sstatus, so
        // enable only now that we're done with those registers.
        intr_on();

        syscall::syscall();
    } else {
        which_dev = devintr();
        if which_dev == 0 {
            log::error!(
                "user_trap: unexpected scause 0x{:x}, sepc=0x{:x}, stval=0x{:x}",
                r_scause(),
                r_sepc(),
                r_stval()
            );
            log::error!("           pid: {}, name: {}", p.pid, p.name_str());
            proc::set_killed(p);
        }
    }

    if proc::get_killed(p) {
        proc::exit(-1);
    }

    // give up the CPU if this is a timer interrupt.
    if which_dev == 2 {
        proc::yield_now();
    }

    user_ret();
}

/// Return to user space.
pub fn user_ret() {
    let p = curr_proc();

    // we're about to switch the destination of traps from
    // kerneltrap() to user_trap(), so turn off interrupts until we're
    // back in user space, where user_trap() is correct.
    intr_off();

    // send syscalls, interrupts, and exceptions to uservec in
    // trampoline.S.
    let trampoline_base = unsafe { addr_of!(trampoline) } as usize;
    let trampoline_uservec =
        TRAMPOLINE + (unsafe { addr_of!(uservec) } as usize - trampoline_base);
    w_stvec(trampoline_uservec as u64);

    // set up trapframe values that uservec will need when the process
    // next traps into the kernel.
    let tf = p.trapframe();
    tf.kernel_satp = r_satp(); // kernel page table
    tf.kernel_sp = (p.kstack + KSTACK_PAGES * PGSIZE) as u64; // process's kernel stack
    tf.kernel_trap = user_trap as usize as u64;
    tf.kernel_hartid = r_tp(); // hartid for cpuid()

    // set up the registers that trampoline.S's sret will use to get
    // to user space.

    // set S Previous Privilege mode to User.
    let mut x = r_sstatus();
    x &= !SSTATUS_SPP; // clear SPP to 0 for user mode
    x |= SSTATUS_SPIE; // enable interrupts in user mode
    w_sstatus(x);

    // set S Exception Program Counter to the saved user pc.
    w_sepc(tf.epc);

    // tell trampoline.S the user page table to switch to.
    let satp = make_satp(p.pagetable as usize);

    // jump to userret in trampoline.S at the top of memory, which
    // switches to the user page table, restores user registers, and
    // switches to user mode with sret.
    let trampoline_userret =
        TRAMPOLINE + (unsafe { addr_of!(userret) } as usize - trampoline_base);
    let userret_fn: extern "C" fn(u64) =
        unsafe { core::mem::transmute(trampoline_userret) };
    userret_fn(satp as u64);
}

/// Interrupts and exceptions from kernel code go here via kernelvec,
/// on whatever the current kernel stack is.
#[no_mangle]
pub extern "C" fn kerneltrap() {
    let sepc = r_sepc();
    let sstatus = r_sstatus();
    let scause = r_scause();

    if sstatus & SSTATUS_SPP == 0 {
        panic!("kerneltrap: not from supervisor mode");
    }
    if intr_get() {
        panic!("kerneltrap: interrupts enabled");
    }

    let which_dev = devintr();
    if which_dev == 0 {
        // interrupt or trap from an unknown source
        log::error!(
            "kerneltrap: scause 0x{:x}, sepc=0x{:x}, stval=0x{:x}",
            scause,
            r_sepc(),
            r_stval()
        );
        panic!("kerneltrap");
    }

    // give up the CPU if this is a timer interrupt.
    if which_dev == 2 && curr_proc_idx().is_some() {
        proc::yield_now();
    }

    // the yield() may have caused some traps to occur, so restore
    // trap registers for use by kernelvec.S's sepc instruction.
    w_sepc(sepc);
    w_sstatus(sstatus);
}

fn clockintr() {
    if proc::cpuid() == 0 {
        let lk = ticks_lock();
        lk.acquire();
        unsafe { TICKS += 1 };
        proc::wakeup(ticks_chan());
        lk.release();
    }

    // ask for the next timer interrupt. this also clears the
    // interrupt request.
    w_stimecmp(r_time() + TIMER_INTERVAL);
}

/// Check if it's an external interrupt or software interrupt and
/// handle it. Returns 2 if timer interrupt, 1 if other device, 0 if
/// not recognized.
fn devintr() -> i32 {
    let scause = r_scause();

    if scause == 0x8000_0000_0000_0009 {
        // this is a supervisor external interrupt, via PLIC.

        // irq indicates which device interrupted.
        let irq = plic::claim();

        if irq == UART0_IRQ {
            uart::intr();
        } else if irq == VIRTIO0_IRQ {
            virtio::virtio_disk::intr();
        } else if irq != 0 {
            log::warn!("unexpected interrupt irq={}", irq);
        }

        // the PLIC allows each device to raise at most one interrupt
        // at a time; tell the PLIC the device is now allowed to
        // interrupt again.
        if irq != 0 {
            plic::complete(irq);
        }

        1
    } else if scause == 0x8000_0000_0000_0005 {
        // timer interrupt.
        clockintr();
        2
    } else {
        0
    }
}
