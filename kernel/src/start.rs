// Machine-mode boot: entry.S jumps here on every hart with a small
// per-hart stack; configure M-mode and drop into supervisor main().

use crate::kmain;
use crate::param::NCPU;
use crate::riscv::*;

#[repr(C, align(16))]
struct Stack0([u8; 4096 * NCPU]);

// entry.S needs one stack per hart.
#[no_mangle]
static mut stack0: Stack0 = Stack0([0; 4096 * NCPU]);

#[no_mangle]
extern "C" fn start() {
    // set M Previous Privilege mode to Supervisor, for mret.
    let mut x = r_mstatus();
    x &= !MSTATUS_MPP_MASK;
    x |= MSTATUS_MPP_S;
    w_mstatus(x);

    // set M Exception Program Counter to main, for mret.
    // requires code-model=medium
    w_mepc(kmain as usize as u64);

    // disable paging for now.
    w_satp(0);

    // delegate all interrupts and exceptions to supervisor mode.
    w_medeleg(0xffff);
    w_mideleg(0xffff);
    w_sie(r_sie() | SIE_SEIE | SIE_STIE | SIE_SSIE);

    // configure Physical Memory Protection to give supervisor mode
    // access to all of physical memory.
    w_pmpaddr0(0x3fffffffffffff);
    w_pmpcfg0(0xf);

    // ask for clock interrupts.
    timerinit();

    // keep each CPU's hartid in its tp register, for cpuid().
    w_tp(r_mhartid());

    // switch to supervisor mode and jump to main().
    unsafe { core::arch::asm!("mret") }
}

/// Arrange to receive timer interrupts in supervisor mode via the
/// Sstc extension, which lets S-mode program stimecmp directly.
fn timerinit() {
    // enable supervisor-mode timer interrupts.
    w_mie(r_mie() | MIE_STIE);

    // enable the sstc extension (i.e. stimecmp).
    w_menvcfg(r_menvcfg() | MENVCFG_STCE);

    // allow supervisor to use stimecmp and time.
    w_mcounteren(r_mcounteren() | MCOUNTEREN_TM);

    // ask for the very first timer interrupt.
    w_stimecmp(r_time() + 1_000_000);
}
