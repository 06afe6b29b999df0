// System-call dispatch and argument fetch.

pub(crate) mod sysfile;
mod sysproc;

use crate::proc::curr_proc;
use crate::vm::{copyin, copyinstr};

// System call numbers: a7 selects, a0..a6 carry arguments, a0 takes
// the return value.
pub const SYS_FORK: usize = 0;
pub const SYS_EXIT: usize = 1;
pub const SYS_WAIT: usize = 2;
pub const SYS_PIPE: usize = 3;
pub const SYS_READ: usize = 4;
pub const SYS_KILL: usize = 5;
pub const SYS_EXEC: usize = 6;
pub const SYS_FSTAT: usize = 7;
pub const SYS_CHDIR: usize = 8;
pub const SYS_DUP: usize = 9;
pub const SYS_GETPID: usize = 10;
pub const SYS_SBRK: usize = 11;
pub const SYS_SLEEP: usize = 12;
pub const SYS_UPTIME: usize = 13;
pub const SYS_OPEN: usize = 14;
pub const SYS_WRITE: usize = 15;
pub const SYS_MKNOD: usize = 16;
pub const SYS_UNLINK: usize = 17;
pub const SYS_LINK: usize = 18;
pub const SYS_MKDIR: usize = 19;
pub const SYS_CLOSE: usize = 20;
pub const SYS_SETUID: usize = 21;
pub const SYS_SETGID: usize = 22;

const SYSCALLS: [fn() -> u64; 23] = [
    sysproc::sys_fork,
    sysproc::sys_exit,
    sysproc::sys_wait,
    sysfile::sys_pipe,
    sysfile::sys_read,
    sysproc::sys_kill,
    sysfile::sys_exec,
    sysfile::sys_fstat,
    sysfile::sys_chdir,
    sysfile::sys_dup,
    sysproc::sys_getpid,
    sysproc::sys_sbrk,
    sysproc::sys_sleep,
    sysproc::sys_uptime,
    sysfile::sys_open,
    sysfile::sys_write,
    sysfile::sys_mknod,
    sysfile::sys_unlink,
    sysfile::sys_link,
    sysfile::sys_mkdir,
    sysfile::sys_close,
    sysproc::sys_setuid,
    sysproc::sys_setgid,
];

pub fn syscall() {
    let p = curr_proc();
    let num = p.trapframe().a7 as usize;

    if num < SYSCALLS.len() {
        // Use num to look up the system call function, call it, and
        // store its return value in a0.
        p.trapframe().a0 = SYSCALLS[num]();
    } else {
        log::warn!("{} {}: unknown syscall {}", p.pid, p.name_str(), num);
        p.trapframe().a0 = u64::MAX;
    }
}

/// Fetch the index'th raw system call argument.
pub(super) fn arg_u64(index: usize) -> u64 {
    let tf = curr_proc().trapframe();
    match index {
        0 => tf.a0,
        1 => tf.a1,
        2 => tf.a2,
        3 => tf.a3,
        4 => tf.a4,
        5 => tf.a5,
        6 => tf.a6,
        _ => panic!("arg_u64"),
    }
}

pub(super) fn arg_i32(index: usize) -> i32 {
    arg_u64(index) as i32
}

/// Fetch the u64 at addr from the current process.
pub(super) fn fetch_addr(addr: usize, out: &mut u64) -> bool {
    let p = curr_proc();
    // both tests needed, in case of overflow
    if addr >= p.sz || addr + core::mem::size_of::<u64>() > p.sz {
        return false;
    }
    copyin(
        p.pagetable,
        out as *mut u64 as *mut u8,
        addr,
        core::mem::size_of::<u64>(),
    )
}

/// Fetch the NUL-terminated string at addr from the current process.
pub(super) fn fetch_str(addr: usize, buf: &mut [u8]) -> bool {
    let p = curr_proc();
    copyinstr(p.pagetable, buf.as_mut_ptr(), addr, buf.len())
}

/// Fetch the index'th argument as a string pointer and copy the
/// string in.
pub(super) fn arg_str(index: usize, buf: &mut [u8]) -> bool {
    let addr = arg_u64(index) as usize;
    fetch_str(addr, buf)
}
