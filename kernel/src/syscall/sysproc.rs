// Process-related system calls.

use crate::proc::{self, curr_proc};
use crate::syscall::{arg_i32, arg_u64};
use crate::trap;

const ERR: u64 = u64::MAX;

pub fn sys_fork() -> u64 {
    match proc::fork() {
        -1 => ERR,
        pid => pid as u64,
    }
}

pub fn sys_exit() -> u64 {
    let status = arg_i32(0);
    proc::exit(status);
}

pub fn sys_wait() -> u64 {
    let addr = arg_u64(0) as usize;
    match proc::wait(addr) {
        -1 => ERR,
        pid => pid as u64,
    }
}

pub fn sys_kill() -> u64 {
    let pid = arg_u64(0) as u32;
    proc::kill(pid) as u64
}

pub fn sys_getpid() -> u64 {
    curr_proc().pid as u64
}

pub fn sys_sbrk() -> u64 {
    let n = arg_i32(0);
    let sz = curr_proc().sz;
    if proc::grow(n as i64) < 0 {
        return ERR;
    }
    sz as u64
}

/// Sleep for n clock ticks.
pub fn sys_sleep() -> u64 {
    let n = arg_u64(0) as u32;

    let lk = trap::ticks_lock();
    lk.acquire();
    let ticks0 = trap::ticks();
    while trap::ticks().wrapping_sub(ticks0) < n {
        if proc::get_killed(curr_proc()) {
            lk.release();
            return ERR;
        }
        proc::sleep(trap::ticks_chan(), lk);
    }
    lk.release();
    0
}

/// How many clock ticks have passed since boot.
pub fn sys_uptime() -> u64 {
    let lk = trap::ticks_lock();
    lk.acquire();
    let t = trap::ticks();
    lk.release();
    t as u64
}

pub fn sys_setuid() -> u64 {
    let id = arg_u64(0) as u32;
    let p = curr_proc();
    p.cred.lock.acquire();
    p.cred.uid = id;
    p.cred.lock.release();
    0
}

pub fn sys_setgid() -> u64 {
    let id = arg_u64(0) as u32;
    let p = curr_proc();
    p.cred.lock.acquire();
    p.cred.gid = id;
    p.cred.lock.release();
    0
}
