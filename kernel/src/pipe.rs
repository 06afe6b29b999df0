use core::ptr::addr_of;
use core::ptr::addr_of_mut;

use crate::file::file::{alloc as file_alloc, close as file_close};
use crate::file::{FDType, File};
use crate::kalloc::{kalloc, kfree};
use crate::proc::{curr_proc, get_killed, sleep, wakeup};
use crate::spinlock::Spinlock;
use crate::vm::{copyin, copyout};

pub const PIPESIZE: usize = 512;

pub struct Pipe {
    lock: Spinlock,
    data: [u8; PIPESIZE],
    nread: u32,      // number of bytes read
    nwrite: u32,     // number of bytes written
    readopen: bool,  // read fd is still open
    writeopen: bool, // write fd is still open
}

static_assertions::const_assert!(core::mem::size_of::<Pipe>() <= crate::riscv::PGSIZE);

impl Pipe {
    fn read_chan(&self) -> usize {
        addr_of!(self.nread) as usize
    }

    fn write_chan(&self) -> usize {
        addr_of!(self.nwrite) as usize
    }
}

/// Allocate a pipe and two files oriented around it; the pipe itself
/// lives in a frame of its own.
pub fn alloc() -> Option<(*mut File, *mut File)> {
    let f0 = file_alloc();
    let f1 = file_alloc();
    let frame = kalloc();

    if f0.is_null() || f1.is_null() || frame.is_none() {
        if let Some(frame) = frame {
            kfree(frame);
        }
        if !f0.is_null() {
            file_close(f0);
        }
        if !f1.is_null() {
            file_close(f1);
        }
        return None;
    }

    let pi = frame.unwrap() as *mut Pipe;
    unsafe {
        core::ptr::write(
            pi,
            Pipe {
                lock: Spinlock::new("pipe"),
                data: [0; PIPESIZE],
                nread: 0,
                nwrite: 0,
                readopen: true,
                writeopen: true,
            },
        );

        (*f0).file_type = FDType::Pipe;
        (*f0).readable = true;
        (*f0).writable = false;
        (*f0).pipe = pi;
        (*f1).file_type = FDType::Pipe;
        (*f1).readable = false;
        (*f1).writable = true;
        (*f1).pipe = pi;
    }

    Some((f0, f1))
}

pub fn close(pi: *mut Pipe, writable: bool) {
    let p = unsafe { &mut *pi };
    p.lock.acquire();
    if writable {
        p.writeopen = false;
        wakeup(p.read_chan());
    } else {
        p.readopen = false;
        wakeup(p.write_chan());
    }
    if !p.readopen && !p.writeopen {
        p.lock.release();
        kfree(pi as *mut u8);
    } else {
        p.lock.release();
    }
}

pub fn write(pi: *mut Pipe, addr: usize, n: usize) -> isize {
    let p = unsafe { &mut *pi };
    let pr = curr_proc();

    p.lock.acquire();
    let mut i = 0;
    while i < n {
        if !p.readopen || get_killed(pr) {
            p.lock.release();
            return -1;
        }
        if p.nwrite == p.nread + PIPESIZE as u32 {
            // pipe is full; wait for a reader to drain it.
            wakeup(p.read_chan());
            let chan = p.write_chan();
            sleep(chan, &mut p.lock);
        } else {
            let mut ch = 0u8;
            if !copyin(pr.pagetable, addr_of_mut!(ch), addr + i, 1) {
                break;
            }
            p.data[p.nwrite as usize % PIPESIZE] = ch;
            p.nwrite += 1;
            i += 1;
        }
    }
    wakeup(p.read_chan());
    p.lock.release();

    i as isize
}

pub fn read(pi: *mut Pipe, addr: usize, n: usize) -> isize {
    let p = unsafe { &mut *pi };
    let pr = curr_proc();

    p.lock.acquire();
    while p.nread == p.nwrite && p.writeopen {
        // pipe is empty; wait for a writer.
        if get_killed(pr) {
            p.lock.release();
            return -1;
        }
        let chan = p.read_chan();
        sleep(chan, &mut p.lock);
    }

    let mut i = 0;
    while i < n {
        if p.nread == p.nwrite {
            break;
        }
        let ch = p.data[p.nread as usize % PIPESIZE];
        p.nread += 1;
        if !copyout(pr.pagetable, addr + i, addr_of!(ch), 1) {
            break;
        }
        i += 1;
    }
    wakeup(p.write_chan());
    p.lock.release();

    i as isize
}
