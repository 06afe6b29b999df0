// Support functions for system calls that involve file descriptors.

use core::ptr::addr_of;
use core::ptr::addr_of_mut;
use core::ptr::null_mut;

use crate::file::{devsw, FDType, File};
use crate::fs::fs::iput;
use crate::fs::BSIZE;
use crate::log::{begin_op, end_op};
use crate::param::{MAXOPBLOCKS, NDEV, NFILE};
use crate::pipe;
use crate::proc::curr_proc;
use crate::spinlock::Spinlock;
use crate::stat::Stat;
use crate::vm::copyout;

struct FTable {
    lock: Spinlock,
    file: [File; NFILE],
}

static mut FTABLE: FTable = FTable {
    lock: Spinlock::new("ftable"),
    file: [const { File::new() }; NFILE],
};

fn ftable() -> &'static mut FTable {
    unsafe { &mut *addr_of_mut!(FTABLE) }
}

/// Allocate a file structure; null when the table is full.
pub fn alloc() -> *mut File {
    let ft = ftable();
    ft.lock.acquire();
    for f in ft.file.iter_mut() {
        if f.ref_cnt == 0 {
            f.ref_cnt = 1;
            ft.lock.release();
            return f;
        }
    }
    ft.lock.release();
    null_mut()
}

/// Increment the ref count for file f.
pub fn dup(f: *mut File) -> *mut File {
    let ft = ftable();
    ft.lock.acquire();
    let fr = unsafe { &mut *f };
    if fr.ref_cnt < 1 {
        panic!("file::dup");
    }
    fr.ref_cnt += 1;
    ft.lock.release();
    f
}

/// Close file f: decrement the ref count, release the underlying pipe
/// or inode when it reaches zero.
pub fn close(f: *mut File) {
    let ft = ftable();
    ft.lock.acquire();
    let fr = unsafe { &mut *f };
    if fr.ref_cnt < 1 {
        panic!("file::close");
    }
    fr.ref_cnt -= 1;
    if fr.ref_cnt > 0 {
        ft.lock.release();
        return;
    }

    let file_type = fr.file_type;
    let pipe = fr.pipe;
    let writable = fr.writable;
    let ip = fr.ip;

    fr.ref_cnt = 0;
    fr.file_type = FDType::None;
    ft.lock.release();

    match file_type {
        FDType::Pipe => pipe::close(pipe, writable),
        FDType::Inode | FDType::Device => {
            begin_op();
            iput(ip);
            end_op();
        }
        FDType::None => {}
    }
}

/// Get metadata about file f; addr is a user virtual address pointing
/// at a Stat.
pub fn stat(f: *mut File, addr: usize) -> i32 {
    let fr = unsafe { &mut *f };
    if fr.file_type != FDType::Inode && fr.file_type != FDType::Device {
        return -1;
    }

    let mut st = Stat {
        dev: 0,
        ino: 0,
        file_type: 0,
        nlink: 0,
        size: 0,
        uid: 0,
        gid: 0,
    };
    let ip = unsafe { &mut *fr.ip };
    ip.ilock();
    ip.stati(&mut st);
    ip.iunlock();

    if !copyout(
        curr_proc().pagetable,
        addr,
        addr_of!(st) as *const u8,
        core::mem::size_of::<Stat>(),
    ) {
        return -1;
    }
    0
}

/// Read from file f; addr is a user virtual address.
pub fn read(f: *mut File, addr: usize, n: usize) -> isize {
    let fr = unsafe { &mut *f };
    if !fr.readable {
        return -1;
    }

    match fr.file_type {
        FDType::Pipe => pipe::read(fr.pipe, addr, n),
        FDType::Device => {
            if fr.major < 0 || fr.major as usize >= NDEV {
                return -1;
            }
            match devsw()[fr.major as usize].read {
                Some(dev_read) => dev_read(true, addr, n),
                None => -1,
            }
        }
        FDType::Inode => {
            let ip = unsafe { &mut *fr.ip };
            ip.ilock();
            let r = ip.readi(true, addr, fr.off, n);
            if r > 0 {
                fr.off += r as u32;
            }
            ip.iunlock();
            r as isize
        }
        FDType::None => panic!("file::read"),
    }
}

/// Write to file f; addr is a user virtual address.
pub fn write(f: *mut File, addr: usize, n: usize) -> isize {
    let fr = unsafe { &mut *f };
    if !fr.writable {
        return -1;
    }

    match fr.file_type {
        FDType::Pipe => pipe::write(fr.pipe, addr, n),
        FDType::Device => {
            if fr.major < 0 || fr.major as usize >= NDEV {
                return -1;
            }
            match devsw()[fr.major as usize].write {
                Some(dev_write) => dev_write(true, addr, n),
                None => -1,
            }
        }
        FDType::Inode => {
            // write a few blocks at a time to avoid exceeding the
            // maximum log transaction size, including i-node, indirect
            // block, allocation blocks, and 2 blocks of slop for
            // non-aligned writes. this really belongs lower down,
            // since writei() might be writing a device like the
            // console.
            let max = ((MAXOPBLOCKS - 1 - 1 - 2) / 2) * BSIZE;
            let mut i = 0;
            while i < n {
                let mut n1 = n - i;
                if n1 > max {
                    n1 = max;
                }

                begin_op();
                let ip = unsafe { &mut *fr.ip };
                ip.ilock();
                let r = ip.writei(true, addr + i, fr.off, n1);
                if r > 0 {
                    fr.off += r as u32;
                }
                ip.iunlock();
                end_op();

                if r != n1 as isize {
                    // error from writei
                    break;
                }
                i += r as usize;
            }
            if i == n {
                n as isize
            } else {
                -1
            }
        }
        FDType::None => panic!("file::write"),
    }
}
