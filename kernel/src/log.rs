// Write-ahead logging for concurrent FS system calls.
//
// A log transaction contains the updates of multiple FS system calls;
// the logging system only commits when there are no FS system calls
// active, so there is never any reasoning required about whether a
// commit might write an uncommitted system call's updates to disk.
//
// A system call should call begin_op()/end_op() to mark its start and
// end. Usually begin_op() just increments the count of in-progress FS
// system calls and returns; but if it thinks the log is close to
// running out, it sleeps until the last outstanding end_op() commits.
//
// The log is a physical re-do log containing disk blocks. The on-disk
// format:
//   header block, containing block #s for block A, B, C, ...
//   block A
//   block B
//   block C
//   ...
// Log appends are synchronous.

use core::mem;
use core::ptr::addr_of;
use core::ptr::addr_of_mut;

use crate::bio::{bpin, bread, brelse, bunpin, bwrite};
use crate::buf::Buf;
use crate::fs::{SuperBlock, BSIZE};
use crate::param::{LOGSIZE, MAXOPBLOCKS};
use crate::proc::{sleep, wakeup};
use crate::spinlock::Spinlock;
use crate::string::memmove;

// Contents of the header block, used both for the on-disk header
// block and to keep track in memory of logged block numbers before
// commit.
#[repr(C)]
struct LogHeader {
    n: u32,
    block: [u32; LOGSIZE],
}

static_assertions::const_assert!(mem::size_of::<LogHeader>() < BSIZE);

struct Log {
    lock: Spinlock,
    start: u32,
    size: u32,
    outstanding: u32, // how many FS sys calls are executing.
    committing: bool, // in commit(), please wait.
    dev: u32,
    lh: LogHeader,
}

static mut LOG: Log = Log {
    lock: Spinlock::new("log"),
    start: 0,
    size: 0,
    outstanding: 0,
    committing: false,
    dev: 0,
    lh: LogHeader {
        n: 0,
        block: [0; LOGSIZE],
    },
};

fn log() -> &'static mut Log {
    unsafe { &mut *addr_of_mut!(LOG) }
}

fn log_chan() -> usize {
    unsafe { addr_of!(LOG) as usize }
}

pub fn init(dev: u32, sb: &SuperBlock) {
    let lg = log();
    lg.start = sb.logstart;
    lg.size = sb.nlog;
    lg.dev = dev;
    recover();
}

/// Read the log header from disk into the in-memory log header.
fn read_head() {
    let lg = log();
    let buf = bread(lg.dev, lg.start);
    let lh = unsafe { &*(buf.data.as_ptr() as *const LogHeader) };
    lg.lh.n = lh.n;
    for i in 0..lg.lh.n as usize {
        lg.lh.block[i] = lh.block[i];
    }
    brelse(buf);
}

/// Write the in-memory log header to disk. This is the true point at
/// which the current transaction commits.
fn write_head() {
    let lg = log();
    let buf = bread(lg.dev, lg.start);
    let hb = unsafe { &mut *(buf.data.as_mut_ptr() as *mut LogHeader) };
    hb.n = lg.lh.n;
    for i in 0..lg.lh.n as usize {
        hb.block[i] = lg.lh.block[i];
    }
    bwrite(buf);
    brelse(buf);
}

/// Copy committed blocks from the log to their home location.
fn install_trans(recovering: bool) {
    let lg = log();
    for tail in 0..lg.lh.n as usize {
        let lbuf = bread(lg.dev, lg.start + tail as u32 + 1); // log block
        let dbuf = bread(lg.dev, lg.lh.block[tail]); // home block
        memmove(dbuf.data.as_mut_ptr(), lbuf.data.as_ptr(), BSIZE);
        bwrite(dbuf);
        if recovering {
            bwrite(dbuf);
        } else {
            bunpin(dbuf);
        }
        brelse(lbuf);
        brelse(dbuf);
    }
}

fn recover() {
    read_head();
    install_trans(true); // if committed, copy from log to disk
    log().lh.n = 0;
    write_head(); // clear the log
}

/// called at the start of each FS system call.
pub fn begin_op() {
    let lg = log();
    lg.lock.acquire();
    loop {
        if lg.committing
            || lg.lh.n as usize + (lg.outstanding as usize + 1) * MAXOPBLOCKS > LOGSIZE
        {
            // this op might exhaust log space; wait for commit.
            sleep(log_chan(), &mut lg.lock);
        } else {
            lg.outstanding += 1;
            lg.lock.release();
            break;
        }
    }
}

/// Called at the end of each FS system call; commits if this was the
/// last outstanding operation.
pub fn end_op() {
    let lg = log();
    let mut do_commit = false;

    lg.lock.acquire();
    lg.outstanding -= 1;
    if lg.committing {
        panic!("log::end_op: log committing");
    }
    if lg.outstanding == 0 {
        do_commit = true;
        lg.committing = true;
    } else {
        // begin_op() may be waiting for log space, and decrementing
        // outstanding has decreased the amount of reserved space.
        wakeup(log_chan());
    }
    lg.lock.release();

    if do_commit {
        // call commit w/o holding locks, since not allowed to sleep
        // with locks.
        commit();
        lg.lock.acquire();
        lg.committing = false;
        wakeup(log_chan());
        lg.lock.release();
    }
}

/// Copy modified blocks from cache to the on-disk log.
fn write_log() {
    let lg = log();
    for tail in 0..lg.lh.n as usize {
        let to = bread(lg.dev, lg.start + tail as u32 + 1); // log block
        let from = bread(lg.dev, lg.lh.block[tail]); // cache block
        memmove(to.data.as_mut_ptr(), from.data.as_ptr(), BSIZE);
        bwrite(to); // write the log
        brelse(from);
        brelse(to);
    }
}

fn commit() {
    let lg = log();
    if lg.lh.n > 0 {
        write_log(); // Write modified blocks from cache to log
        write_head(); // Write header to disk -- the real commit
        install_trans(false); // Now install writes to home locations
        lg.lh.n = 0;
        write_head(); // Erase the transaction from the log
    }
}

/// Caller has modified b->data and is done with the buffer; record the
/// block number and pin the buffer in the cache by increasing its
/// refcnt. commit() will do the disk write.
///
/// lwrite() replaces bwrite(); a typical use is:
///   let bp = bread(...);
///   modify bp.data[]
///   lwrite(bp);
///   brelse(bp);
pub fn lwrite(b: &mut Buf) {
    let lg = log();
    lg.lock.acquire();
    if lg.lh.n as usize >= LOGSIZE || lg.lh.n >= lg.size - 1 {
        panic!("too big a transaction");
    }
    if lg.outstanding < 1 {
        panic!("lwrite outside of trans");
    }

    let mut i = 0;
    while i < lg.lh.n as usize {
        if lg.lh.block[i] == b.blockno {
            // log absorption
            break;
        }
        i += 1;
    }
    lg.lh.block[i] = b.blockno;
    if i == lg.lh.n as usize {
        // Adds a new block to the log.
        bpin(b);
        lg.lh.n += 1;
    }
    lg.lock.release();
}
