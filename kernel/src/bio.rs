// Buffer cache.
//
// The buffer cache holds cached copies of disk block contents in a
// fixed pool of buffers threaded onto an LRU list. Caching disk
// blocks in memory reduces the number of disk reads and also provides
// a synchronization point for disk blocks used by multiple processes.
//
// Interface:
// * To get a buffer for a particular disk block, call bread.
// * After changing buffer data, call bwrite to write it to disk.
// * When done with the buffer, call brelse.
// * Do not use the buffer after calling brelse.
// * Only one process at a time can use a buffer,
//     so do not keep them longer than necessary.

use core::ptr::addr_of_mut;

use crate::buf::Buf;
use crate::param::NBUF;
use crate::spinlock::Spinlock;
use crate::virtio::virtio_disk::disk_rw;

/// list-head sentinel for the LRU links
pub const NO_BUF: usize = NBUF;

struct BCache {
    lock: Spinlock,
    buf: [Buf; NBUF],

    // Doubly linked list of all buffers, through prev/next indices,
    // sorted by how recently the buffer was used. head_next is most
    // recent, head_prev is least.
    head_next: usize,
    head_prev: usize,
}

static mut BCACHE: BCache = BCache {
    lock: Spinlock::new("bcache"),
    buf: [const { Buf::new() }; NBUF],
    head_next: NO_BUF,
    head_prev: NO_BUF,
};

fn bcache() -> &'static mut BCache {
    unsafe { &mut *addr_of_mut!(BCACHE) }
}

impl BCache {
    fn unlink(&mut self, i: usize) {
        let prev = self.buf[i].prev;
        let next = self.buf[i].next;
        if prev == NO_BUF {
            self.head_next = next;
        } else {
            self.buf[prev].next = next;
        }
        if next == NO_BUF {
            self.head_prev = prev;
        } else {
            self.buf[next].prev = prev;
        }
    }

    fn push_front(&mut self, i: usize) {
        self.buf[i].prev = NO_BUF;
        self.buf[i].next = self.head_next;
        if self.head_next == NO_BUF {
            self.head_prev = i;
        } else {
            self.buf[self.head_next].prev = i;
        }
        self.head_next = i;
    }
}

pub fn init() {
    let bc = bcache();
    for i in 0..NBUF {
        bc.push_front(i);
    }
}

/// Look through the buffer cache for block blockno on device dev. If
/// not found, repurpose the first unused buffer from the front of the
/// list. In either case, return a locked buffer.
fn bget(dev: u32, blockno: u32) -> &'static mut Buf {
    let bc = bcache();
    bc.lock.acquire();

    // Is the block already cached?
    let mut i = bc.head_next;
    while i != NO_BUF {
        if bc.buf[i].dev == dev && bc.buf[i].blockno == blockno {
            bc.buf[i].refcnt += 1;
            bc.lock.release();
            bc.buf[i].lock.acquire();
            return &mut bcache().buf[i];
        }
        i = bc.buf[i].next;
    }

    // Not cached.
    // Scan from the front again and repurpose the first unused
    // buffer; brelse pushes freed buffers to the front, so this picks
    // the most-recently-freed one.
    let mut i = bc.head_next;
    while i != NO_BUF {
        let b = &mut bc.buf[i];
        if b.refcnt == 0 {
            b.dev = dev;
            b.blockno = blockno;
            b.valid = false;
            b.refcnt = 1;
            bc.lock.release();
            bc.buf[i].lock.acquire();
            return &mut bcache().buf[i];
        }
        i = bc.buf[i].next;
    }

    panic!("bget: no buffers");
}

/// Return a locked buf with the contents of the indicated block.
pub fn bread(dev: u32, blockno: u32) -> &'static mut Buf {
    let b = bget(dev, blockno);
    if !b.valid {
        disk_rw(b, false);
        b.valid = true;
    }
    b
}

/// Write b's contents to disk. Must be locked.
pub fn bwrite(b: &mut Buf) {
    if !b.lock.holding() {
        panic!("bwrite");
    }
    disk_rw(b, true);
}

/// Release a locked buffer; when the last reference goes away, move
/// the buffer to the head of the most-recently-used list.
pub fn brelse(b: &mut Buf) {
    if !b.lock.holding() {
        panic!("brelse");
    }

    b.lock.release();

    let bc = bcache();
    let i = {
        let base = bc.buf.as_ptr() as usize;
        (b as *const Buf as usize - base) / core::mem::size_of::<Buf>()
    };

    bc.lock.acquire();
    bc.buf[i].refcnt -= 1;
    if bc.buf[i].refcnt == 0 {
        // no one is waiting for it.
        bc.unlink(i);
        bc.push_front(i);
    }
    bc.lock.release();
}

pub fn bpin(b: &mut Buf) {
    let bc = bcache();
    bc.lock.acquire();
    b.refcnt += 1;
    bc.lock.release();
}

pub fn bunpin(b: &mut Buf) {
    let bc = bcache();
    bc.lock.acquire();
    b.refcnt -= 1;
    bc.lock.release();
}
