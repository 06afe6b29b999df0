// Physical memory allocator, for user pages, kernel stacks,
// page-table pages, and pipe buffers. Allocates whole 4096-byte
// frames; there is no notion of size.

use core::ptr;
use core::ptr::addr_of_mut;

use crate::memlayout::PHY_END;
use crate::riscv::{pg_round_up, PGSIZE};
use crate::spinlock::Spinlock;
use crate::string::memset;

extern "C" {
    // first address after kernel.
    // defined by kernel.ld.
    static mut end: u8;
}

struct Run {
    next: *mut Run,
}

struct KMem {
    lock: Spinlock,
    freelist: *mut Run,
}

static mut KMEM: KMem = KMem {
    lock: Spinlock::new("kmem"),
    freelist: ptr::null_mut(),
};

fn kmem() -> &'static mut KMem {
    unsafe { &mut *addr_of_mut!(KMEM) }
}

fn kernel_end() -> usize {
    unsafe { addr_of_mut!(end) as usize }
}

pub fn kinit() {
    let mut pa = pg_round_up(kernel_end());
    while pa + PGSIZE <= PHY_END {
        kfree(pa as *mut u8);
        pa += PGSIZE;
    }
}

/// Free the frame of physical memory pointed at by pa, which normally
/// should have been returned by a call to kalloc(). (The exception is
/// when initializing the allocator; see kinit above.)
pub fn kfree(pa: *mut u8) {
    let addr = pa as usize;
    if addr % PGSIZE != 0 || addr < kernel_end() || addr >= PHY_END {
        panic!("kfree");
    }

    // Fill with junk to catch dangling refs.
    memset(pa, 1, PGSIZE);

    let r = pa as *mut Run;
    let km = kmem();
    km.lock.acquire();
    unsafe { (*r).next = km.freelist };
    km.freelist = r;
    km.lock.release();
}

/// Allocate one 4096-byte frame of physical memory.
/// Returns None if the memory cannot be allocated; the frame's
/// contents are junk, callers that need zeros must zero it.
pub fn kalloc() -> Option<*mut u8> {
    let km = kmem();
    km.lock.acquire();
    let r = km.freelist;
    if !r.is_null() {
        km.freelist = unsafe { (*r).next };
    }
    km.lock.release();

    if r.is_null() {
        return None;
    }
    memset(r as *mut u8, 5, PGSIZE); // fill with junk
    Some(r as *mut u8)
}
