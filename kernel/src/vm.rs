// Sv39 page tables: the kernel's direct map, per-process address
// spaces, and the user/kernel copy primitives.

use core::ptr::addr_of;
use core::ptr::addr_of_mut;
use core::ptr::null_mut;

use crate::kalloc::{kalloc, kfree};
use crate::memlayout::{KERNEL_BASE, PHY_END, PLIC, TRAMPOLINE, UART0, VIRTIO0};
use crate::proc;
use crate::riscv::{
    make_satp, pa2pte, pg_round_down, pg_round_up, px, sfence_vma, w_satp, PageTable, Pte, PGSIZE,
    PTE_R, PTE_U, PTE_V, PTE_W, PTE_X, VA_MAX,
};
use crate::string::{memmove, memset};

/*
 * the kernel's page table.
 */
static mut KERNEL_PAGETABLE: *mut PageTable = null_mut();

extern "C" {
    static etext: u8; // kernel.ld sets this to end of kernel code.
    static trampoline: u8; // trampoline.S
}

fn etext_addr() -> usize {
    unsafe { addr_of!(etext) as usize }
}

pub fn trampoline_addr() -> usize {
    unsafe { addr_of!(trampoline) as usize }
}

// Make a direct-map page table for the kernel.
fn kvm_make() -> *mut PageTable {
    let kpt = match uvm_create() {
        Some(pt) => pt,
        None => panic!("kvm_make: out of memory"),
    };

    // uart registers
    kvm_map(kpt, UART0, UART0, PGSIZE, PTE_R | PTE_W);

    // virtio mmio disk interface
    kvm_map(kpt, VIRTIO0, VIRTIO0, PGSIZE, PTE_R | PTE_W);

    // PLIC
    kvm_map(kpt, PLIC, PLIC, 0x40_0000, PTE_R | PTE_W);

    // map kernel text executable and read-only.
    kvm_map(kpt, KERNEL_BASE, KERNEL_BASE, etext_addr() - KERNEL_BASE, PTE_R | PTE_X);

    // map kernel data and the physical RAM we'll make use of.
    kvm_map(kpt, etext_addr(), etext_addr(), PHY_END - etext_addr(), PTE_R | PTE_W);

    // map the trampoline for trap entry/exit to
    // the highest virtual address in the kernel.
    kvm_map(kpt, TRAMPOLINE, trampoline_addr(), PGSIZE, PTE_R | PTE_X);

    // allocate and map a kernel stack for each process.
    proc::map_stacks(kpt);

    kpt
}

// Initialize the one kernel_pagetable. Runs once, on the boot hart.
pub fn init() {
    unsafe { KERNEL_PAGETABLE = kvm_make() };
}

// Switch the hart's satp to the kernel's page table and enable paging.
pub fn inithart() {
    // wait for any previous writes to the page-table memory to finish.
    sfence_vma();

    w_satp(make_satp(unsafe { KERNEL_PAGETABLE } as usize) as u64);

    // flush stale entries from the TLB.
    sfence_vma();
}

// add a mapping to the kernel page table.
// only used when booting; does not flush TLB or enable paging.
fn kvm_map(kpt: *mut PageTable, va: usize, pa: usize, sz: usize, perm: usize) {
    if !map_pages(kpt, va, pa, pg_round_up(sz), perm) {
        panic!("kvm_map");
    }
}

/// Return a pointer to the leaf PTE in page table `pagetable` that
/// corresponds to virtual address va. When `alloc` is true, create any
/// required page-table pages.
///
/// The risc-v Sv39 scheme has three levels of page-table pages. A
/// page-table page contains 512 64-bit PTEs. A 64-bit virtual address
/// is split into five fields:
///   39..63 -- must be zero.
///   30..38 -- 9 bits of level-2 index.
///   21..29 -- 9 bits of level-1 index.
///   12..20 -- 9 bits of level-0 index.
///    0..11 -- 12 bits of byte offset within the page.
fn walk(pagetable: *mut PageTable, va: usize, alloc: bool) -> Option<*mut Pte> {
    if va > VA_MAX {
        panic!("walk");
    }

    let mut pt = pagetable;
    for level in (1..=2).rev() {
        let pte = unsafe { &mut (*pt).0[px(level, va)] };
        if pte.is_valid() {
            pt = pte.pa() as *mut PageTable;
        } else {
            if !alloc {
                return None;
            }
            let next = kalloc()? as *mut PageTable;
            memset(next as *mut u8, 0, PGSIZE);
            *pte = Pte(pa2pte(next as usize) | PTE_V);
            pt = next;
        }
    }

    Some(unsafe { addr_of_mut!((*pt).0[px(0, va)]) })
}

/// Look up a virtual address and return its physical address, or 0 if
/// not mapped with user permission. Only used to look up user pages.
pub fn walkaddr(pagetable: *mut PageTable, va: usize) -> usize {
    if va > VA_MAX {
        return 0;
    }

    let pte = match walk(pagetable, va, false) {
        Some(p) => unsafe { &*p },
        None => return 0,
    };
    if !pte.is_valid() || pte.0 & PTE_U == 0 {
        return 0;
    }
    pte.pa()
}

/// Create PTEs for virtual addresses starting at va that refer to
/// physical addresses starting at pa. va and size must be
/// page-aligned, size non-zero. Panics on an attempt to remap an
/// already-valid PTE; returns false if walk() couldn't allocate a
/// needed page-table page (the mapping is left partial and the caller
/// unmaps its work).
pub fn map_pages(pagetable: *mut PageTable, va: usize, pa: usize, size: usize, perm: usize) -> bool {
    if va % PGSIZE != 0 {
        panic!("map_pages: va not aligned");
    }
    if size % PGSIZE != 0 {
        panic!("map_pages: size not aligned");
    }
    if size == 0 {
        panic!("map_pages: size");
    }

    let mut a = va;
    let mut pa = pa;
    let last = va + size - PGSIZE;
    loop {
        let pte = match walk(pagetable, a, true) {
            Some(p) => unsafe { &mut *p },
            None => return false,
        };
        if pte.is_valid() {
            panic!("map_pages: remap");
        }
        *pte = Pte(pa2pte(pa) | perm | PTE_V);
        if a == last {
            break;
        }
        a += PGSIZE;
        pa += PGSIZE;
    }
    true
}

/// Remove npages of mappings starting from va. va must be
/// page-aligned and the intermediate levels must exist; a non-present
/// leaf is tolerated (user regions are sparse). Optionally free the
/// physical frames.
pub fn uvm_unmap(pagetable: *mut PageTable, va: usize, npages: usize, do_free: bool) {
    if va % PGSIZE != 0 {
        panic!("uvm_unmap: not aligned");
    }

    let mut a = va;
    while a < va + npages * PGSIZE {
        let pte = match walk(pagetable, a, false) {
            Some(p) => unsafe { &mut *p },
            None => panic!("uvm_unmap: walk"),
        };
        if !pte.is_valid() {
            a += PGSIZE;
            continue;
        }
        if pte.flags() == PTE_V {
            panic!("uvm_unmap: not a leaf");
        }
        if do_free {
            kfree(pte.pa() as *mut u8);
        }
        *pte = Pte::invalid();
        a += PGSIZE;
    }
}

/// create an empty user page table.
/// returns None if out of memory.
pub fn uvm_create() -> Option<*mut PageTable> {
    let pt = kalloc()? as *mut PageTable;
    memset(pt as *mut u8, 0, PGSIZE);
    Some(pt)
}

/// Load initcode into address 0 of pagetable, for the very first
/// process. sz must be less than a page.
pub fn uvm_first(pagetable: *mut PageTable, src: *const u8, sz: usize) {
    if sz > PGSIZE {
        panic!("uvm_first: more than a page");
    }

    let mem = match kalloc() {
        Some(m) => m,
        None => panic!("uvm_first: out of memory"),
    };
    memset(mem, 0, PGSIZE);
    map_pages(pagetable, 0, mem as usize, PGSIZE, PTE_R | PTE_W | PTE_X | PTE_U);
    memmove(mem, src, sz);
}

/// Allocate PTEs and physical memory to grow a process from oldsz to
/// newsz, which need not be page aligned. Returns new size or 0 on
/// error, rolling back whatever it allocated.
pub fn uvm_alloc(pagetable: *mut PageTable, oldsz: usize, newsz: usize, xperm: usize) -> usize {
    if newsz < oldsz {
        return oldsz;
    }

    let oldsz = pg_round_up(oldsz);
    let mut a = oldsz;
    while a < newsz {
        let mem = match kalloc() {
            Some(m) => m,
            None => {
                uvm_dealloc(pagetable, a, oldsz);
                return 0;
            }
        };
        memset(mem, 0, PGSIZE);
        if !map_pages(pagetable, a, mem as usize, PGSIZE, PTE_R | PTE_U | xperm) {
            kfree(mem);
            uvm_dealloc(pagetable, a, oldsz);
            return 0;
        }
        a += PGSIZE;
    }
    newsz
}

/// Deallocate user pages to bring the process size from oldsz to
/// newsz. oldsz and newsz need not be page-aligned. Returns the new
/// process size.
pub fn uvm_dealloc(pagetable: *mut PageTable, oldsz: usize, newsz: usize) -> usize {
    if newsz >= oldsz {
        return oldsz;
    }

    if pg_round_up(newsz) < pg_round_up(oldsz) {
        let npages = (pg_round_up(oldsz) - pg_round_up(newsz)) / PGSIZE;
        uvm_unmap(pagetable, pg_round_up(newsz), npages, true);
    }

    newsz
}

// Recursively free page-table pages.
// All leaf mappings must already have been removed.
fn free_walk(pagetable: *mut PageTable) {
    // there are 2^9 = 512 PTEs in a page table.
    for i in 0..512 {
        let pte = unsafe { (*pagetable).0[i] };
        if pte.is_branch() {
            // this PTE points to a lower-level page table.
            free_walk(pte.pa() as *mut PageTable);
            unsafe { (*pagetable).0[i] = Pte::invalid() };
        } else if pte.is_valid() {
            panic!("free_walk: leaf");
        }
    }
    kfree(pagetable as *mut u8);
}

/// Free user memory pages, then free page-table pages.
pub fn uvm_free(pagetable: *mut PageTable, sz: usize) {
    if sz > 0 {
        uvm_unmap(pagetable, 0, pg_round_up(sz) / PGSIZE, true);
    }
    free_walk(pagetable);
}

/// Given a parent process's page table, copy its memory into a
/// child's page table: both the page-table pages and the physical
/// memory. Holes are tolerated. On failure frees any allocated pages.
pub fn uvm_copy(old: *mut PageTable, new: *mut PageTable, sz: usize) -> bool {
    let mut i = 0;
    while i < sz {
        let pte = match walk(old, i, false) {
            Some(p) => unsafe { &*p },
            None => panic!("uvm_copy: pte should exist"),
        };
        if !pte.is_valid() {
            i += PGSIZE;
            continue;
        }

        let pa = pte.pa();
        let flags = pte.flags();

        let mem = match kalloc() {
            Some(m) => m,
            None => {
                uvm_unmap(new, 0, i / PGSIZE, true);
                return false;
            }
        };
        memmove(mem, pa as *const u8, PGSIZE);

        if !map_pages(new, i, mem as usize, PGSIZE, flags) {
            kfree(mem);
            uvm_unmap(new, 0, i / PGSIZE, true);
            return false;
        }
        i += PGSIZE;
    }
    true
}

/// Mark a PTE invalid for user access; used for the stack guard page.
pub fn uvm_clear(pagetable: *mut PageTable, va: usize) {
    let pte = match walk(pagetable, va, false) {
        Some(p) => unsafe { &mut *p },
        None => panic!("uvm_clear"),
    };
    pte.0 &= !PTE_U;
}

/// Copy len bytes from src to user address dstva in a given page
/// table. Each touched page must be valid, user and writable.
pub fn copyout(pagetable: *mut PageTable, dstva: usize, src: *const u8, len: usize) -> bool {
    let mut dstva = dstva;
    let mut src = src;
    let mut len = len;

    while len > 0 {
        let va0 = pg_round_down(dstva);
        if va0 > VA_MAX {
            return false;
        }

        let pte = match walk(pagetable, va0, false) {
            Some(p) => unsafe { &mut *p },
            None => return false,
        };
        if !pte.is_valid() || pte.0 & PTE_U == 0 || pte.0 & PTE_W == 0 {
            return false;
        }

        let pa0 = pte.pa();
        let mut n = PGSIZE - (dstva - va0);
        if n > len {
            n = len;
        }
        memmove((pa0 + (dstva - va0)) as *mut u8, src, n);

        len -= n;
        src = unsafe { src.add(n) };
        dstva = va0 + PGSIZE;
    }
    true
}

/// Copy len bytes to dst from user address srcva in a given page table.
pub fn copyin(pagetable: *mut PageTable, dst: *mut u8, srcva: usize, len: usize) -> bool {
    let mut dst = dst;
    let mut srcva = srcva;
    let mut len = len;

    while len > 0 {
        let va0 = pg_round_down(srcva);
        let pa0 = walkaddr(pagetable, va0);
        if pa0 == 0 {
            return false;
        }

        let mut n = PGSIZE - (srcva - va0);
        if n > len {
            n = len;
        }
        memmove(dst, (pa0 + (srcva - va0)) as *const u8, n);

        len -= n;
        dst = unsafe { dst.add(n) };
        srcva = va0 + PGSIZE;
    }
    true
}

/// Copy a null-terminated string to dst from user address srcva,
/// copying bytes until a NUL or max. Returns true once the NUL has
/// been read.
pub fn copyinstr(pagetable: *mut PageTable, dst: *mut u8, srcva: usize, max: usize) -> bool {
    let mut dst = dst;
    let mut srcva = srcva;
    let mut max = max;

    while max > 0 {
        let va0 = pg_round_down(srcva);
        let pa0 = walkaddr(pagetable, va0);
        if pa0 == 0 {
            return false;
        }

        let mut n = PGSIZE - (srcva - va0);
        if n > max {
            n = max;
        }

        let mut p = (pa0 + (srcva - va0)) as *const u8;
        while n > 0 {
            unsafe {
                if *p == 0 {
                    *dst = 0;
                    return true;
                }
                *dst = *p;
                p = p.add(1);
                dst = dst.add(1);
            }
            n -= 1;
            max -= 1;
        }

        srcva = va0 + PGSIZE;
    }
    false
}
