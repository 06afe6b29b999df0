// The ELF loader: replace the current process image with a program
// loaded from the file system.

use core::mem;
use core::ptr::addr_of_mut;

use crate::elf::{
    ElfHeader, ProgramHeader, ELF_MAGIC, ELF_PROG_FLAG_EXEC, ELF_PROG_FLAG_WRITE, ELF_PROG_LOAD,
};
use crate::file::INode;
use crate::fs::fs::namei;
use crate::log::{begin_op, end_op};
use crate::param::{MAXARGV, USERSTACK};
use crate::proc::{alloc_pagetable, curr_proc, free_pagetable};
use crate::riscv::{pg_round_up, PageTable, PGSIZE, PTE_W, PTE_X};
use crate::string::strlen;
use crate::syscall::sysfile::{check_permission, MASK_EXEC};
use crate::vm::{copyout, uvm_alloc, uvm_clear, walkaddr};

fn flags2perm(flags: u32) -> usize {
    let mut perm = 0;
    if flags & ELF_PROG_FLAG_EXEC != 0 {
        perm = PTE_X;
    }
    if flags & ELF_PROG_FLAG_WRITE != 0 {
        perm |= PTE_W;
    }
    perm
}

// unified failure path: free the half-built image and release the
// inode and transaction when still held.
fn bad(pagetable: Option<*mut PageTable>, sz: usize, ip: Option<&mut INode>) -> i64 {
    if let Some(pt) = pagetable {
        free_pagetable(pt, sz);
    }
    if let Some(ip) = ip {
        ip.iunlockput();
        end_op();
    }
    -1
}

pub fn exec(path: &[u8], argv: &[*mut u8]) -> i64 {
    let p = curr_proc();

    begin_op();

    let ip = match namei(path) {
        Some(ip) => ip,
        None => {
            end_op();
            return -1;
        }
    };
    ip.ilock();

    // The caller must be allowed to execute the file.
    if !check_permission(ip, MASK_EXEC) {
        return bad(None, 0, Some(ip));
    }

    // Check ELF header
    let mut elf = ElfHeader::zeroed();
    if ip.readi(false, addr_of_mut!(elf) as usize, 0, mem::size_of::<ElfHeader>())
        != mem::size_of::<ElfHeader>()
    {
        return bad(None, 0, Some(ip));
    }
    if elf.magic != ELF_MAGIC {
        return bad(None, 0, Some(ip));
    }

    let pagetable = match alloc_pagetable(p) {
        Some(pt) => pt,
        None => return bad(None, 0, Some(ip)),
    };

    // Load program into memory.
    let mut sz: usize = 0;
    let mut off = elf.phoff as u32;
    let ph_sz = mem::size_of::<ProgramHeader>();
    for _ in 0..elf.phnum {
        let mut ph = ProgramHeader::zeroed();
        if ip.readi(false, addr_of_mut!(ph) as usize, off, ph_sz) != ph_sz {
            return bad(Some(pagetable), sz, Some(ip));
        }
        off += ph_sz as u32;

        if ph.hdr_type != ELF_PROG_LOAD {
            continue;
        }
        if ph.memsz < ph.filesz {
            return bad(Some(pagetable), sz, Some(ip));
        }
        if ph.vaddr + ph.memsz < ph.vaddr {
            return bad(Some(pagetable), sz, Some(ip));
        }
        if ph.vaddr as usize % PGSIZE != 0 {
            return bad(Some(pagetable), sz, Some(ip));
        }

        let sz1 = uvm_alloc(
            pagetable,
            sz,
            (ph.vaddr + ph.memsz) as usize,
            flags2perm(ph.flags),
        );
        if sz1 == 0 {
            return bad(Some(pagetable), sz, Some(ip));
        }
        sz = sz1;
        if !loadseg(pagetable, ph.vaddr as usize, ip, ph.off as u32, ph.filesz as usize) {
            return bad(Some(pagetable), sz, Some(ip));
        }
    }
    ip.iunlockput();
    end_op();

    let p = curr_proc();
    let oldsz = p.sz;

    // Allocate some pages at the next page boundary: USERSTACK pages
    // of stack plus a guard page below, with the guard inaccessible
    // from user space. The stack grows downward from sz.
    sz = pg_round_up(sz);
    let sz1 = uvm_alloc(pagetable, sz, sz + (USERSTACK + 1) * PGSIZE, PTE_W);
    if sz1 == 0 {
        return bad(Some(pagetable), sz, None);
    }
    sz = sz1;
    uvm_clear(pagetable, sz - (USERSTACK + 1) * PGSIZE);
    let mut sp = sz;
    let stackbase = sp - USERSTACK * PGSIZE;

    // Push argument strings, prepare rest of stack in ustack.
    let mut ustack = [0u64; MAXARGV + 1];
    let mut argc = 0;
    for &arg in argv {
        if argc >= MAXARGV {
            return bad(Some(pagetable), sz, None);
        }
        let len = strlen(arg);
        sp -= len + 1;
        sp -= sp % 16; // riscv sp must be 16-byte aligned
        if sp < stackbase {
            return bad(Some(pagetable), sz, None);
        }
        if !copyout(pagetable, sp, arg, len + 1) {
            return bad(Some(pagetable), sz, None);
        }
        ustack[argc] = sp as u64;
        argc += 1;
    }
    ustack[argc] = 0;

    // push the array of argv[] pointers.
    sp -= (argc + 1) * mem::size_of::<u64>();
    sp -= sp % 16;
    if sp < stackbase {
        return bad(Some(pagetable), sz, None);
    }
    if !copyout(
        pagetable,
        sp,
        ustack.as_ptr() as *const u8,
        (argc + 1) * mem::size_of::<u64>(),
    ) {
        return bad(Some(pagetable), sz, None);
    }

    // arguments to user main(argc, argv): argc is returned via the
    // system call return value, which goes in a0.
    p.trapframe().a1 = sp as u64;

    // Save program name for debugging.
    let end = path.iter().position(|&c| c == 0).unwrap_or(path.len());
    let last = match path[..end].iter().rposition(|&c| c == b'/') {
        Some(i) => &path[i + 1..end],
        None => &path[..end],
    };
    p.set_name(last);

    // Commit to the user image.
    let oldpagetable = p.pagetable;
    p.pagetable = pagetable;
    p.sz = sz;
    p.trapframe().epc = elf.entry; // initial program counter = main
    p.trapframe().sp = sp as u64; // initial stack pointer
    free_pagetable(oldpagetable, oldsz);

    argc as i64 // this ends up in a0, the first argument to main(argc, argv)
}

/// Load a program segment into pagetable at virtual address va. va
/// must be page-aligned and the pages from va to va+sz must already
/// be mapped.
fn loadseg(pagetable: *mut PageTable, va: usize, ip: &mut INode, offset: u32, sz: usize) -> bool {
    let mut i = 0;
    while i < sz {
        let pa = walkaddr(pagetable, va + i);
        if pa == 0 {
            panic!("loadseg: address should exist");
        }
        let n = if sz - i < PGSIZE { sz - i } else { PGSIZE };
        if ip.readi(false, pa, offset + i as u32, n) != n {
            return false;
        }
        i += PGSIZE;
    }
    true
}
