// Physical memory layout.
//
// qemu -machine virt is set up like this,
// based on qemu's hw/riscv/virt.c:
//
// 00001000 -- boot ROM, provided by qemu
// 02000000 -- CLINT
// 0C000000 -- PLIC
// 10000000 -- uart0
// 10001000 -- virtio disk
// 80000000 -- boot ROM jumps here in machine mode
//             -kernel loads the kernel here
// unused RAM after 80000000.
//
// the kernel uses physical memory thus:
// 80000000 -- entry.S, then kernel text and data
// end -- start of kernel page allocation area
// PHY_END -- end of RAM used by the kernel

use crate::riscv::{MAXVA, PGSIZE};

// qemu puts UART registers here in physical memory.
pub const UART0: usize = 0x1000_0000;
pub const UART0_IRQ: u32 = 10;

// virtio mmio interface
pub const VIRTIO0: usize = 0x1000_1000;
pub const VIRTIO0_IRQ: u32 = 1;

// qemu puts the platform-level interrupt controller (PLIC) here.
pub const PLIC: usize = 0x0c00_0000;

// the kernel expects there to be RAM for use by the kernel and user
// pages from physical address 0x80000000 to PHY_END.
pub const KERNEL_BASE: usize = 0x8000_0000;
pub const PHY_END: usize = KERNEL_BASE + 128 * 1024 * 1024;

// map the trampoline page to the highest address,
// in both user and kernel space.
pub const TRAMPOLINE: usize = MAXVA - PGSIZE;

// User memory layout.
// Address zero first:
//   text
//   original data and bss
//   fixed-size stack
//   expandable heap
//   ...
//   TRAPFRAME (p->trapframe, used by the trampoline)
//   TRAMPOLINE (the same page as in the kernel)
pub const TRAPFRAME: usize = TRAMPOLINE - PGSIZE;

// Map kernel stacks beneath the trampoline, each followed by an
// invalid guard page. Rust call frames run much deeper than the C
// kernel's, so every process gets a two-page kernel stack; with the
// guard that is a three-page stride per slot.
pub const fn kstack(p: usize) -> usize {
    TRAMPOLINE - (p + 1) * 3 * PGSIZE
}

// pages actually mapped at kstack(p)
pub const KSTACK_PAGES: usize = 2;
