// Per-CPU state, the process table, the scheduler, and the process
// lifecycle: fork, exec'd children, exit, wait, kill.

use core::ptr::addr_of;
use core::ptr::addr_of_mut;
use core::ptr::null_mut;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::file::file::{close, dup};
use crate::file::{File, INode};
use crate::fs::fs;
use crate::kalloc::{kalloc, kfree};
use crate::log::{begin_op, end_op};
use crate::memlayout::{kstack, KSTACK_PAGES, TRAMPOLINE, TRAPFRAME};
use crate::param::{NCPU, NOFILE, NPROC, ROOTDEV};
use crate::printf;
use crate::riscv::{intr_get, intr_on, r_tp, PageTable, PGSIZE, PTE_R, PTE_W, PTE_X};
use crate::spinlock::Spinlock;
use crate::string::memmove;
use crate::trap;
use crate::vm;

// Saved registers for kernel context switches.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Context {
    pub ra: u64,
    pub sp: u64,

    // callee-saved
    pub s0: u64,
    pub s1: u64,
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub s8: u64,
    pub s9: u64,
    pub s10: u64,
    pub s11: u64,
}

impl Context {
    pub const fn zeroed() -> Self {
        Context {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}

extern "C" {
    // switch.S: save the current registers in old, load from new.
    fn swtch(old: *mut Context, new: *mut Context);
}

// Per-process data for the trap handling code in trampoline.S. Sits in
// a page by itself just under the trampoline page in the user page
// table; not specially mapped in the kernel page table. uservec saves
// user registers in the trapframe, then initializes registers from the
// trapframe's kernel_sp, kernel_hartid, kernel_satp, and jumps to
// kernel_trap. user_ret() and userret set up the trapframe's kernel_*,
// restore user registers from the trapframe, switch to the user page
// table, and enter user space. The trapframe includes callee-saved
// user registers like s0-s11 because the return-to-user path via
// user_ret() doesn't return through the entire kernel call stack.
#[repr(C)]
pub struct Trapframe {
    /*   0 */ pub kernel_satp: u64, // kernel page table
    /*   8 */ pub kernel_sp: u64, // top of process's kernel stack
    /*  16 */ pub kernel_trap: u64, // user_trap()
    /*  24 */ pub epc: u64, // saved user program counter
    /*  32 */ pub kernel_hartid: u64, // saved kernel tp
    /*  40 */ pub ra: u64,
    /*  48 */ pub sp: u64,
    /*  56 */ pub gp: u64,
    /*  64 */ pub tp: u64,
    /*  72 */ pub t0: u64,
    /*  80 */ pub t1: u64,
    /*  88 */ pub t2: u64,
    /*  96 */ pub s0: u64,
    /* 104 */ pub s1: u64,
    /* 112 */ pub a0: u64,
    /* 120 */ pub a1: u64,
    /* 128 */ pub a2: u64,
    /* 136 */ pub a3: u64,
    /* 144 */ pub a4: u64,
    /* 152 */ pub a5: u64,
    /* 160 */ pub a6: u64,
    /* 168 */ pub a7: u64,
    /* 176 */ pub s2: u64,
    /* 184 */ pub s3: u64,
    /* 192 */ pub s4: u64,
    /* 200 */ pub s5: u64,
    /* 208 */ pub s6: u64,
    /* 216 */ pub s7: u64,
    /* 224 */ pub s8: u64,
    /* 232 */ pub s9: u64,
    /* 240 */ pub s10: u64,
    /* 248 */ pub s11: u64,
    /* 256 */ pub t3: u64,
    /* 264 */ pub t4: u64,
    /* 272 */ pub t5: u64,
    /* 280 */ pub t6: u64,
}

// t6 lives at byte offset 280; trampoline.S hard-codes these offsets.
static_assertions::const_assert_eq!(core::mem::size_of::<Trapframe>(), 288);

// Per-CPU state.
pub struct Cpu {
    pub proc: Option<usize>, // index of the process running on this cpu
    pub context: Context,    // swtch() here to enter scheduler()
    pub noff: u32,           // depth of push_off() nesting
    pub intena: bool,        // were interrupts enabled before push_off()?
}

impl Cpu {
    const fn new() -> Self {
        Cpu {
            proc: None,
            context: Context::zeroed(),
            noff: 0,
            intena: false,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub enum ProcStatus {
    Unused,
    Used,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// The identity the permission checks compare file owners against.
pub struct Cred {
    pub lock: Spinlock,
    pub uid: u32,
    pub gid: u32,
}

// Per-process state.
pub struct Process {
    pub lock: Spinlock,

    // lock must be held when using these:
    pub status: ProcStatus,
    pub chan: usize,  // if non-zero, sleeping on chan
    pub killed: bool,
    pub xstate: i32,  // exit status to be returned to parent's wait
    pub pid: u32,

    // wait_lock must be held when using this:
    pub parent: Option<usize>, // index into the process table

    // these are private to the process, so lock need not be held:
    pub kstack: usize,             // virtual address of kernel stack
    pub sz: usize,                 // size of process memory (bytes)
    pub pagetable: *mut PageTable, // user page table
    pub trapframe: *mut Trapframe, // data page for trampoline.S
    pub context: Context,          // swtch() here to run process
    pub ofile: [*mut File; NOFILE],
    pub cwd: *mut INode,
    pub cred: Cred,
    pub name: [u8; 32],
}

impl Process {
    const fn new() -> Self {
        Process {
            lock: Spinlock::new("proc"),
            status: ProcStatus::Unused,
            chan: 0,
            killed: false,
            xstate: 0,
            pid: 0,
            parent: None,
            kstack: 0,
            sz: 0,
            pagetable: null_mut(),
            trapframe: null_mut(),
            context: Context::zeroed(),
            ofile: [null_mut(); NOFILE],
            cwd: null_mut(),
            cred: Cred {
                lock: Spinlock::new("cred"),
                uid: 0,
                gid: 0,
            },
            name: [0; 32],
        }
    }

    pub fn trapframe(&self) -> &'static mut Trapframe {
        unsafe { &mut *self.trapframe }
    }

    pub fn set_name(&mut self, name: &[u8]) {
        self.name = [0; 32];
        let n = core::cmp::min(name.len(), self.name.len() - 1);
        self.name[..n].copy_from_slice(&name[..n]);
    }

    pub fn name_str(&self) -> &str {
        let n = self.name.iter().position(|&c| c == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..n]).unwrap_or("?")
    }
}

static mut CPU_LIST: [Cpu; NCPU] = [const { Cpu::new() }; NCPU];
static mut PROC_LIST: [Process; NPROC] = [const { Process::new() }; NPROC];

static mut INIT_PROC: Option<usize> = None;

// helps ensure that wakeups of wait()ing parents are not lost.
// helps obey the memory model when using parent links.
// must be acquired before any process lock.
static mut WAIT_LOCK: Spinlock = Spinlock::new("wait_lock");

static mut PID_LOCK: Spinlock = Spinlock::new("pid_lock");
static mut NEXT_PID: u32 = 1;

pub fn proc_list() -> &'static mut [Process; NPROC] {
    unsafe { &mut *addr_of_mut!(PROC_LIST) }
}

fn wait_lock() -> &'static mut Spinlock {
    unsafe { &mut *addr_of_mut!(WAIT_LOCK) }
}

/// Must be called with interrupts disabled, to prevent a race with the
/// process being moved to a different CPU.
pub fn cpuid() -> usize {
    r_tp() as usize
}

/// Return this hart's cpu struct. Interrupts must be disabled.
pub fn curr_cpu() -> &'static mut Cpu {
    unsafe { &mut (*addr_of_mut!(CPU_LIST))[cpuid()] }
}

/// Index of the process running on this hart, if any.
pub fn curr_proc_idx() -> Option<usize> {
    crate::spinlock::push_off();
    let idx = curr_cpu().proc;
    crate::spinlock::pop_off();
    idx
}

/// The process running on this hart; panics outside process context.
pub fn curr_proc() -> &'static mut Process {
    match curr_proc_idx() {
        Some(idx) => &mut proc_list()[idx],
        None => panic!("curr_proc: no process"),
    }
}

fn proc_index(p: &Process) -> usize {
    let base = unsafe { addr_of!(PROC_LIST) as usize };
    (p as *const Process as usize - base) / core::mem::size_of::<Process>()
}

/// Initialize the process table. Runs once on the boot hart.
pub fn init() {
    for (i, p) in proc_list().iter_mut().enumerate() {
        p.status = ProcStatus::Unused;
        p.kstack = kstack(i);
    }
}

/// Allocate pages for each process's kernel stack and map them high in
/// memory, each followed by an invalid guard page.
pub fn map_stacks(kpt: *mut PageTable) {
    for i in 0..NPROC {
        for page in 0..KSTACK_PAGES {
            let pa = match kalloc() {
                Some(pa) => pa,
                None => panic!("map_stacks: kalloc"),
            };
            let va = kstack(i) + page * PGSIZE;
            if !vm::map_pages(kpt, va, pa as usize, PGSIZE, PTE_R | PTE_W) {
                panic!("map_stacks");
            }
        }
    }
}

fn alloc_pid() -> u32 {
    let lk = unsafe { &mut *addr_of_mut!(PID_LOCK) };
    lk.acquire();
    let pid = unsafe { NEXT_PID };
    unsafe { NEXT_PID += 1 };
    lk.release();
    pid
}

/// Create a user page table for a given process, with no user memory
/// but with trampoline and trapframe pages.
pub fn alloc_pagetable(p: &Process) -> Option<*mut PageTable> {
    // An empty page table.
    let pt = vm::uvm_create()?;

    // map the trampoline code (for system call return) at the highest
    // user virtual address. only the supervisor uses it, on the way
    // to/from user space, so not PTE_U.
    if !vm::map_pages(pt, TRAMPOLINE, vm::trampoline_addr(), PGSIZE, PTE_R | PTE_X) {
        vm::uvm_free(pt, 0);
        return None;
    }

    // map the trapframe page just below the trampoline page.
    if !vm::map_pages(pt, TRAPFRAME, p.trapframe as usize, PGSIZE, PTE_R | PTE_W) {
        vm::uvm_unmap(pt, TRAMPOLINE, 1, false);
        vm::uvm_free(pt, 0);
        return None;
    }

    Some(pt)
}

/// Free a process's page table and the physical memory it refers to.
pub fn free_pagetable(pagetable: *mut PageTable, sz: usize) {
    vm::uvm_unmap(pagetable, TRAMPOLINE, 1, false);
    vm::uvm_unmap(pagetable, TRAPFRAME, 1, false);
    vm::uvm_free(pagetable, sz);
}

/// Free a process slot and the data hanging from it, including user
/// pages. The slot's lock must be held.
fn free_proc(p: &mut Process) {
    if !p.trapframe.is_null() {
        kfree(p.trapframe as *mut u8);
    }
    p.trapframe = null_mut();
    if !p.pagetable.is_null() {
        free_pagetable(p.pagetable, p.sz);
    }
    p.pagetable = null_mut();
    p.sz = 0;
    p.pid = 0;
    p.parent = None;
    p.name = [0; 32];
    p.chan = 0;
    p.killed = false;
    p.xstate = 0;
    p.status = ProcStatus::Unused;
}

/// Look in the process table for an UNUSED slot. If found, initialize
/// the state required to run in the kernel and return the index with
/// the slot's lock held. An exhausted table is a configuration bug.
fn alloc_proc() -> Option<usize> {
    for i in 0..NPROC {
        let p = &mut proc_list()[i];
        p.lock.acquire();
        if p.status != ProcStatus::Unused {
            p.lock.release();
            continue;
        }

        p.pid = alloc_pid();
        p.status = ProcStatus::Used;

        // Allocate a trapframe page.
        match kalloc() {
            Some(frame) => p.trapframe = frame as *mut Trapframe,
            None => {
                free_proc(p);
                p.lock.release();
                return None;
            }
        }

        // An empty user page table.
        match alloc_pagetable(p) {
            Some(pt) => p.pagetable = pt,
            None => {
                free_proc(p);
                p.lock.release();
                return None;
            }
        }

        // Set up a new context to start executing at forkret,
        // which returns to user space.
        p.context = Context::zeroed();
        p.context.ra = forkret as usize as u64;
        p.context.sp = (p.kstack + KSTACK_PAGES * PGSIZE) as u64;

        return Some(i);
    }
    panic!("proc::alloc: no proc");
}

// A user program that calls exec("/bin/init"); assembled from
// initcode.S:
//
//   la a0, path
//   la a1, argv
//   li a7, SYS_exec
//   ecall
//   li a7, SYS_exit
//   ecall
//   jal start
// path: "/bin/init"
// argv: path, 0
#[rustfmt::skip]
const INITCODE: [u8; 64] = [
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0x45, 0x02,
    0x97, 0x05, 0x00, 0x00, 0x93, 0x85, 0x85, 0x02,
    0x93, 0x08, 0x60, 0x00, 0x73, 0x00, 0x00, 0x00,
    0x93, 0x08, 0x10, 0x00, 0x73, 0x00, 0x00, 0x00,
    0xef, 0xf0, 0x9f, 0xff, 0x2f, 0x62, 0x69, 0x6e,
    0x2f, 0x69, 0x6e, 0x69, 0x74, 0x00, 0x00, 0x00,
    0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Set up the first user process.
pub fn user_init() {
    let idx = alloc_proc().expect("user_init");
    unsafe { INIT_PROC = Some(idx) };

    let p = &mut proc_list()[idx];

    // allocate one user page and copy initcode's
    // instructions and data into it.
    vm::uvm_first(p.pagetable, INITCODE.as_ptr(), INITCODE.len());
    p.sz = PGSIZE;

    // prepare for the very first "return" from kernel to user.
    p.trapframe().epc = 0; // user program counter
    p.trapframe().sp = PGSIZE as u64; // user stack pointer

    p.set_name(b"initcode");
    p.cwd = fs::namei(b"/").expect("user_init: no root");
    p.status = ProcStatus::Runnable;

    p.lock.release();
}

/// A fork child's very first scheduling by scheduler() will swtch here.
fn forkret() {
    static FIRST: AtomicBool = AtomicBool::new(true);

    // Still holding this process's lock from scheduler().
    curr_proc().lock.release();

    if FIRST.load(Ordering::Acquire) {
        // File system initialization must be run in the context of a
        // regular process (e.g., because it calls sleep), and thus
        // cannot be run from main().
        fs::init(ROOTDEV);
        log::info!("the root file system init successful");
        FIRST.store(false, Ordering::Release);
    }

    trap::user_ret();
}

/// Per-CPU process scheduler. Each CPU calls scheduler() after setting
/// itself up; it never returns, looping forever over: choose a process
/// to run, swtch to it, eventually release it back.
pub fn scheduler() -> ! {
    let c = curr_cpu();
    c.proc = None;

    loop {
        // The most recent process to run may have had interrupts
        // turned off; enable them to avoid a deadlock if all
        // processes are waiting.
        intr_on();

        let mut found = false;
        for i in 0..NPROC {
            let p = &mut proc_list()[i];
            p.lock.acquire();
            if p.status == ProcStatus::Runnable {
                // Switch to the chosen process. It is the process's
                // job to release its lock and then reacquire it
                // before jumping back to us.
                p.status = ProcStatus::Running;
                c.proc = Some(i);
                unsafe { swtch(addr_of_mut!(c.context), addr_of_mut!(p.context)) };

                // Process is done running for now.
                c.proc = None;
                found = true;
            }
            p.lock.release();
        }

        if !found {
            // nothing to run; stop running on this core until an
            // interrupt.
            intr_on();
            unsafe { core::arch::asm!("wfi") };
        }
    }
}

/// Switch to the scheduler. Must hold only the current process's lock
/// and have changed its status. Saves and restores intena because
/// intena is a property of this kernel thread, not this CPU.
fn sched() {
    let p = curr_proc();

    if !p.lock.holding() {
        panic!("sched: should hold lock");
    }
    if curr_cpu().noff != 1 {
        panic!("sched: locks");
    }
    if p.status == ProcStatus::Running {
        panic!("sched: running");
    }
    if intr_get() {
        panic!("sched: interruptible");
    }

    let intena = curr_cpu().intena;
    unsafe { swtch(addr_of_mut!(p.context), addr_of_mut!(curr_cpu().context)) };
    curr_cpu().intena = intena;
}

/// Give up the CPU for one scheduling round.
pub fn yield_now() {
    let p = curr_proc();
    p.lock.acquire();
    p.status = ProcStatus::Runnable;
    sched();
    p.lock.release();
}

/// Atomically release lk and sleep on chan; reacquires lk when
/// awakened. The caller-held lk closes the race against a concurrent
/// wakeup().
pub fn sleep(chan: usize, lk: &mut Spinlock) {
    let p = curr_proc();

    // Must acquire p.lock in order to change p.status and then call
    // sched. Once we hold p.lock, we can be guaranteed that we won't
    // miss any wakeup (wakeup locks p.lock), so it's okay to release
    // lk.
    p.lock.acquire();
    lk.release();

    // Go to sleep.
    p.chan = chan;
    p.status = ProcStatus::Sleeping;

    sched();

    // Tidy up.
    p.chan = 0;

    // Reacquire original lock.
    p.lock.release();
    lk.acquire();
}

/// Wake up all processes sleeping on chan. Must be called without any
/// process lock, to avoid deadlock.
pub fn wakeup(chan: usize) {
    let me = curr_cpu().proc;
    for i in 0..NPROC {
        if me == Some(i) {
            continue;
        }
        let p = &mut proc_list()[i];
        p.lock.acquire();
        if p.status == ProcStatus::Sleeping && p.chan == chan {
            p.status = ProcStatus::Runnable;
        }
        p.lock.release();
    }
}

/// Pass p's abandoned children to init. Caller must hold wait_lock.
fn reparent(idx: usize) {
    let init = unsafe { INIT_PROC }.expect("reparent: no init");
    for i in 0..NPROC {
        let cp = &mut proc_list()[i];
        if cp.parent == Some(idx) {
            cp.parent = Some(init);
            wakeup(addr_of!(proc_list()[init]) as usize);
        }
    }
}

/// Kill the process with the given pid. The victim won't exit until it
/// tries to return to user space (see user_trap).
pub fn kill(pid: u32) -> i32 {
    for i in 0..NPROC {
        let p = &mut proc_list()[i];
        p.lock.acquire();
        if p.pid == pid {
            p.killed = true;
            if p.status == ProcStatus::Sleeping {
                // Wake the process from sleep().
                p.status = ProcStatus::Runnable;
            }
            p.lock.release();
            return 0;
        }
        p.lock.release();
    }
    -1
}

pub fn set_killed(p: &mut Process) {
    p.lock.acquire();
    p.killed = true;
    p.lock.release();
}

pub fn get_killed(p: &mut Process) -> bool {
    p.lock.acquire();
    let k = p.killed;
    p.lock.release();
    k
}

/// Grow or shrink user memory by n bytes. The sbrk body.
pub fn grow(n: i64) -> i32 {
    let p = curr_proc();
    let mut sz = p.sz;

    if n > 0 {
        sz = vm::uvm_alloc(p.pagetable, sz, sz + n as usize, PTE_W);
        if sz == 0 {
            return -1;
        }
    } else if n < 0 {
        sz = vm::uvm_dealloc(p.pagetable, sz, (sz as i64 + n) as usize);
    }

    p.sz = sz;
    0
}

/// Create a new process, copying the parent. Sets up the child kernel
/// stack to return as if from the fork() system call.
pub fn fork() -> i32 {
    let np_idx = match alloc_proc() {
        Some(i) => i,
        None => return -1,
    };

    let p = curr_proc();
    let p_idx = proc_index(p);
    let np = &mut proc_list()[np_idx];

    // Copy user memory from parent to child.
    if !vm::uvm_copy(p.pagetable, np.pagetable, p.sz) {
        free_proc(np);
        np.lock.release();
        return -1;
    }
    np.sz = p.sz;

    // Copy saved user registers; cause fork to return 0 in the child.
    memmove(
        np.trapframe as *mut u8,
        p.trapframe as *const u8,
        core::mem::size_of::<Trapframe>(),
    );
    np.trapframe().a0 = 0;

    // increment reference counts on open file descriptors.
    for i in 0..NOFILE {
        if !p.ofile[i].is_null() {
            np.ofile[i] = dup(p.ofile[i]);
        }
    }
    np.cwd = fs::idup(p.cwd);

    np.cred.uid = p.cred.uid;
    np.cred.gid = p.cred.gid;

    np.name = p.name;

    let pid = np.pid;

    np.lock.release();

    wait_lock().acquire();
    np.parent = Some(p_idx);
    wait_lock().release();

    np.lock.acquire();
    np.status = ProcStatus::Runnable;
    np.lock.release();

    pid as i32
}

/// Exit the current process; does not return. An exited process
/// remains in the zombie state until its parent calls wait().
pub fn exit(status: i32) -> ! {
    let p = curr_proc();
    let p_idx = proc_index(p);

    if unsafe { INIT_PROC } == Some(p_idx) {
        panic!("proc::exit: init exiting");
    }

    // Close all open files.
    for fd in 0..NOFILE {
        if !p.ofile[fd].is_null() {
            close(p.ofile[fd]);
            p.ofile[fd] = null_mut();
        }
    }

    begin_op();
    fs::iput(p.cwd);
    end_op();
    p.cwd = null_mut();

    wait_lock().acquire();

    // Give any children to init.
    reparent(p_idx);

    // Parent might be sleeping in wait().
    if let Some(parent) = p.parent {
        wakeup(addr_of!(proc_list()[parent]) as usize);
    }

    p.lock.acquire();
    p.xstate = status;
    p.status = ProcStatus::Zombie;

    wait_lock().release();

    // Jump into the scheduler, never to return.
    sched();
    panic!("proc::exit: zombie exit");
}

/// Wait for a child process to exit, returning its pid; copies the
/// exit status out to addr when addr is non-zero.
pub fn wait(addr: usize) -> i32 {
    let p = curr_proc();
    let p_idx = proc_index(p);

    wait_lock().acquire();

    loop {
        // Scan through the table looking for exited children.
        let mut havekids = false;
        for i in 0..NPROC {
            let cp = &mut proc_list()[i];
            if cp.parent != Some(p_idx) {
                continue;
            }

            // make sure the child isn't still in exit() or swtch().
            cp.lock.acquire();
            havekids = true;

            if cp.status == ProcStatus::Zombie {
                let pid = cp.pid;
                if addr != 0
                    && !vm::copyout(
                        p.pagetable,
                        addr,
                        addr_of!(cp.xstate) as *const u8,
                        core::mem::size_of::<i32>(),
                    )
                {
                    cp.lock.release();
                    wait_lock().release();
                    return -1;
                }
                free_proc(cp);
                cp.lock.release();
                wait_lock().release();
                return pid as i32;
            }

            cp.lock.release();
        }

        // No point waiting if we don't have any children.
        if !havekids || get_killed(p) {
            wait_lock().release();
            return -1;
        }

        // Wait for a child to exit.
        sleep(addr_of!(*p) as usize, wait_lock());
    }
}

/// Print a process listing to the console for debugging; ^P triggers
/// it. Runs when something is wedged, so no locks.
pub fn dump_all() {
    printf!("\n");
    for p in proc_list().iter() {
        if p.status == ProcStatus::Unused {
            continue;
        }
        let status = match p.status {
            ProcStatus::Unused => "unused",
            ProcStatus::Used => "used",
            ProcStatus::Sleeping => "sleep",
            ProcStatus::Runnable => "runnable",
            ProcStatus::Running => "run",
            ProcStatus::Zombie => "zombie",
        };
        printf!("{} {} {}\n", p.pid, status, p.name_str());
    }
}

/// Copy to either a user address or a kernel address, depending on
/// user_dst.
pub fn either_copyout(user_dst: bool, dst: usize, src: *const u8, len: usize) -> bool {
    if user_dst {
        vm::copyout(curr_proc().pagetable, dst, src, len)
    } else {
        memmove(dst as *mut u8, src, len);
        true
    }
}

/// Copy from either a user address or a kernel address, depending on
/// user_src.
pub fn either_copyin(dst: *mut u8, user_src: bool, src: usize, len: usize) -> bool {
    if user_src {
        vm::copyin(curr_proc().pagetable, dst, src, len)
    } else {
        memmove(dst, src as *const u8, len);
        true
    }
}
