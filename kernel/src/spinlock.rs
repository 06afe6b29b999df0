// Mutual exclusion spin locks.

use crate::proc::{cpuid, curr_cpu};
use crate::riscv::{
    intr_get, intr_off, intr_on, sync_lock_release, sync_lock_test_and_set, sync_synchronize,
};

pub struct Spinlock {
    locked: u32, // Is the lock held?

    // For debugging:
    name: &'static str,  // Name of lock.
    cpu: Option<usize>,  // The hart holding the lock.
}

impl Spinlock {
    pub const fn new(name: &'static str) -> Self {
        Spinlock {
            locked: 0,
            name,
            cpu: None,
        }
    }

    /// Acquire the lock.
    /// Loops (spins) until the lock is acquired.
    pub fn acquire(&mut self) {
        push_off(); // disable interrupts to avoid deadlock.
        if self.holding() {
            panic!("acquire {}", self.name);
        }

        // On RISC-V, this turns into an atomic swap:
        //   amoswap.w.aq a5, a5, (s1)
        while sync_lock_test_and_set(&mut self.locked, 1) != 0 {}

        // No loads or stores of the critical section may move above
        // this point.
        sync_synchronize();

        // Record info about lock acquisition for holding() and debugging.
        self.cpu = Some(cpuid());
    }

    /// Release the lock.
    pub fn release(&mut self) {
        if !self.holding() {
            panic!("release {}", self.name);
        }

        self.cpu = None;

        // All the stores in the critical section must be visible to
        // other CPUs before the lock is released.
        sync_synchronize();

        sync_lock_release(&mut self.locked);

        pop_off();
    }

    /// Check whether this hart is holding the lock.
    /// Interrupts must be off.
    pub fn holding(&self) -> bool {
        self.locked != 0 && self.cpu == Some(cpuid())
    }
}

/// push_off/pop_off are like intr_off()/intr_on() except that they are
/// matched: it takes two pop_off()s to undo two push_off()s. Also, if
/// interrupts are initially off, then push_off, pop_off leaves them off.
pub fn push_off() {
    let old = intr_get();

    intr_off();
    let c = curr_cpu();
    if c.noff == 0 {
        c.intena = old;
    }
    c.noff += 1;
}

pub fn pop_off() {
    let c = curr_cpu();
    if intr_get() {
        panic!("pop_off - interruptible");
    }
    if c.noff < 1 {
        panic!("pop_off");
    }
    c.noff -= 1;
    if c.noff == 0 && c.intena {
        intr_on();
    }
}
