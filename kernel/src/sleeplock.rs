// Long-term locks for processes. May be held across disk I/O; the
// embedded spinlock is never held across a sleep.

use crate::proc::{curr_proc, sleep, wakeup};
use crate::spinlock::Spinlock;

pub struct Sleeplock {
    locked: bool,
    lk: Spinlock, // spinlock protecting this sleep lock

    // For debugging:
    name: &'static str,
    pid: u32, // process holding lock
}

impl Sleeplock {
    pub const fn new(name: &'static str) -> Self {
        Sleeplock {
            locked: false,
            lk: Spinlock::new("sleep lock"),
            name,
            pid: 0,
        }
    }

    pub fn acquire(&mut self) {
        self.lk.acquire();
        while self.locked {
            let chan = self as *const Sleeplock as usize;
            sleep(chan, &mut self.lk);
        }
        self.locked = true;
        self.pid = curr_proc().pid;
        self.lk.release();
    }

    pub fn release(&mut self) {
        self.lk.acquire();
        self.locked = false;
        self.pid = 0;
        wakeup(self as *const Sleeplock as usize);
        self.lk.release();
    }

    pub fn holding(&mut self) -> bool {
        self.lk.acquire();
        let held = self.locked && self.pid == curr_proc().pid;
        self.lk.release();
        held
    }
}
