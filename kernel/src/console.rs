// Console input and output, to the UART.
//
// Reads are line at a time: the interrupt handler accumulates input in
// the edit region of a circular buffer and commits a line on newline
// or ^D. Implements the erase/kill special characters:
//   newline -- end of line
//   control-h -- backspace
//   control-u -- kill line
//   control-d -- end of file
//   control-p -- print process list

use core::ptr::addr_of;
use core::ptr::addr_of_mut;

use crate::file::{self, CONSOLE};
use crate::proc::{self, curr_proc, either_copyin, either_copyout, sleep, wakeup};
use crate::spinlock::Spinlock;
use crate::uart;

const BACKSPACE: u16 = 0x100;

const fn ctrl(x: u8) -> u8 {
    x - b'@'
}

const INPUT_BUF_SIZE: usize = 128;

struct Console {
    lock: Spinlock,

    // input
    buf: [u8; INPUT_BUF_SIZE],
    r: usize, // Read index
    w: usize, // Write index
    e: usize, // Edit index
}

static mut CONS: Console = Console {
    lock: Spinlock::new("cons"),
    buf: [0; INPUT_BUF_SIZE],
    r: 0,
    w: 0,
    e: 0,
};

fn cons() -> &'static mut Console {
    unsafe { &mut *addr_of_mut!(CONS) }
}

/// Send one character to the uart. Called by the printer and to echo
/// input characters, but not from write().
pub fn putc(c: u16) {
    if c == BACKSPACE {
        // if the user typed backspace, overwrite with a space.
        uart::kputc(0x08);
        uart::kputc(b' ');
        uart::kputc(0x08);
    } else {
        uart::kputc(c as u8);
    }
}

/// user write()s to the console go here.
fn write(user_src: bool, src: usize, n: usize) -> isize {
    let mut i = 0;
    while i < n {
        let mut c = 0u8;
        if !either_copyin(addr_of_mut!(c), user_src, src + i, 1) {
            break;
        }
        uart::putc(c);
        i += 1;
    }
    i as isize
}

/// user read()s from the console go here.
/// copy (up to) a whole input line to dst. user_dst indicates whether
/// dst is a user or kernel address.
fn read(user_dst: bool, mut dst: usize, n: usize) -> isize {
    let target = n;
    let mut n = n;
    let c = cons();

    c.lock.acquire();
    while n > 0 {
        // wait until the interrupt handler has put some
        // input into the buffer.
        while c.r == c.w {
            if proc::get_killed(curr_proc()) {
                c.lock.release();
                return -1;
            }
            sleep(addr_of!(c.r) as usize, &mut c.lock);
        }

        let ch = c.buf[c.r % INPUT_BUF_SIZE];
        c.r += 1;

        if ch == ctrl(b'D') {
            // end-of-file
            if n < target {
                // Save ^D for next time, to make sure
                // caller gets a 0-byte result.
                c.r -= 1;
            }
            break;
        }

        // copy the input byte to the user-space buffer.
        let cbuf = ch;
        if !either_copyout(user_dst, dst, addr_of!(cbuf) as *const u8, 1) {
            break;
        }

        dst += 1;
        n -= 1;

        if ch == b'\n' {
            // a whole line has arrived, return to the user-level read().
            break;
        }
    }
    c.lock.release();

    (target - n) as isize
}

/// The console input interrupt handler. uart::intr() calls this for
/// input characters. Do erase/kill processing, append to the buffer,
/// wake up read() if a whole line has arrived.
pub fn intr(c: u8) {
    let cn = cons();
    cn.lock.acquire();

    match c {
        x if x == ctrl(b'P') => {
            // Print process list.
            proc::dump_all();
        }
        x if x == ctrl(b'U') => {
            // Kill line.
            while cn.e != cn.w && cn.buf[(cn.e - 1) % INPUT_BUF_SIZE] != b'\n' {
                cn.e -= 1;
                putc(BACKSPACE);
            }
        }
        x if x == ctrl(b'H') || x == 0x7f => {
            // Backspace or Delete key.
            if cn.e != cn.w {
                cn.e -= 1;
                putc(BACKSPACE);
            }
        }
        _ => {
            if c != 0 && cn.e - cn.r < INPUT_BUF_SIZE {
                let c = if c == b'\r' { b'\n' } else { c };

                // echo back to the user.
                putc(c as u16);

                // store for consumption by read().
                cn.buf[cn.e % INPUT_BUF_SIZE] = c;
                cn.e += 1;

                if c == b'\n' || c == ctrl(b'D') || cn.e - cn.r == INPUT_BUF_SIZE {
                    // wake up read() if a whole line (or end-of-file)
                    // has arrived.
                    cn.w = cn.e;
                    wakeup(addr_of!(cn.r) as usize);
                }
            }
        }
    }

    cn.lock.release();
}

pub fn init() {
    uart::init();

    // connect read and write system calls
    // to console::read and console::write.
    file::devsw()[CONSOLE].read = Some(read);
    file::devsw()[CONSOLE].write = Some(write);
}
