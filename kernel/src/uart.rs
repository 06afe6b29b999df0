// Low-level driver for the 16550a UART.

use core::ptr::addr_of_mut;
use core::sync::atomic::Ordering;

use crate::console;
use crate::memlayout::UART0;
use crate::printf::PANICKED;
use crate::proc::{sleep, wakeup};
use crate::spinlock::{pop_off, push_off, Spinlock};

// the UART control registers.
// some have different meanings for read vs write.
// see http://byterunner.com/16550.html
const RHR: usize = 0; // receive holding register (for input bytes)
const THR: usize = 0; // transmit holding register (for output bytes)
const IER: usize = 1; // interrupt enable register
const IER_RX_ENABLE: u8 = 1 << 0;
const IER_TX_ENABLE: u8 = 1 << 1;
const FCR: usize = 2; // FIFO control register
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const FCR_FIFO_CLEAR: u8 = 3 << 1; // clear the content of the two FIFOs
const ISR: usize = 2; // interrupt status register
const LCR: usize = 3; // line control register
const LCR_EIGHT_BITS: u8 = 3 << 0;
const LCR_BAUD_LATCH: u8 = 1 << 7; // special mode to set baud rate
const LSR: usize = 5; // line status register
const LSR_RX_READY: u8 = 1 << 0; // input is waiting to be read from RHR
const LSR_TX_IDLE: u8 = 1 << 5; // THR can accept another character to send

fn read_reg(offset: usize) -> u8 {
    unsafe { ((UART0 + offset) as *const u8).read_volatile() }
}

fn write_reg(offset: usize, val: u8) {
    unsafe { ((UART0 + offset) as *mut u8).write_volatile(val) }
}

const UART_TX_BUF_SIZE: u64 = 32;

struct Uart {
    tx_lock: Spinlock,
    tx_buf: [u8; UART_TX_BUF_SIZE as usize],
    tx_w: u64, // write next to tx_buf[tx_w % UART_TX_BUF_SIZE]
    tx_r: u64, // read next from tx_buf[tx_r % UART_TX_BUF_SIZE]
}

static mut UART: Uart = Uart {
    tx_lock: Spinlock::new("uart"),
    tx_buf: [0; UART_TX_BUF_SIZE as usize],
    tx_w: 0,
    tx_r: 0,
};

fn uart() -> &'static mut Uart {
    unsafe { &mut *addr_of_mut!(UART) }
}

pub fn init() {
    // disable interrupts.
    write_reg(IER, 0x00);

    // special mode to set baud rate.
    write_reg(LCR, LCR_BAUD_LATCH);

    // LSB for baud rate of 38.4K.
    write_reg(0, 0x03);

    // MSB for baud rate of 38.4K.
    write_reg(1, 0x00);

    // leave set-baud mode, and set word length to 8 bits, no parity.
    write_reg(LCR, LCR_EIGHT_BITS);

    // reset and enable FIFOs.
    write_reg(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);

    // enable transmit and receive interrupts.
    write_reg(IER, IER_TX_ENABLE | IER_RX_ENABLE);
}

/// Add a character to the output buffer and tell the UART to start
/// sending if it isn't already. Blocks if the output buffer is full;
/// because it may block, it cannot be called from interrupts, only
/// from write().
pub fn putc(c: u8) {
    let u = uart();
    u.tx_lock.acquire();

    if PANICKED.load(Ordering::Relaxed) {
        loop {}
    }

    while u.tx_w == u.tx_r + UART_TX_BUF_SIZE {
        // buffer is full; wait for start() to open up space.
        let chan = addr_of_mut!(u.tx_r) as usize;
        sleep(chan, &mut u.tx_lock);
    }
    u.tx_buf[(u.tx_w % UART_TX_BUF_SIZE) as usize] = c;
    u.tx_w += 1;
    start();
    u.tx_lock.release();
}

/// Synchronous version that doesn't use interrupts, for use by the
/// printer and to echo input. Spins until the UART's output register
/// is empty.
pub fn kputc(c: u8) {
    push_off();

    if PANICKED.load(Ordering::Relaxed) {
        loop {}
    }

    // wait for Transmit Holding Empty to be set in LSR.
    while read_reg(LSR) & LSR_TX_IDLE == 0 {}
    write_reg(THR, c);

    pop_off();
}

/// If the UART is idle, and a character is waiting in the transmit
/// buffer, send it. Caller must hold tx_lock; called from both the
/// top- and bottom-half.
fn start() {
    let u = uart();
    loop {
        if u.tx_w == u.tx_r {
            // transmit buffer is empty.
            read_reg(ISR);
            return;
        }

        if read_reg(LSR) & LSR_TX_IDLE == 0 {
            // the UART transmit holding register is full; it will
            // interrupt when it's ready for a new byte.
            return;
        }

        let c = u.tx_buf[(u.tx_r % UART_TX_BUF_SIZE) as usize];
        u.tx_r += 1;

        // maybe putc() is waiting for space in the buffer.
        wakeup(addr_of_mut!(u.tx_r) as usize);

        write_reg(THR, c);
    }
}

/// Read one input character from the UART, if one is waiting.
fn getc() -> Option<u8> {
    if read_reg(LSR) & LSR_RX_READY != 0 {
        Some(read_reg(RHR))
    } else {
        None
    }
}

/// Handle a uart interrupt, raised because input has arrived, or the
/// uart is ready for more output, or both. Called from devintr().
pub fn intr() {
    // read and process incoming characters.
    while let Some(c) = getc() {
        console::intr(c);
    }

    // send buffered characters.
    let u = uart();
    u.tx_lock.acquire();
    start();
    u.tx_lock.release();
}
