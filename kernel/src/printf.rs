// Formatted console output, plus the kernel's `log` facade backend.

use core::fmt::{Arguments, Error, Write};
use core::ptr::addr_of_mut;
use core::sync::atomic::AtomicBool;

use ::log::{Level, LevelFilter, Metadata, Record};

use crate::console;
use crate::spinlock::Spinlock;

// set once a hart has died in panic; freezes everyone else's output
pub static PANICKED: AtomicBool = AtomicBool::new(false);

/// lock to avoid interleaving concurrent printf's.
pub struct Printer {
    lock: Spinlock,
    pub locking: bool,
}

static mut PRINTER: Printer = Printer {
    lock: Spinlock::new("pr"),
    locking: true,
};

pub fn printer() -> &'static mut Printer {
    unsafe { &mut *addr_of_mut!(PRINTER) }
}

impl Printer {
    pub fn print(&mut self, args: Arguments<'_>) {
        let locking = self.locking;
        if locking {
            self.lock.acquire();
        }

        let _ = self.write_fmt(args);

        if locking {
            self.lock.release();
        }
    }
}

impl Write for Printer {
    fn write_str(&mut self, s: &str) -> Result<(), Error> {
        for c in s.bytes() {
            console::putc(c as u16);
        }
        Ok(())
    }
}

#[macro_export]
macro_rules! printf {
    ($($arg:tt)*) => {
        $crate::printf::printer().print(core::format_args!($($arg)*))
    };
}

/// Routes the `log` crate's records to the console with the level
/// spelled out in front, `[INFO]: ...` style.
struct KernelLog;

static KLOG: KernelLog = KernelLog;

impl log::Log for KernelLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let prefix = match record.level() {
            Level::Error => "[ERROR]: ",
            Level::Warn => "[WARNNING]: ",
            Level::Info => "[INFO]: ",
            Level::Debug => "[DEBUG]: ",
            Level::Trace => "[TRACE]: ",
        };
        printf!("{}{}\n", prefix, record.args());
    }

    fn flush(&self) {}
}

/// Install the console logger. Must run after the console is up and
/// before the first log macro fires.
pub fn init() {
    let _ = log::set_logger(&KLOG);
    log::set_max_level(LevelFilter::Info);
}
