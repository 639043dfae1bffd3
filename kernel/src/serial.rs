// Serial Port Driver (Kernel Debug I/O)
//
// Output backend for the logging subsystem: the legacy COM1 UART at I/O
// port 0x3F8, driven through the `uart_16550` crate.
//
// Key responsibilities:
// - Initialize COM1 in a known-good configuration
// - Provide an interrupt-safe formatted print primitive
// - Expose `serial_print!` / `serial_println!` macros
//
// Concurrency and safety:
// - The global port is behind a spinlock
// - `_print` disables interrupts while the lock is held so output from
//   interrupt context cannot interleave with thread-context output
//
// Serial output is the ground-truth log sink: it works before the
// scheduler exists and keeps working after a panic. On hosted targets the
// port is absent and `_print` discards its input; unit tests never observe
// hardware.

#![allow(dead_code)]

use core::fmt;

#[cfg(target_os = "none")]
use spin::Mutex;
#[cfg(target_os = "none")]
use uart_16550::SerialPort;

#[cfg(target_os = "none")]
const COM1: u16 = 0x3F8;

#[cfg(target_os = "none")]
pub static SERIAL1: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(COM1) });

#[cfg(target_os = "none")]
pub fn init() {
    SERIAL1.lock().init();
}

#[cfg(not(target_os = "none"))]
pub fn init() {}

#[cfg(target_os = "none")]
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    crate::util::without_interrupts(|| {
        let _ = SERIAL1.lock().write_fmt(args);
    });
}

#[cfg(not(target_os = "none"))]
#[doc(hidden)]
pub fn _print(_args: fmt::Arguments) {}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => ($crate::serial::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
