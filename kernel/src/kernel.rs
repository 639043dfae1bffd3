// Kernel concurrency core: entry points and system initialization
//
// Crate root of the Quark concurrency core: the thread scheduler and the
// synchronization primitives the rest of the kernel is built on. The
// crate is a library; the embedding kernel calls `init()` early in boot
// and `start()` once it is ready for preemptive scheduling.
//
// Bring-up sequence:
// - `init()` wires up early I/O (serial, logging), installs the IDT and
//   interrupt controller, adopts the boot context as the first thread
//   and programs the tick source. Interrupts stay disabled throughout.
// - `start()` creates the idle thread, enables interrupts and calibrates
//   the sub-tick busy-wait. From here on the timer preempts freely.
//
// Layering, leaves first: serial/log (diagnostics), arch (context
// switch), interrupts (IDT + PIC + deferred yield), thread (TCB + table),
// sched (dispatch + donation plumbing), sync (semaphore, lock, condvar),
// timer (ticks + sleep). `selftest` is an optional in-kernel scenario
// suite behind the `selftest` feature.
//
// The crate is `no_std` on real targets; under `cfg(test)` it builds
// hosted so the scheduler's state machine is exercised by ordinary unit
// tests.

#![cfg_attr(not(test), no_std)]
#![feature(abi_x86_interrupt)]

pub mod arch;
pub mod interrupts;
pub mod log;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod thread;
pub mod timer;
pub mod util;

#[cfg(feature = "selftest")]
pub mod selftest;

pub use sched::{should_preempt, yield_now, TIME_SLICE};
pub use sync::{Condvar, Lock, Semaphore};
pub use thread::{SpawnError, ThreadStats, Tid, PRI_DEFAULT, PRI_MAX, PRI_MIN};

const LOG_ORIGIN: &str = "kernel";

/// Initialize the concurrency core. Must run once, with interrupts
/// disabled, before any other call into the crate.
pub fn init() {
    serial::init();
    log::init();

    log_info!(LOG_ORIGIN, "Quark concurrency core starting");

    interrupts::init();
    sched::init("main");
    timer::init();

    log_info!(LOG_ORIGIN, "Core initialized; call start() to begin scheduling");
}

/// Begin preemptive scheduling: create the idle thread, enable
/// interrupts and calibrate the sub-tick busy-wait. The caller continues
/// as the "main" thread.
pub fn start() {
    sched::start();
    interrupts::enable();
    timer::calibrate();

    log_info!(LOG_ORIGIN, "Preemptive scheduling active");
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    interrupts::disable();
    log_panic!(LOG_ORIGIN, "{}", info);
    loop {
        arch::halt();
    }
}
