// Interrupt Subsystem Orchestration
//
// Top-level coordination for the kernel interrupt system: IDT setup,
// legacy PIC initialization, and the runtime interrupt state the
// scheduler consumes.
//
// Key responsibilities:
// - Initialize interrupt-related subsystems in the correct order
//   (IDT before controller, controller before `enable`)
// - Track whether execution is currently inside an interrupt handler
// - Carry the deferred-yield flag: code running in interrupt context must
//   not context-switch mid-handler, so it requests a yield that the
//   handler performs at its tail, after end-of-interrupt
//
// The interrupt-context depth and the yield flag are plain atomics: both
// are only written on the single CPU, either by handlers (interrupts
// disabled) or inside `without_interrupts` sections.

#[cfg(target_arch = "x86_64")]
pub mod handlers;
#[cfg(target_arch = "x86_64")]
pub mod idt;
#[cfg(target_arch = "x86_64")]
pub mod pic;

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::log_info;

const LOG_ORIGIN: &str = "intr";

pub const TIMER_INTERRUPT_VECTOR: u8 = 32;

static INTERRUPT_DEPTH: AtomicUsize = AtomicUsize::new(0);
static YIELD_ON_RETURN: AtomicBool = AtomicBool::new(false);

#[cfg(target_arch = "x86_64")]
pub fn init() {
    log_info!(LOG_ORIGIN, "Initializing interrupt system...");

    idt::init();
    pic::init();

    log_info!(LOG_ORIGIN, "Interrupt system initialized");
}

#[cfg(not(target_arch = "x86_64"))]
pub fn init() {
    log_info!(LOG_ORIGIN, "Interrupt system unavailable on this target");
}

#[cfg(target_os = "none")]
pub fn enable() {
    x86_64::instructions::interrupts::enable();
}

#[cfg(not(target_os = "none"))]
pub fn enable() {}

#[cfg(target_os = "none")]
#[allow(dead_code)]
pub fn disable() {
    x86_64::instructions::interrupts::disable();
}

#[cfg(not(target_os = "none"))]
#[allow(dead_code)]
pub fn disable() {}

/// True while executing inside an interrupt handler.
///
/// Blocking operations assert this is false; `Semaphore::up` and friends
/// use it to decide between yielding directly and deferring the yield to
/// interrupt exit.
pub fn in_interrupt() -> bool {
    INTERRUPT_DEPTH.load(Ordering::Relaxed) != 0
}

/// Request a context switch at the tail of the running interrupt handler.
///
/// Callable only from interrupt context; the handler honors the request
/// after signalling end-of-interrupt.
pub fn yield_on_return() {
    debug_assert!(in_interrupt());
    YIELD_ON_RETURN.store(true, Ordering::Relaxed);
}

pub(crate) fn enter_interrupt() {
    INTERRUPT_DEPTH.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn leave_interrupt() {
    let prev = INTERRUPT_DEPTH.fetch_sub(1, Ordering::Relaxed);
    debug_assert!(prev != 0);
}

pub(crate) fn take_yield_request() -> bool {
    YIELD_ON_RETURN.swap(false, Ordering::Relaxed)
}
