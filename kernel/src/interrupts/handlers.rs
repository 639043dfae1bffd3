// Interrupt and Exception Handlers
//
// Entry points the IDT dispatches into.
//
// Timer handling:
// - Vector 32 (IRQ0) drives the whole concurrency core: it advances the
//   tick counter, charges the running thread's quantum and wakes expired
//   sleepers via `timer::on_interrupt`
// - A context switch requested from interrupt context (quantum expiry,
//   higher-priority wakeup) is performed at the handler tail, after
//   end-of-interrupt, never mid-handler
//
// Exception handling:
// - CPU exceptions are programming bugs in kernel code; handlers dump the
//   saved frame and halt forever (fail-stop)
// - The catch-all handler logs stray vectors; with every device line
//   masked except the timer it should never fire
//
// The interrupt-context depth is maintained around the timer body so that
// `in_interrupt()` answers correctly for code the tick path calls into.

use crate::arch::halt;
use crate::{log_panic, log_warn};

use super::pic;
use super::TIMER_INTERRUPT_VECTOR;

const LOG_ORIGIN: &str = "intr";

/// Hardware-pushed interrupt frame (x86-interrupt ABI).
#[repr(C)]
#[derive(Debug)]
pub struct InterruptStackFrame {
    pub instruction_pointer: u64,
    pub code_segment: u64,
    pub cpu_flags: u64,
    pub stack_pointer: u64,
    pub stack_segment: u64,
}

pub extern "x86-interrupt" fn timer_interrupt_handler(_frame: &mut InterruptStackFrame) {
    super::enter_interrupt();
    crate::timer::on_interrupt();
    pic::end_of_interrupt(TIMER_INTERRUPT_VECTOR);
    super::leave_interrupt();

    // Deferred preemption: the tick path may have requested a switch.
    if super::take_yield_request() {
        crate::sched::yield_now();
    }
}

pub extern "x86-interrupt" fn unexpected_interrupt_handler(frame: &mut InterruptStackFrame) {
    log_warn!(
        LOG_ORIGIN,
        "Unexpected interrupt at RIP={:#016X}",
        frame.instruction_pointer
    );
}

fn fail_stop(name: &str, frame: &InterruptStackFrame, error_code: Option<u64>) -> ! {
    log_panic!(LOG_ORIGIN, "CPU exception: {}", name);

    if let Some(code) = error_code {
        log_panic!(LOG_ORIGIN, "Error code: {:#X}", code);
    }

    log_panic!(
        LOG_ORIGIN,
        "Execution state: RIP={:#016X} CS={:#04X} RFLAGS={:#016X} RSP={:#016X} SS={:#04X}",
        frame.instruction_pointer,
        frame.code_segment,
        frame.cpu_flags,
        frame.stack_pointer,
        frame.stack_segment
    );

    log_panic!(LOG_ORIGIN, "System halted due to fatal exception");

    loop {
        halt();
    }
}

pub extern "x86-interrupt" fn divide_error_handler(frame: &mut InterruptStackFrame) {
    fail_stop("#DE - Divide Error", frame, None);
}

pub extern "x86-interrupt" fn breakpoint_handler(frame: &mut InterruptStackFrame) {
    log_warn!(
        LOG_ORIGIN,
        "Breakpoint at RIP={:#016X}",
        frame.instruction_pointer
    );
}

pub extern "x86-interrupt" fn invalid_opcode_handler(frame: &mut InterruptStackFrame) {
    fail_stop("#UD - Invalid Opcode", frame, None);
}

pub extern "x86-interrupt" fn double_fault_handler(
    frame: &mut InterruptStackFrame,
    error_code: u64,
) -> ! {
    fail_stop("#DF - Double Fault", frame, Some(error_code));
}

pub extern "x86-interrupt" fn general_protection_handler(
    frame: &mut InterruptStackFrame,
    error_code: u64,
) {
    fail_stop("#GP - General Protection Fault", frame, Some(error_code));
}

pub extern "x86-interrupt" fn page_fault_handler(frame: &mut InterruptStackFrame, error_code: u64) {
    let cr2: u64;
    unsafe {
        core::arch::asm!(
            "mov {}, cr2",
            out(reg) cr2,
            options(nomem, nostack, preserves_flags)
        );
    }

    log_panic!(LOG_ORIGIN, "Page fault at address {:#016X}", cr2);
    log_panic!(
        LOG_ORIGIN,
        "PF flags: present={} write={} user={} instr_fetch={}",
        error_code & 0x1 != 0,
        error_code & 0x2 != 0,
        error_code & 0x4 != 0,
        error_code & 0x10 != 0
    );

    fail_stop("#PF - Page Fault", frame, Some(error_code));
}
