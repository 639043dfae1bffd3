// Interrupt Descriptor Table (IDT) Setup
//
// Defines and initializes the x86_64 Interrupt Descriptor Table that
// dispatches CPU exceptions and hardware interrupts into kernel handlers.
//
// Key responsibilities:
// - Define the hardware layout of IDT entries (16-byte descriptors)
// - Populate the exception vectors the core cares about with fail-stop
//   handlers and vector 32 with the timer handler
// - Point every remaining vector at a logging catch-all
// - Load the table with `lidt`
//
// Implementation details:
// - `IdtEntry` splits handler addresses into low/mid/high fields
// - All handlers use the `x86-interrupt` ABI, so the CPU-pushed frame is
//   consumed directly without assembly stubs
// - Exception handlers are installed with kernel CS and DPL=0; the
//   breakpoint vector uses a trap gate so IF survives for debugging
//
// Correctness notes:
// - The IDT is 16-byte aligned and lives for the kernel lifetime
// - `init` must run before interrupts are enabled; a vector taken with an
//   empty IDT triple-faults

use core::mem::size_of;

use super::handlers;
use super::TIMER_INTERRUPT_VECTOR;
use crate::log_info;

const IDT_SIZE: usize = 256;

const GATE_TYPE_INTERRUPT: u8 = 0x8E;
const GATE_TYPE_TRAP: u8 = 0x8F;
const LOG_ORIGIN: &str = "idt";

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    type_attr: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl IdtEntry {
    const fn empty() -> Self {
        IdtEntry {
            offset_low: 0,
            selector: 0,
            ist: 0,
            type_attr: 0,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    fn set_handler(&mut self, handler: usize, type_attr: u8) {
        self.offset_low = (handler & 0xFFFF) as u16;
        self.offset_mid = ((handler >> 16) & 0xFFFF) as u16;
        self.offset_high = ((handler >> 32) & 0xFFFF_FFFF) as u32;
        self.selector = kernel_code_selector();
        self.ist = 0;
        self.type_attr = type_attr;
        self.reserved = 0;
    }
}

#[repr(C, align(16))]
struct Idt {
    entries: [IdtEntry; IDT_SIZE],
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u64,
}

static mut IDT: Idt = Idt {
    entries: [IdtEntry::empty(); IDT_SIZE],
};

fn kernel_code_selector() -> u16 {
    use x86_64::registers::segmentation::{Segment, CS};

    CS::get_reg().0
}

pub fn init() {
    unsafe {
        let entries = &mut *core::ptr::addr_of_mut!(IDT.entries);

        for entry in entries.iter_mut() {
            entry.set_handler(
                handlers::unexpected_interrupt_handler as usize,
                GATE_TYPE_INTERRUPT,
            );
        }

        entries[0].set_handler(handlers::divide_error_handler as usize, GATE_TYPE_INTERRUPT);
        entries[3].set_handler(handlers::breakpoint_handler as usize, GATE_TYPE_TRAP);
        entries[6].set_handler(handlers::invalid_opcode_handler as usize, GATE_TYPE_INTERRUPT);
        entries[8].set_handler(handlers::double_fault_handler as usize, GATE_TYPE_INTERRUPT);
        entries[13].set_handler(
            handlers::general_protection_handler as usize,
            GATE_TYPE_INTERRUPT,
        );
        entries[14].set_handler(handlers::page_fault_handler as usize, GATE_TYPE_INTERRUPT);

        entries[TIMER_INTERRUPT_VECTOR as usize]
            .set_handler(handlers::timer_interrupt_handler as usize, GATE_TYPE_INTERRUPT);

        let idt_ptr = IdtPointer {
            limit: (size_of::<Idt>() - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u64,
        };

        load_idt(&idt_ptr);
    }

    log_info!(LOG_ORIGIN, "IDT initialized with {} entries", IDT_SIZE);
}

#[inline]
unsafe fn load_idt(idt_ptr: &IdtPointer) {
    core::arch::asm!(
        "lidt [{}]",
        in(reg) idt_ptr,
        options(readonly, nostack, preserves_flags)
    );
}
