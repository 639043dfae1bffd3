// Legacy 8259 PIC Support
//
// Interrupt controller plumbing for the tick source: remaps the two
// chained PICs away from the CPU exception range, unmasks only the timer
// line (IRQ0), and signals end-of-interrupt.
//
// The concurrency core has no other interrupt-driven devices, so every
// line except IRQ0 and the cascade stays masked; stray lines land in the
// IDT's catch-all handler.

use pic8259::ChainedPics;
use spin::Mutex;

use crate::log_info;

const LOG_ORIGIN: &str = "pic";

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

// IRQ0 (timer) and IRQ2 (cascade) open, everything else masked.
const PIC_1_MASK: u8 = 0b1111_1010;
const PIC_2_MASK: u8 = 0b1111_1111;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

pub fn init() {
    unsafe {
        let mut pics = PICS.lock();
        pics.initialize();
        pics.write_masks(PIC_1_MASK, PIC_2_MASK);
    }

    log_info!(
        LOG_ORIGIN,
        "PICs remapped to vectors {}..{}, timer line unmasked",
        PIC_1_OFFSET,
        PIC_2_OFFSET + 8
    );
}

pub fn end_of_interrupt(vector: u8) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector);
    }
}
