// Tick Source and Timed Sleep
//
// Drives the whole concurrency core from the 8254 PIT: the timer fires
// `TICK_HZ` times per second, and every interrupt advances the monotonic
// tick counter, charges the running thread's quantum and wakes expired
// sleepers (through `sched::on_tick`).
//
// Sleeping:
// - `sleep_ticks(n)` blocks the caller until at least `n` ticks elapsed;
//   non-positive requests return immediately
// - `sleep_ms` / `sleep_us` / `sleep_ns` convert to ticks rounding down;
//   a request shorter than one tick busy-waits instead, using a
//   loops-per-tick figure calibrated once at boot
// - Wakeups happen at or shortly after the deadline, never before
//
// The tick counter is an atomic with a single writer (the timer
// interrupt); readers need no critical section. `TICK_HZ` must stay
// within what the PIT divisor can express, which bottoms out just below
// 19 Hz.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use crate::log_info;
use crate::sched;

const LOG_ORIGIN: &str = "timer";

/// Timer interrupt frequency.
pub const TICK_HZ: u32 = 100;

const _: () = assert!(19 <= TICK_HZ && TICK_HZ <= 1000, "TICK_HZ outside the PIT's range");

const PIT_OSCILLATOR_HZ: u32 = 1_193_182;
#[cfg(target_os = "none")]
const PIT_COMMAND_PORT: u16 = 0x43;
#[cfg(target_os = "none")]
const PIT_CHANNEL0_PORT: u16 = 0x40;

static TICKS: AtomicU64 = AtomicU64::new(0);
static LOOPS_PER_TICK: AtomicU64 = AtomicU64::new(0);

/// Program the PIT for periodic interrupts at `TICK_HZ`.
pub fn init() {
    #[cfg(target_os = "none")]
    {
        use x86_64::instructions::port::Port;

        let divisor = (PIT_OSCILLATOR_HZ / TICK_HZ).min(0xFFFF) as u16;
        unsafe {
            // Channel 0, lobyte/hibyte, rate generator (mode 2).
            Port::new(PIT_COMMAND_PORT).write(0x34u8);
            Port::new(PIT_CHANNEL0_PORT).write((divisor & 0xFF) as u8);
            Port::new(PIT_CHANNEL0_PORT).write((divisor >> 8) as u8);
        }
    }

    log_info!(LOG_ORIGIN, "Tick source running at {} Hz", TICK_HZ);
}

/// Ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Ticks elapsed since `since` (itself a `ticks()` snapshot).
pub fn elapsed(since: u64) -> u64 {
    ticks() - since
}

/// One timer interrupt: advance the counter, drive the scheduler.
/// Called by the IRQ0 handler with interrupts disabled.
pub(crate) fn on_interrupt() {
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    sched::on_tick(now);
}

/// Block the caller for at least `n` ticks. `n <= 0` returns immediately.
pub fn sleep_ticks(n: i64) {
    if n <= 0 {
        return;
    }
    let wake_at = ticks() + n as u64;
    sched::sleep_until(wake_at);
}

/// Sleep for approximately `ms` milliseconds.
pub fn sleep_ms(ms: u64) {
    real_time_sleep(ms, 1_000);
}

/// Sleep for approximately `us` microseconds.
pub fn sleep_us(us: u64) {
    real_time_sleep(us, 1_000_000);
}

/// Sleep for approximately `ns` nanoseconds.
pub fn sleep_ns(ns: u64) {
    real_time_sleep(ns, 1_000_000_000);
}

/// Whole ticks in `num / denom` seconds, rounded down.
fn ticks_for(num: u64, denom: u64) -> u64 {
    (num as u128 * TICK_HZ as u128 / denom as u128) as u64
}

fn real_time_sleep(num: u64, denom: u64) {
    let tick_count = ticks_for(num, denom);
    if tick_count > 0 {
        // At least one full tick: let the sleep queue handle it.
        sleep_ticks(tick_count as i64);
    } else {
        // Sub-tick delay: busy-wait to keep better than tick resolution.
        let loops =
            (LOOPS_PER_TICK.load(Ordering::Relaxed) as u128 * num as u128 * TICK_HZ as u128
                / denom as u128) as u64;
        busy_wait(loops);
    }
}

/// Measure how many busy-wait loops fit in one tick. Must run after the
/// timer interrupt is live; interrupts stay enabled throughout.
pub fn calibrate() {
    assert!(
        crate::util::interrupts_enabled(),
        "calibrate needs the timer interrupt running"
    );

    // Largest power of two still under one tick...
    let mut loops: u64 = 1 << 10;
    while !too_many_loops(loops << 1) {
        loops <<= 1;
        assert!(loops != 0, "busy-wait calibration overflow");
    }

    // ...then refine with the next eight bits.
    let high_bit = loops;
    let mut test_bit = high_bit >> 1;
    while test_bit > high_bit >> 10 {
        if !too_many_loops(loops | test_bit) {
            loops |= test_bit;
        }
        test_bit >>= 1;
    }

    LOOPS_PER_TICK.store(loops, Ordering::Relaxed);
    log_info!(LOG_ORIGIN, "Busy-wait calibrated: ~{} loops/tick", loops);
}

/// True iff `loops` iterations span more than one tick.
fn too_many_loops(loops: u64) -> bool {
    // Align to a tick edge.
    let start = ticks();
    while start == ticks() {
        core::hint::spin_loop();
    }

    let start = ticks();
    busy_wait(loops);
    start != ticks()
}

/// Spin for `loops` iterations. `inline(never)` keeps the per-iteration
/// cost consistent between calibration and use.
#[inline(never)]
fn busy_wait(loops: u64) {
    let mut i = 0u64;
    while core::hint::black_box(i) < loops {
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_sleep_returns_immediately() {
        sleep_ticks(0);
        sleep_ticks(-5);
    }

    #[test]
    fn tick_conversion_rounds_down() {
        // At 100 Hz one tick is 10 ms.
        assert_eq!(ticks_for(10, 1_000), 1);
        assert_eq!(ticks_for(9, 1_000), 0);
        assert_eq!(ticks_for(25, 1_000), 2);
        assert_eq!(ticks_for(1_000, 1_000), TICK_HZ as u64);

        assert_eq!(ticks_for(10_000, 1_000_000), 1);
        assert_eq!(ticks_for(9_999, 1_000_000), 0);

        assert_eq!(ticks_for(10_000_000, 1_000_000_000), 1);
        assert_eq!(ticks_for(1, 1_000_000_000), 0);
    }

    #[test]
    fn tick_conversion_does_not_overflow() {
        // A huge nanosecond request must not wrap.
        let t = ticks_for(u64::MAX, 1_000_000_000);
        assert!(t > 0);
    }

    #[test]
    fn elapsed_is_difference_from_snapshot() {
        let now = ticks();
        assert_eq!(elapsed(now), 0);
    }
}
