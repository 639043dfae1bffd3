// Kernel Utilities
//
// Provides the interrupt-safe critical-section primitive used across the
// concurrency core.
//
// Key features:
// - `without_interrupts` runs a closure with interrupts disabled and
//   restores the previous interrupt flag afterwards
// - `interrupts_enabled` queries the current interrupt flag
//
// Every piece of scheduler-visible state (thread table, ready list, sleep
// queue, waiter lists, lock registry) is mutated only inside
// `without_interrupts`. On a single CPU this is the strongest mutual
// exclusion available and the only kind the core uses.
//
// On hosted targets (unit tests) interrupts do not exist and both
// functions degrade to plain calls, which keeps the scheduling logic
// testable off-hardware.

#[cfg(target_os = "none")]
#[inline(always)]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    x86_64::instructions::interrupts::without_interrupts(f)
}

#[cfg(not(target_os = "none"))]
#[inline(always)]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(target_os = "none")]
#[inline(always)]
pub fn interrupts_enabled() -> bool {
    x86_64::instructions::interrupts::are_enabled()
}

#[cfg(not(target_os = "none"))]
#[inline(always)]
pub fn interrupts_enabled() -> bool {
    false
}
