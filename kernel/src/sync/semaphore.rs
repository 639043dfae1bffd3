// Counting Semaphore
//
// The base sleeping primitive of the core. `down` waits for the value to
// become positive and decrements it; `up` increments it and wakes the
// highest-priority waiter at that moment (FIFO among equals).
//
// Interrupt-context rules:
// - `down` blocks and is therefore forbidden in interrupt context
// - `try_down` and `up` never block and are interrupt-safe; an `up` that
//   makes preemption necessary defers the yield to interrupt exit
//
// A woken waiter re-runs the down loop rather than assuming the value
// was reserved for it: another thread may take the semaphore between the
// wakeup and the waiter actually running.

use spin::Mutex;

use crate::interrupts;
use crate::sched::{self, Core};
use crate::sync::{highest_waiter, SemaState};
use crate::util::without_interrupts;

/// One attempt at the down fast path. On failure the caller is already
/// queued and must block.
pub(crate) fn sema_down_attempt(core: &mut Core, state: &mut SemaState) -> bool {
    if state.value > 0 {
        state.value -= 1;
        true
    } else {
        let tid = core.current_tid();
        state.waiters.push(tid);
        false
    }
}

/// Increment and wake the best waiter. Selection happens at up time so it
/// observes priorities as donations have left them, not as they were at
/// enqueue time.
pub(crate) fn sema_up(core: &mut Core, state: &mut SemaState) {
    state.value += 1;
    if let Some(index) = highest_waiter(&core.threads, state.waiters.as_slice()) {
        let waiter = state.waiters.remove_at(index);
        core.unblock(waiter);
    }
}

/// Counting semaphore with priority-aware wakeup.
pub struct Semaphore {
    inner: Mutex<SemaState>,
}

impl Semaphore {
    /// Create a semaphore with the given initial value.
    pub const fn new(value: u32) -> Self {
        Semaphore {
            inner: Mutex::new(SemaState::new(value)),
        }
    }

    /// Wait until the value is positive, then decrement it.
    pub fn down(&self) {
        assert!(
            !interrupts::in_interrupt(),
            "Semaphore::down is not available in interrupt context"
        );

        loop {
            let acquired = without_interrupts(|| {
                let mut core = sched::core_guard();
                let mut state = self.inner.lock();
                if sema_down_attempt(&mut core, &mut state) {
                    true
                } else {
                    drop(state);
                    sched::block_current(core);
                    false
                }
            });
            if acquired {
                return;
            }
        }
    }

    /// Decrement the value if it is positive, without blocking. Safe from
    /// interrupt context.
    pub fn try_down(&self) -> bool {
        without_interrupts(|| {
            let mut state = self.inner.lock();
            if state.value > 0 {
                state.value -= 1;
                true
            } else {
                false
            }
        })
    }

    /// Increment the value and wake the highest-priority waiter. Safe
    /// from interrupt context; preemption is deferred to interrupt exit
    /// when necessary.
    pub fn up(&self) {
        without_interrupts(|| {
            let mut core = sched::core_guard();
            let mut state = self.inner.lock();
            sema_up(&mut core, &mut state);
        });
        sched::maybe_preempt();
    }

    /// Current value (diagnostic snapshot).
    pub fn value(&self) -> u32 {
        without_interrupts(|| self.inner.lock().value)
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        assert!(
            self.inner.lock().waiters.is_empty(),
            "destroying a semaphore with blocked waiters"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{ThreadState, Tid};

    fn new_thread(core: &mut Core, name: &str, priority: u8) -> Tid {
        let tid = core.admit(name, priority, None).unwrap();
        core.ready.remove(tid, priority);
        core.threads.get_mut(tid).state = ThreadState::Running;
        tid
    }

    /// Simulate a full `down` up to (and including) the block.
    fn down(core: &mut Core, state: &mut SemaState, tid: Tid) -> bool {
        core.current = Some(tid);
        if sema_down_attempt(core, state) {
            true
        } else {
            core.threads.get_mut(tid).state = ThreadState::Blocked;
            false
        }
    }

    #[test]
    fn down_decrements_when_positive() {
        let mut core = Core::new();
        let t = new_thread(&mut core, "t", 30);
        let mut state = SemaState::new(2);

        assert!(down(&mut core, &mut state, t));
        assert_eq!(state.value, 1);
        assert!(state.waiters.is_empty());
    }

    #[test]
    fn down_queues_when_zero() {
        let mut core = Core::new();
        let t = new_thread(&mut core, "t", 30);
        let mut state = SemaState::new(0);

        assert!(!down(&mut core, &mut state, t));
        assert_eq!(state.waiters.len(), 1);
        assert!(state.waiters.contains(t));
    }

    #[test]
    fn up_releases_the_single_waiter() {
        let mut core = Core::new();
        let waiter = new_thread(&mut core, "waiter", 30);
        let other = new_thread(&mut core, "other", 30);
        let mut state = SemaState::new(0);

        assert!(!down(&mut core, &mut state, waiter));

        core.current = Some(other);
        sema_up(&mut core, &mut state);

        assert!(state.waiters.is_empty());
        assert_eq!(core.threads.get(waiter).state, ThreadState::Ready);
        assert_eq!(state.value, 1);

        // The woken waiter retries and succeeds.
        core.ready.remove(waiter, 30);
        core.threads.get_mut(waiter).state = ThreadState::Running;
        assert!(down(&mut core, &mut state, waiter));
        assert_eq!(state.value, 0);
    }

    #[test]
    fn up_wakes_highest_priority_waiter() {
        let mut core = Core::new();
        let low = new_thread(&mut core, "low", 20);
        let high = new_thread(&mut core, "high", 40);
        let mid = new_thread(&mut core, "mid", 30);
        let mut state = SemaState::new(0);

        for &t in &[low, high, mid] {
            assert!(!down(&mut core, &mut state, t));
        }

        sema_up(&mut core, &mut state);
        assert_eq!(core.threads.get(high).state, ThreadState::Ready);
        assert_eq!(core.threads.get(mid).state, ThreadState::Blocked);

        sema_up(&mut core, &mut state);
        assert_eq!(core.threads.get(mid).state, ThreadState::Ready);
        assert_eq!(core.threads.get(low).state, ThreadState::Blocked);

        sema_up(&mut core, &mut state);
        assert_eq!(core.threads.get(low).state, ThreadState::Ready);
    }

    #[test]
    fn up_observes_priority_changes_while_waiting() {
        let mut core = Core::new();
        let a = new_thread(&mut core, "a", 20);
        let b = new_thread(&mut core, "b", 30);
        let mut state = SemaState::new(0);

        assert!(!down(&mut core, &mut state, a));
        assert!(!down(&mut core, &mut state, b));

        // A donation arrives while `a` sits in the list.
        core.set_effective(a, 50);

        sema_up(&mut core, &mut state);
        assert_eq!(core.threads.get(a).state, ThreadState::Ready);
        assert_eq!(core.threads.get(b).state, ThreadState::Blocked);
    }

    #[test]
    fn up_with_single_waiter_empties_the_list() {
        let mut core = Core::new();
        let a = new_thread(&mut core, "a", 20);
        let mut state = SemaState::new(0);

        assert!(!down(&mut core, &mut state, a));
        sema_up(&mut core, &mut state);

        // The released waiter is out of the list; its retry will consume
        // the value.
        assert!(state.waiters.is_empty());
        assert_eq!(state.value, 1);
    }
}
