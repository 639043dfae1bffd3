// Condition Variables (Mesa-style)
//
// Lets a thread atomically release a lock and wait for a condition that
// other threads signal under the same lock. Signalling is not atomic
// with the waiter's re-acquisition, so a woken thread may find the
// condition false again: callers recheck their predicate in a loop.
//
//     while !condition() {
//         condvar.wait(&lock);
//     }
//
// Each `signal` wakes exactly one waiter, the one with the highest
// effective priority at signal time. Membership of the waiter list is
// the wakeup token: a waiter that finds itself removed before it managed
// to block knows the signal already happened and skips the block
// entirely. That closes the release-to-block window without needing a
// semaphore on the waiter's stack.
//
// `signal` and `broadcast` require the associated lock to be held, which
// also means they cannot run from interrupt context.

use spin::Mutex;

use crate::interrupts;
use crate::sched::{self, Core};
use crate::sync::{highest_waiter, Lock, WaitList};
use crate::thread::{ThreadState, Tid};
use crate::util::without_interrupts;

/// Remove the best waiter from the list and wake it if it already
/// blocked. Returns the waiter, if any.
pub(crate) fn signal_step(core: &mut Core, waiters: &mut WaitList) -> Option<Tid> {
    let index = highest_waiter(&core.threads, waiters.as_slice())?;
    let waiter = waiters.remove_at(index);
    // A waiter still between its enqueue and its block is Running or
    // Ready; removal alone is its wakeup token.
    if core.threads.get(waiter).state == ThreadState::Blocked {
        core.unblock(waiter);
    }
    Some(waiter)
}

/// Mesa-style condition variable.
pub struct Condvar {
    waiters: Mutex<WaitList>,
}

impl Condvar {
    pub const fn new() -> Self {
        Condvar {
            waiters: Mutex::new(WaitList::new()),
        }
    }

    /// Atomically release `lock` and wait for a signal, then re-acquire
    /// `lock` before returning. The caller must hold `lock` and must
    /// recheck its predicate afterwards.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            !interrupts::in_interrupt(),
            "Condvar::wait is not available in interrupt context"
        );
        assert!(
            lock.held_by_current(),
            "Condvar::wait without holding the associated lock"
        );

        let tid = crate::sched::current();

        without_interrupts(|| {
            self.waiters.lock().push(tid);
        });

        lock.release();

        without_interrupts(|| {
            let core = sched::core_guard();
            let waiters = self.waiters.lock();
            if waiters.contains(tid) {
                // Not signalled yet; sleep until `signal_step` removes us.
                drop(waiters);
                sched::block_current(core);
            }
        });

        lock.acquire();
    }

    /// Wake the highest-priority waiter, if any. The caller must hold the
    /// associated lock.
    pub fn signal(&self, lock: &Lock) {
        assert!(
            lock.held_by_current(),
            "Condvar::signal without holding the associated lock"
        );

        without_interrupts(|| {
            let mut core = sched::core_guard();
            let mut waiters = self.waiters.lock();
            signal_step(&mut core, &mut waiters);
        });
    }

    /// Wake every waiter. The caller must hold the associated lock.
    pub fn broadcast(&self, lock: &Lock) {
        assert!(
            lock.held_by_current(),
            "Condvar::broadcast without holding the associated lock"
        );

        without_interrupts(|| {
            let mut core = sched::core_guard();
            let mut waiters = self.waiters.lock();
            while signal_step(&mut core, &mut waiters).is_some() {}
        });
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Condvar::new()
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        assert!(
            self.waiters.lock().is_empty(),
            "destroying a condition variable with blocked waiters"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_blocked_waiter(core: &mut Core, waiters: &mut WaitList, name: &str, priority: u8) -> Tid {
        let tid = core.admit(name, priority, None).unwrap();
        core.ready.remove(tid, priority);
        waiters.push(tid);
        core.threads.get_mut(tid).state = ThreadState::Blocked;
        tid
    }

    #[test]
    fn signal_wakes_in_priority_order() {
        let mut core = Core::new();
        let mut waiters = WaitList::new();
        let w20 = new_blocked_waiter(&mut core, &mut waiters, "w20", 20);
        let w30 = new_blocked_waiter(&mut core, &mut waiters, "w30", 30);
        let w40 = new_blocked_waiter(&mut core, &mut waiters, "w40", 40);

        assert_eq!(signal_step(&mut core, &mut waiters), Some(w40));
        assert_eq!(signal_step(&mut core, &mut waiters), Some(w30));
        assert_eq!(signal_step(&mut core, &mut waiters), Some(w20));
        assert_eq!(signal_step(&mut core, &mut waiters), None);

        for &t in &[w20, w30, w40] {
            assert_eq!(core.threads.get(t).state, ThreadState::Ready);
        }
    }

    #[test]
    fn signal_on_empty_list_is_a_noop() {
        let mut core = Core::new();
        let mut waiters = WaitList::new();
        assert_eq!(signal_step(&mut core, &mut waiters), None);
    }

    #[test]
    fn signal_before_block_only_removes_the_entry() {
        let mut core = Core::new();
        let mut waiters = WaitList::new();

        // The waiter enqueued itself but was preempted before blocking.
        let tid = core.admit("w", 30, None).unwrap();
        waiters.push(tid);

        assert_eq!(signal_step(&mut core, &mut waiters), Some(tid));
        assert!(!waiters.contains(tid));
        // Still Ready, not spuriously unblocked.
        assert_eq!(core.threads.get(tid).state, ThreadState::Ready);
    }

    #[test]
    fn broadcast_drains_every_waiter() {
        let mut core = Core::new();
        let mut waiters = WaitList::new();
        let a = new_blocked_waiter(&mut core, &mut waiters, "a", 10);
        let b = new_blocked_waiter(&mut core, &mut waiters, "b", 20);
        let c = new_blocked_waiter(&mut core, &mut waiters, "c", 30);

        while signal_step(&mut core, &mut waiters).is_some() {}

        assert!(waiters.is_empty());
        for &t in &[a, b, c] {
            assert_eq!(core.threads.get(t).state, ThreadState::Ready);
        }
    }
}
