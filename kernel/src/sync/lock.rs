// Locks with Priority Donation
//
// Non-recursive mutual exclusion built on an embedded binary semaphore,
// with multi-level priority donation: a thread blocking on a held lock
// raises the holder's effective priority to its own, transitively across
// a chain of blocked holders, so a low-priority holder cannot starve a
// high-priority waiter behind a medium-priority bystander.
//
// Representation:
// - Lock state (holder + embedded semaphore) lives in a fixed registry
//   inside the scheduler core; the public `Lock` value carries a slot
//   handle with a generation, exactly like thread handles. The donation
//   walk is then a bounded loop over registry lookups with no pointer
//   cycles anywhere.
// - A thread records the lock it is blocked on and the locks it holds;
//   those two fields plus the registry are everything donation needs.
//
// Donation rules:
// - On a blocking acquire the chain walk raises every holder below the
//   donor's effective priority, following holder -> blocked_on -> holder
//   until a priority ceiling, an unblocked holder, or the depth clamp
// - On release the holder's effective priority is recomputed from scratch
//   against the current waiters of the locks it still holds; cached
//   values are never trusted because donations mutate while threads wait
// - `try_acquire` never donates: it only succeeds when nobody holds the
//   lock, so there is nobody to donate to
//
// Dropping a lock that is held or contended is a bug and panics.

use core::fmt;

use crate::interrupts;
use crate::sched::{self, Core};
use crate::sync::{highest_waiter, SemaState};
use crate::thread::Tid;
use crate::util::without_interrupts;

/// Donation chains longer than this stop propagating (not fatal).
pub(crate) const DONATION_DEPTH_MAX: usize = 8;

/// Capacity of the lock registry.
pub(crate) const MAX_LOCKS: usize = 64;

/// Lock handle: registry slot plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LockId {
    slot: u16,
    generation: u16,
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.slot, self.generation)
    }
}

struct LockRecord {
    generation: u16,
    active: bool,
    holder: Option<Tid>,
    sema: SemaState,
}

/// Fixed arena of lock records inside the scheduler core.
pub(crate) struct LockTable {
    records: [LockRecord; MAX_LOCKS],
}

impl LockTable {
    pub(crate) const fn new() -> Self {
        LockTable {
            records: [const {
                LockRecord {
                    generation: 0,
                    active: false,
                    holder: None,
                    sema: SemaState::new(0),
                }
            }; MAX_LOCKS],
        }
    }

    pub(crate) fn register(&mut self) -> Option<LockId> {
        for (index, record) in self.records.iter_mut().enumerate() {
            if !record.active {
                record.active = true;
                record.holder = None;
                record.sema = SemaState::new(1);
                return Some(LockId {
                    slot: index as u16,
                    generation: record.generation,
                });
            }
        }
        None
    }

    pub(crate) fn dispose(&mut self, lid: LockId) {
        let record = self.record_mut(lid);
        assert!(
            record.holder.is_none() && record.sema.waiters.is_empty(),
            "destroying lock {} while it is in use",
            lid
        );
        record.active = false;
        record.generation = record.generation.wrapping_add(1);
    }

    fn record(&self, lid: LockId) -> &LockRecord {
        let record = &self.records[lid.slot as usize];
        assert!(
            record.active && record.generation == lid.generation,
            "stale lock handle {}",
            lid
        );
        record
    }

    fn record_mut(&mut self, lid: LockId) -> &mut LockRecord {
        let record = &mut self.records[lid.slot as usize];
        assert!(
            record.active && record.generation == lid.generation,
            "stale lock handle {}",
            lid
        );
        record
    }

    pub(crate) fn holder(&self, lid: LockId) -> Option<Tid> {
        self.record(lid).holder
    }

    pub(crate) fn waiters(&self, lid: LockId) -> &[Tid] {
        self.record(lid).sema.waiters.as_slice()
    }
}

// Lock semantics on the scheduler core, kept here so the donation logic
// lives next to the data it reasons about.
impl Core {
    /// Fast path: take the lock if it is free. No donation work.
    pub(crate) fn lock_try_acquire(&mut self, tid: Tid, lid: LockId) -> bool {
        let record = self.locks.record_mut(lid);
        assert!(
            record.holder != Some(tid),
            "thread {} re-acquiring lock {} it already holds",
            tid,
            lid
        );
        if record.sema.value == 0 {
            return false;
        }
        record.sema.value -= 1;
        record.holder = Some(tid);

        let t = self.threads.get_mut(tid);
        t.blocked_on = None;
        t.held_locks.push(lid).expect("held-lock list full");
        true
    }

    /// Slow path: record the wait edge, run the donation chain, join the
    /// waiter list. The caller blocks afterwards.
    pub(crate) fn lock_enqueue_waiter(&mut self, tid: Tid, lid: LockId) {
        self.threads.get_mut(tid).blocked_on = Some(lid);
        self.donate_chain(tid, lid);
        self.locks.record_mut(lid).sema.waiters.push(tid);
    }

    /// Give the lock up: shed its donations, free the embedded semaphore
    /// and wake the highest-priority waiter.
    pub(crate) fn lock_release(&mut self, tid: Tid, lid: LockId) {
        assert!(
            self.locks.record(lid).holder == Some(tid),
            "thread {} releasing lock {} it does not hold",
            tid,
            lid
        );

        let t = self.threads.get_mut(tid);
        let position = t
            .held_locks
            .iter()
            .position(|&l| l == lid)
            .expect("held-lock list out of sync with lock registry");
        t.held_locks.remove(position);

        self.refresh_effective(tid);

        let record = self.locks.record_mut(lid);
        record.holder = None;
        record.sema.value += 1;

        let index = highest_waiter(&self.threads, self.locks.waiters(lid));
        if let Some(index) = index {
            let waiter = self.locks.record_mut(lid).sema.waiters.remove_at(index);
            self.unblock(waiter);
        }
    }
}

/// Non-recursive lock with priority donation.
pub struct Lock {
    id: LockId,
}

impl Lock {
    /// Register a new, free lock.
    ///
    /// Panics when the lock registry is exhausted.
    pub fn new() -> Self {
        let id = sched::with_core(|core| core.locks.register()).expect("lock registry exhausted");
        Lock { id }
    }

    /// Acquire the lock, blocking until it is free. Runs the donation
    /// chain while waiting. Not available in interrupt context; acquiring
    /// a lock already held by the caller is a bug and panics.
    pub fn acquire(&self) {
        assert!(
            !interrupts::in_interrupt(),
            "Lock::acquire is not available in interrupt context"
        );

        loop {
            let acquired = without_interrupts(|| {
                let mut core = sched::core_guard();
                let tid = core.current_tid();
                if core.lock_try_acquire(tid, self.id) {
                    true
                } else {
                    core.lock_enqueue_waiter(tid, self.id);
                    sched::block_current(core);
                    false
                }
            });
            if acquired {
                return;
            }
        }
    }

    /// Take the lock only if it is free right now. Never blocks and never
    /// donates (a free lock has nobody to donate to).
    pub fn try_acquire(&self) -> bool {
        without_interrupts(|| {
            let mut core = sched::core_guard();
            let tid = core.current_tid();
            core.lock_try_acquire(tid, self.id)
        })
    }

    /// Release the lock. The caller must hold it. Sheds donations, wakes
    /// the highest-priority waiter, and yields if that waiter (or anyone
    /// else ready) now outranks the caller.
    pub fn release(&self) {
        without_interrupts(|| {
            let mut core = sched::core_guard();
            let tid = core.current_tid();
            core.lock_release(tid, self.id);
        });
        sched::maybe_preempt();
    }

    /// True iff the calling thread holds this lock.
    pub fn held_by_current(&self) -> bool {
        sched::with_core(|core| core.locks.holder(self.id) == Some(core.current_tid()))
    }
}

impl Default for Lock {
    fn default() -> Self {
        Lock::new()
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        sched::with_core(|core| core.locks.dispose(self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::Core;
    use crate::thread::ThreadState;

    fn new_thread(core: &mut Core, name: &str, priority: u8) -> Tid {
        let tid = core.admit(name, priority, None).unwrap();
        // Keep test threads out of the ready list; these tests drive the
        // lock state machine, not the dispatcher.
        core.ready.remove(tid, priority);
        core.threads.get_mut(tid).state = ThreadState::Running;
        tid
    }

    /// Simulate `Lock::acquire` up to (and including) the block.
    fn acquire(core: &mut Core, tid: Tid, lid: LockId) -> bool {
        if core.lock_try_acquire(tid, lid) {
            true
        } else {
            core.lock_enqueue_waiter(tid, lid);
            core.threads.get_mut(tid).state = ThreadState::Blocked;
            false
        }
    }

    /// Finish a woken waiter's acquire loop.
    fn reacquire(core: &mut Core, tid: Tid, lid: LockId) {
        assert_eq!(core.threads.get(tid).state, ThreadState::Ready);
        core.threads.get_mut(tid).state = ThreadState::Running;
        core.ready.remove(tid, core.threads.effective(tid));
        assert!(core.lock_try_acquire(tid, lid), "woken waiter lost the lock");
    }

    #[test]
    fn uncontended_acquire_release() {
        let mut core = Core::new();
        let t = new_thread(&mut core, "t", 30);
        let lid = core.locks.register().unwrap();

        assert!(acquire(&mut core, t, lid));
        assert_eq!(core.locks.holder(lid), Some(t));
        assert_eq!(core.threads.get(t).effective_priority, 30);

        core.lock_release(t, lid);
        assert_eq!(core.locks.holder(lid), None);
        assert!(core.threads.get(t).held_locks.is_empty());
    }

    #[test]
    fn simple_donation_raises_and_restores_holder() {
        let mut core = Core::new();
        let low = new_thread(&mut core, "low", 30);
        let high = new_thread(&mut core, "high", 50);
        let lid = core.locks.register().unwrap();

        assert!(acquire(&mut core, low, lid));
        assert!(!acquire(&mut core, high, lid));

        // While high is blocked, low is observed at high's priority.
        assert_eq!(core.threads.get(low).effective_priority, 50);
        assert_eq!(core.threads.get(low).base_priority, 30);

        core.lock_release(low, lid);
        assert_eq!(core.threads.get(low).effective_priority, 30);

        reacquire(&mut core, high, lid);
        assert_eq!(core.locks.holder(lid), Some(high));
    }

    #[test]
    fn chained_donation_propagates_and_unwinds() {
        let mut core = Core::new();
        let low = new_thread(&mut core, "low", 10);
        let med = new_thread(&mut core, "med", 20);
        let high = new_thread(&mut core, "high", 30);
        let lock_a = core.locks.register().unwrap();
        let lock_b = core.locks.register().unwrap();

        assert!(acquire(&mut core, low, lock_a));
        assert!(acquire(&mut core, med, lock_b));
        assert!(!acquire(&mut core, med, lock_a));

        // Med's priority flowed to low.
        assert_eq!(core.threads.get(low).effective_priority, 20);

        assert!(!acquire(&mut core, high, lock_b));

        // High's priority flowed through med to low.
        assert_eq!(core.threads.get(med).effective_priority, 30);
        assert_eq!(core.threads.get(low).effective_priority, 30);

        // Low releases A: low drops to base, med wakes still donated-to
        // by high.
        core.lock_release(low, lock_a);
        assert_eq!(core.threads.get(low).effective_priority, 10);
        reacquire(&mut core, med, lock_a);
        assert_eq!(core.threads.get(med).effective_priority, 30);

        // Med releases B: the donation unwinds, high wakes.
        core.lock_release(med, lock_b);
        assert_eq!(core.threads.get(med).effective_priority, 20);
        reacquire(&mut core, high, lock_b);
        assert_eq!(core.threads.get(high).effective_priority, 30);
    }

    #[test]
    fn multiple_donations_release_one_at_a_time() {
        let mut core = Core::new();
        let low = new_thread(&mut core, "low", 30);
        let wa = new_thread(&mut core, "wa", 40);
        let wb = new_thread(&mut core, "wb", 35);
        let lock_a = core.locks.register().unwrap();
        let lock_b = core.locks.register().unwrap();

        assert!(acquire(&mut core, low, lock_a));
        assert!(acquire(&mut core, low, lock_b));
        assert!(!acquire(&mut core, wa, lock_a));
        assert!(!acquire(&mut core, wb, lock_b));

        assert_eq!(core.threads.get(low).effective_priority, 40);

        core.lock_release(low, lock_a);
        assert_eq!(core.threads.get(low).effective_priority, 35);

        core.lock_release(low, lock_b);
        assert_eq!(core.threads.get(low).effective_priority, 30);
    }

    #[test]
    fn release_recomputes_from_current_waiter_priorities() {
        let mut core = Core::new();
        let low = new_thread(&mut core, "low", 10);
        let waiter = new_thread(&mut core, "waiter", 20);
        let lock_a = core.locks.register().unwrap();
        let lock_b = core.locks.register().unwrap();

        assert!(acquire(&mut core, low, lock_a));
        assert!(acquire(&mut core, low, lock_b));
        assert!(!acquire(&mut core, waiter, lock_a));
        assert_eq!(core.threads.get(low).effective_priority, 20);

        // The waiter's priority changes while it sits in the list.
        core.set_effective(waiter, 45);

        // Releasing the other lock must observe 45, not the stale 20.
        core.lock_release(low, lock_b);
        assert_eq!(core.threads.get(low).effective_priority, 45);
    }

    #[test]
    fn donation_chain_stops_at_depth_clamp() {
        let mut core = Core::new();

        // holders[i] holds locks[i] and blocks on locks[i + 1].
        let mut holders = heapless::Vec::<Tid, 16>::new();
        let mut locks = heapless::Vec::<LockId, 16>::new();
        for i in 0..10 {
            holders.push(new_thread(&mut core, "h", 5)).unwrap();
            locks.push(core.locks.register().unwrap()).unwrap();
            assert!(acquire(&mut core, holders[i], locks[i]));
        }
        for i in 0..9 {
            assert!(!acquire(&mut core, holders[i], locks[i + 1]));
        }

        let donor = new_thread(&mut core, "donor", 60);
        assert!(!acquire(&mut core, donor, locks[0]));

        // The walk visits holders[0..8] and then gives up.
        for i in 0..DONATION_DEPTH_MAX {
            assert_eq!(core.threads.get(holders[i]).effective_priority, 60, "holder {}", i);
        }
        assert_eq!(core.threads.get(holders[8]).effective_priority, 5);
        assert_eq!(core.threads.get(holders[9]).effective_priority, 5);
    }

    #[test]
    fn try_acquire_held_lock_fails_without_donation() {
        let mut core = Core::new();
        let low = new_thread(&mut core, "low", 10);
        let high = new_thread(&mut core, "high", 50);
        let lid = core.locks.register().unwrap();

        assert!(acquire(&mut core, low, lid));
        assert!(!core.lock_try_acquire(high, lid));
        assert_eq!(core.threads.get(low).effective_priority, 10);
        assert!(core.threads.get(high).blocked_on.is_none());
    }

    #[test]
    fn release_wakes_highest_priority_waiter_first() {
        let mut core = Core::new();
        let holder = new_thread(&mut core, "holder", 10);
        let mid = new_thread(&mut core, "mid", 30);
        let high = new_thread(&mut core, "high", 50);
        let low = new_thread(&mut core, "low", 20);
        let lid = core.locks.register().unwrap();

        assert!(acquire(&mut core, holder, lid));
        assert!(!acquire(&mut core, mid, lid));
        assert!(!acquire(&mut core, high, lid));
        assert!(!acquire(&mut core, low, lid));

        core.lock_release(holder, lid);
        assert_eq!(core.threads.get(high).state, ThreadState::Ready);
        assert_eq!(core.threads.get(mid).state, ThreadState::Blocked);
        assert_eq!(core.threads.get(low).state, ThreadState::Blocked);
    }

    #[test]
    fn acquire_release_leaves_other_priorities_untouched() {
        let mut core = Core::new();
        let a = new_thread(&mut core, "a", 25);
        let b = new_thread(&mut core, "b", 35);
        let lid = core.locks.register().unwrap();

        assert!(acquire(&mut core, a, lid));
        core.lock_release(a, lid);

        assert_eq!(core.threads.get(a).effective_priority, 25);
        assert_eq!(core.threads.get(b).effective_priority, 35);
    }

    #[test]
    #[should_panic(expected = "does not hold")]
    fn releasing_unheld_lock_panics() {
        let mut core = Core::new();
        let t = new_thread(&mut core, "t", 30);
        let lid = core.locks.register().unwrap();
        core.lock_release(t, lid);
    }

    #[test]
    #[should_panic(expected = "already holds")]
    fn recursive_acquire_panics() {
        let mut core = Core::new();
        let t = new_thread(&mut core, "t", 30);
        let lid = core.locks.register().unwrap();
        assert!(acquire(&mut core, t, lid));
        let _ = core.lock_try_acquire(t, lid);
    }

    #[test]
    fn registry_recycles_slots_with_new_generation() {
        let mut core = Core::new();
        let first = core.locks.register().unwrap();
        core.locks.dispose(first);

        let second = core.locks.register().unwrap();
        assert_eq!(first.slot, second.slot);
        assert_ne!(first.generation, second.generation);
    }

    #[test]
    #[should_panic(expected = "in use")]
    fn disposing_held_lock_panics() {
        let mut core = Core::new();
        let t = new_thread(&mut core, "t", 30);
        let lid = core.locks.register().unwrap();
        assert!(acquire(&mut core, t, lid));
        core.locks.dispose(lid);
    }
}
