// Kernel Scheduler
//
// Implements the preemptive fixed-priority scheduler at the heart of the
// concurrency core.
//
// Key responsibilities:
// - Maintain the ready list (one FIFO bucket per priority level with an
//   occupancy bitmask), the sleep queue and the lock registry
// - Select the next runnable thread on yield, block, exit and timer tick
// - Enforce strict priority ordering with FIFO tie-breaking
// - Carry priority donation: raise lock holders to their highest waiter's
//   effective priority, transitively across chains of blocked holders
// - Provide the idle fallback when no thread is runnable
//
// Scheduling model:
// - Priorities run 0..=63; higher always runs first
// - The running thread is preempted when a strictly higher-priority
//   thread becomes ready or when its time slice is exhausted
// - Preemption requested from interrupt context is deferred to the
//   interrupt handler's tail via `interrupts::yield_on_return`
//
// Mutual exclusion:
// - All scheduler state lives in one `Core` value behind a spinlock that
//   is only ever taken with interrupts disabled; on a single CPU the lock
//   never spins and the tick handler can never race a critical section
// - The guard is dropped before every context switch: the resumed side
//   re-acquires it itself, so no guard is ever held across a switch
//
// The `Core` methods are pure state-machine logic with no hardware
// dependencies; the unit tests below drive them directly.

#![allow(dead_code)]

use core::sync::atomic::{AtomicBool, Ordering};

use heapless::Vec;
use spin::{Mutex, MutexGuard};

use crate::arch::{self, SwitchFrame};
use crate::interrupts;
use crate::sync::highest_waiter;
use crate::sync::lock::{LockId, LockTable, DONATION_DEPTH_MAX};
use crate::thread::{
    self, SpawnError, ThreadState, ThreadStats, ThreadTable, Tid, MAX_THREADS, PRI_DEFAULT,
    PRI_MAX, PRI_MIN,
};
use crate::util::without_interrupts;
use crate::{log_debug, log_info};

const LOG_ORIGIN: &str = "sched";

/// Ticks a thread may run before the tick handler requests a yield.
pub const TIME_SLICE: u32 = 4;

pub(crate) const PRIORITY_LEVELS: usize = (PRI_MAX as usize) + 1;

// ============================================================================
// Ready list
// ============================================================================

/// One FIFO bucket per priority level plus an occupancy bitmask, so the
/// highest non-empty bucket is one `leading_zeros` away.
pub(crate) struct ReadyQueue {
    buckets: [Vec<Tid, MAX_THREADS>; PRIORITY_LEVELS],
    occupied: u64,
}

impl ReadyQueue {
    pub(crate) const fn new() -> Self {
        ReadyQueue {
            buckets: [const { Vec::new() }; PRIORITY_LEVELS],
            occupied: 0,
        }
    }

    pub(crate) fn push(&mut self, tid: Tid, priority: u8) {
        let index = priority as usize;
        self.buckets[index]
            .push(tid)
            .expect("ready bucket over thread-table capacity");
        self.occupied |= 1 << index;
    }

    pub(crate) fn pop(&mut self) -> Option<Tid> {
        let priority = self.head_priority()?;
        let index = priority as usize;
        let tid = self.buckets[index].remove(0);
        if self.buckets[index].is_empty() {
            self.occupied &= !(1 << index);
        }
        Some(tid)
    }

    pub(crate) fn remove(&mut self, tid: Tid, priority: u8) -> bool {
        let index = priority as usize;
        if let Some(pos) = self.buckets[index].iter().position(|&t| t == tid) {
            self.buckets[index].remove(pos);
            if self.buckets[index].is_empty() {
                self.occupied &= !(1 << index);
            }
            true
        } else {
            false
        }
    }

    /// Priority of the highest-priority ready thread.
    pub(crate) fn head_priority(&self) -> Option<u8> {
        if self.occupied == 0 {
            None
        } else {
            Some(63 - self.occupied.leading_zeros() as u8)
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.occupied == 0
    }
}

// ============================================================================
// Sleep queue
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Sleeper {
    wake_at: u64,
    tid: Tid,
}

/// Blocked threads with a wake deadline, earliest deadline first.
pub(crate) struct SleepQueue {
    entries: Vec<Sleeper, MAX_THREADS>,
}

impl SleepQueue {
    pub(crate) const fn new() -> Self {
        SleepQueue {
            entries: Vec::new(),
        }
    }

    /// Insert keeping deadline order; equal deadlines keep arrival order.
    pub(crate) fn insert(&mut self, tid: Tid, wake_at: u64) {
        let position = self
            .entries
            .iter()
            .position(|s| s.wake_at > wake_at)
            .unwrap_or(self.entries.len());
        self.entries
            .insert(position, Sleeper { wake_at, tid })
            .expect("sleep queue over thread-table capacity");
    }

    /// Pop one entry whose deadline has passed, if any.
    pub(crate) fn pop_expired(&mut self, now: u64) -> Option<Tid> {
        if self.entries.first()?.wake_at <= now {
            Some(self.entries.remove(0).tid)
        } else {
            None
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// Core state
// ============================================================================

/// The whole scheduler-owned state of the kernel, mutated only with
/// interrupts disabled.
pub(crate) struct Core {
    pub(crate) threads: ThreadTable,
    pub(crate) ready: ReadyQueue,
    pub(crate) sleepers: SleepQueue,
    pub(crate) locks: LockTable,
    pub(crate) current: Option<Tid>,
    pub(crate) idle: Option<Tid>,
    slice_used: u32,
    /// Dying predecessor to reclaim on the far side of the next switch.
    reap_after_switch: Option<Tid>,
}

impl Core {
    pub(crate) const fn new() -> Self {
        Core {
            threads: ThreadTable::new(),
            ready: ReadyQueue::new(),
            sleepers: SleepQueue::new(),
            locks: LockTable::new(),
            current: None,
            idle: None,
            slice_used: 0,
            reap_after_switch: None,
        }
    }

    pub(crate) fn current_tid(&self) -> Tid {
        self.current.expect("no current thread")
    }

    /// Register a new runnable thread and link it to its parent.
    pub(crate) fn admit(
        &mut self,
        name: &str,
        priority: u8,
        parent: Option<Tid>,
    ) -> Result<Tid, SpawnError> {
        let tid = self.threads.allocate(name, priority, parent)?;
        thread::write_stack_canary(tid.slot());
        if let Some(parent) = parent {
            if let Some(parent_thread) = self.threads.try_get_mut(parent) {
                let _ = parent_thread.children.push(tid);
            }
        }
        self.ready.push(tid, priority);
        Ok(tid)
    }

    /// Move a blocked thread to the ready list. Never preempts by itself.
    pub(crate) fn unblock(&mut self, tid: Tid) {
        let t = self.threads.get_mut(tid);
        assert!(
            t.state == ThreadState::Blocked,
            "unblocking thread {} which is not blocked",
            tid
        );
        t.state = ThreadState::Ready;
        let priority = t.effective_priority;
        self.ready.push(tid, priority);
    }

    /// True iff the ready list's head outranks the running thread. The
    /// idle thread is outranked by everything.
    pub(crate) fn should_preempt(&self) -> bool {
        let Some(head) = self.ready.head_priority() else {
            return false;
        };
        match self.current {
            Some(current) if Some(current) != self.idle => {
                head > self.threads.effective(current)
            }
            _ => true,
        }
    }

    /// Put the running thread back at the tail of its priority bucket.
    /// The idle thread never enters the ready list.
    fn requeue_current(&mut self) {
        let current = self.current_tid();
        let t = self.threads.get_mut(current);
        t.state = ThreadState::Ready;
        let priority = t.effective_priority;
        if Some(current) != self.idle {
            self.ready.push(current, priority);
        }
    }

    fn pick_next(&mut self) -> Tid {
        self.ready
            .pop()
            .or(self.idle)
            .expect("no runnable thread and no idle thread")
    }

    /// One timer tick: charge the quantum, wake expired sleepers. Returns
    /// true when the tick handler should request a deferred yield.
    pub(crate) fn tick(&mut self, now: u64) -> bool {
        if let Some(current) = self.current {
            if let Some(t) = self.threads.try_get_mut(current) {
                t.cpu_ticks += 1;
            }
        }
        self.slice_used += 1;

        while let Some(tid) = self.sleepers.pop_expired(now) {
            self.unblock(tid);
        }

        self.slice_used >= TIME_SLICE || self.should_preempt()
    }

    /// Change a thread's effective priority, repositioning it in the
    /// ready list if necessary.
    pub(crate) fn set_effective(&mut self, tid: Tid, new: u8) {
        let t = self.threads.get_mut(tid);
        let old = t.effective_priority;
        if old == new {
            return;
        }
        t.effective_priority = new;
        let state = t.state;
        if state == ThreadState::Ready && Some(tid) != self.idle {
            self.ready.remove(tid, old);
            self.ready.push(tid, new);
        }
    }

    /// Recompute a thread's effective priority from scratch: its base,
    /// maxed with the effective priority of every waiter of every lock it
    /// still holds. The waiter lists are scanned, not trusted.
    pub(crate) fn refresh_effective(&mut self, tid: Tid) {
        let t = self.threads.get(tid);
        let mut new = t.base_priority;
        let held = t.held_locks.clone();
        for lid in held {
            for &waiter in self.locks.waiters(lid) {
                new = new.max(self.threads.effective(waiter));
            }
        }
        self.set_effective(tid, new);
    }

    /// Walk the donation chain from the holder of `lid`, raising every
    /// holder below `donor`'s effective priority. Bounded by
    /// `DONATION_DEPTH_MAX`; a deeper chain is tolerated, not fatal.
    pub(crate) fn donate_chain(&mut self, donor: Tid, lid: LockId) {
        let donor_priority = self.threads.effective(donor);
        let mut lock = lid;
        for _ in 0..DONATION_DEPTH_MAX {
            let Some(holder) = self.locks.holder(lock) else {
                break;
            };
            if self.threads.effective(holder) >= donor_priority {
                break;
            }
            self.set_effective(holder, donor_priority);
            match self.threads.get(holder).blocked_on {
                Some(next) => lock = next,
                None => break,
            }
        }
    }

    /// Up one of the per-thread exit-handshake records and wake its best
    /// waiter.
    pub(crate) fn exit_done_up(&mut self, tid: Tid) {
        self.threads.get_mut(tid).exit_done.value += 1;
        let index = highest_waiter(&self.threads, self.threads.get(tid).exit_done.waiters.as_slice());
        if let Some(index) = index {
            let waiter = self.threads.get_mut(tid).exit_done.waiters.remove_at(index);
            self.unblock(waiter);
        }
    }

    pub(crate) fn reap_ack_up(&mut self, tid: Tid) {
        self.threads.get_mut(tid).reap_ack.value += 1;
        let index = highest_waiter(&self.threads, self.threads.get(tid).reap_ack.waiters.as_slice());
        if let Some(index) = index {
            let waiter = self.threads.get_mut(tid).reap_ack.waiters.remove_at(index);
            self.unblock(waiter);
        }
    }

    pub(crate) fn thread_stats(&self) -> ThreadStats {
        let mut stats = ThreadStats::default();
        for t in self.threads.iter() {
            stats.total += 1;
            match t.state {
                ThreadState::Running => stats.running += 1,
                ThreadState::Ready => stats.ready += 1,
                ThreadState::Blocked => stats.blocked += 1,
                ThreadState::Dying => stats.dying += 1,
            }
        }
        stats
    }
}

// ============================================================================
// Global instance and dispatch
// ============================================================================

static CORE: Mutex<Core> = Mutex::new(Core::new());
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Take the scheduler guard. Interrupts must already be disabled.
pub(crate) fn core_guard() -> MutexGuard<'static, Core> {
    CORE.lock()
}

/// Run `f` on the scheduler state inside an interrupt-disabled section.
pub(crate) fn with_core<R>(f: impl FnOnce(&mut Core) -> R) -> R {
    without_interrupts(|| f(&mut CORE.lock()))
}

/// Mark the running thread blocked and switch away. The caller must have
/// inserted it into a wait structure first; it resumes here when some
/// `unblock` reaches it.
pub(crate) fn block_current(mut core: MutexGuard<'static, Core>) {
    let current = core.current_tid();
    let t = core.threads.get_mut(current);
    assert!(
        t.state == ThreadState::Running,
        "blocking thread {} which is not running",
        current
    );
    t.state = ThreadState::Blocked;
    dispatch(core, current);
}

/// Switch from `prev` (whose state the caller already changed) to the
/// highest-priority ready thread, or idle. Consumes the guard: it is
/// dropped before the switch so the resumed side can take it again.
fn dispatch(mut core: MutexGuard<'static, Core>, prev: Tid) {
    let next = core.pick_next();
    core.slice_used = 0;

    if next == prev {
        // Nothing better to run; keep going with a fresh quantum.
        core.threads.get_mut(prev).state = ThreadState::Running;
        return;
    }

    assert!(
        thread::stack_canary_ok(prev.slot()),
        "kernel stack overflow on thread {}",
        prev
    );

    core.threads.get_mut(next).state = ThreadState::Running;
    core.current = Some(next);
    if core.threads.get(prev).state == ThreadState::Dying {
        core.reap_after_switch = Some(prev);
    }

    let prev_frame = &mut core.threads.get_mut(prev).context as *mut SwitchFrame;
    let next_frame = &core.threads.get(next).context as *const SwitchFrame;

    // The guard must not survive the switch: the next thread takes it.
    drop(core);
    unsafe {
        arch::switch_threads(prev_frame, next_frame);
    }

    // Running again as `prev`.
    finish_switch();
}

/// Tail work on the far side of a switch: reclaim a Dying predecessor.
/// Runs with interrupts still disabled.
pub(crate) fn finish_switch() {
    let mut core = CORE.lock();
    if let Some(dead) = core.reap_after_switch.take() {
        log_debug!(LOG_ORIGIN, "Reaping thread {}", dead);
        core.threads.free(dead);
    }
}

/// Entered by the first dispatch of every spawned thread (from the
/// architecture trampoline), with interrupts disabled.
pub(crate) fn thread_startup(entry: usize, arg: usize) -> ! {
    finish_switch();
    interrupts::enable();

    let entry: fn(usize) -> i32 = unsafe { core::mem::transmute(entry) };
    let status = entry(arg);
    exit(status)
}

// ============================================================================
// Public API
// ============================================================================

/// Adopt the boot context as the first thread. Must run before any other
/// scheduler call.
pub fn init(main_name: &str) {
    without_interrupts(|| {
        let mut core = CORE.lock();
        assert!(core.current.is_none(), "scheduler initialized twice");
        let tid = core
            .threads
            .allocate(main_name, PRI_DEFAULT, None)
            .expect("empty thread table rejected the boot thread");
        thread::write_stack_canary(tid.slot());
        core.threads.get_mut(tid).state = ThreadState::Running;
        core.current = Some(tid);
    });
    INITIALIZED.store(true, Ordering::SeqCst);
    log_info!(LOG_ORIGIN, "Scheduler ready, boot thread is '{}'", main_name);
}

/// Create the idle thread. Must run before the first block or sleep; the
/// idle thread never enters the ready list and runs only when it is empty.
pub fn start() {
    without_interrupts(|| {
        let mut core = CORE.lock();
        assert!(core.idle.is_none(), "idle thread created twice");
        let tid = core
            .threads
            .allocate("idle", PRI_MIN, None)
            .expect("no slot left for the idle thread");
        thread::write_stack_canary(tid.slot());
        let top = thread::stack_top(tid.slot());
        arch::prepare_frame(&mut core.threads.get_mut(tid).context, top, idle_main, 0);
        core.idle = Some(tid);
    });
    log_info!(LOG_ORIGIN, "Idle thread created");
}

fn idle_main(_arg: usize) -> i32 {
    loop {
        arch::halt();
    }
}

pub(crate) fn spawn(
    name: &str,
    priority: u8,
    entry: fn(usize) -> i32,
    arg: usize,
) -> Result<Tid, SpawnError> {
    assert!(
        !interrupts::in_interrupt(),
        "spawn is not available in interrupt context"
    );

    let tid = without_interrupts(|| {
        let mut core = CORE.lock();
        let parent = core.current;
        let tid = core.admit(name, priority, parent)?;
        let top = thread::stack_top(tid.slot());
        arch::prepare_frame(&mut core.threads.get_mut(tid).context, top, entry, arg);
        Ok(tid)
    })?;

    log_debug!(LOG_ORIGIN, "Spawned thread {} '{}' (priority {})", tid, name, priority);

    // A higher-priority child runs before spawn returns.
    maybe_preempt();
    Ok(tid)
}

/// Give up the CPU; the caller re-enters the tail of its priority bucket.
pub fn yield_now() {
    if !INITIALIZED.load(Ordering::SeqCst) {
        return;
    }
    without_interrupts(|| {
        let mut core = CORE.lock();
        let prev = core.current_tid();
        core.requeue_current();
        dispatch(core, prev);
    });
}

/// True iff a ready thread strictly outranks the running one. Safe from
/// interrupt context.
pub fn should_preempt() -> bool {
    if !INITIALIZED.load(Ordering::SeqCst) {
        return false;
    }
    without_interrupts(|| CORE.lock().should_preempt())
}

/// Yield if a higher-priority thread is ready, deferring to interrupt
/// exit when called from interrupt context.
pub(crate) fn maybe_preempt() {
    if !INITIALIZED.load(Ordering::SeqCst) {
        return;
    }
    if interrupts::in_interrupt() {
        if without_interrupts(|| CORE.lock().should_preempt()) {
            interrupts::yield_on_return();
        }
    } else if without_interrupts(|| CORE.lock().should_preempt()) {
        yield_now();
    }
}

/// Tick hook, called by the tick source in interrupt context.
pub fn on_tick(now: u64) {
    if !INITIALIZED.load(Ordering::SeqCst) {
        return;
    }
    let resched = CORE.lock().tick(now);
    if resched {
        interrupts::yield_on_return();
    }
}

/// Block the caller until the tick counter reaches `wake_at`.
pub(crate) fn sleep_until(wake_at: u64) {
    assert!(
        !interrupts::in_interrupt(),
        "sleep is not available in interrupt context"
    );
    without_interrupts(|| {
        let mut core = CORE.lock();
        let current = core.current_tid();
        core.sleepers.insert(current, wake_at);
        block_current(core);
    });
}

pub(crate) fn current() -> Tid {
    with_core(|core| core.current_tid())
}

pub(crate) fn priority() -> u8 {
    with_core(|core| {
        let current = core.current_tid();
        core.threads.effective(current)
    })
}

pub(crate) fn set_priority(priority: u8) {
    assert!(priority <= PRI_MAX, "priority {} out of range", priority);
    with_core(|core| {
        let current = core.current_tid();
        core.threads.get_mut(current).base_priority = priority;
        core.refresh_effective(current);
    });
    maybe_preempt();
}

pub(crate) fn thread_stats() -> ThreadStats {
    with_core(|core| core.thread_stats())
}

/// Terminate the calling thread: announce the exit, wait to be reaped,
/// then die at the next dispatch.
pub(crate) fn exit(status: i32) -> ! {
    assert!(
        !interrupts::in_interrupt(),
        "exit is not available in interrupt context"
    );

    without_interrupts(|| {
        let mut core = CORE.lock();
        let current = core.current_tid();
        core.threads.get_mut(current).exit_status = status;

        // Acknowledge children pre-emptively so orphans are not stuck
        // waiting for a reap that will never come.
        let children: Vec<Tid, MAX_THREADS> = core.threads.get(current).children.clone();
        for child in children {
            if core.threads.try_get(child).is_some() {
                core.reap_ack_up(child);
            }
        }

        core.exit_done_up(current);
    });

    // Wait for the parent's acknowledgement.
    loop {
        let acked = without_interrupts(|| {
            let mut core = CORE.lock();
            let current = core.current_tid();
            if core.threads.get(current).reap_ack.value > 0 {
                core.threads.get_mut(current).reap_ack.value -= 1;
                true
            } else {
                core.threads.get_mut(current).reap_ack.waiters.push(current);
                block_current(core);
                false
            }
        });
        if acked {
            break;
        }
    }

    without_interrupts(|| {
        let mut core = CORE.lock();
        let current = core.current_tid();
        log_debug!(
            LOG_ORIGIN,
            "Thread {} exiting with status {}",
            current,
            status
        );
        core.threads.get_mut(current).state = ThreadState::Dying;
        dispatch(core, current);
    });

    unreachable!("exited thread was rescheduled")
}

/// Reap `child`: wait for its exit announcement, collect its status and
/// acknowledge so its slot can be reclaimed.
pub(crate) fn join(child: Tid) -> i32 {
    assert!(
        !interrupts::in_interrupt(),
        "join is not available in interrupt context"
    );

    loop {
        let done = without_interrupts(|| {
            let mut core = CORE.lock();
            let current = core.current_tid();
            assert!(current != child, "thread cannot join itself");
            if core.threads.get(child).exit_done.value > 0 {
                core.threads.get_mut(child).exit_done.value -= 1;
                true
            } else {
                core.threads.get_mut(child).exit_done.waiters.push(current);
                block_current(core);
                false
            }
        });
        if done {
            break;
        }
    }

    without_interrupts(|| {
        let mut core = CORE.lock();
        let current = core.current_tid();
        let status = core.threads.get(child).exit_status;
        core.reap_ack_up(child);
        if let Some(me) = core.threads.try_get_mut(current) {
            if let Some(position) = me.children.iter().position(|&c| c == child) {
                me.children.remove(position);
            }
        }
        status
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_with_current(name: &str, priority: u8) -> (Core, Tid) {
        let mut core = Core::new();
        let tid = core.admit(name, priority, None).unwrap();
        // Adopt as the running thread.
        core.ready.remove(tid, priority);
        core.threads.get_mut(tid).state = ThreadState::Running;
        core.current = Some(tid);
        (core, tid)
    }

    fn block(core: &mut Core, tid: Tid) {
        core.ready.remove(tid, core.threads.effective(tid));
        core.threads.get_mut(tid).state = ThreadState::Blocked;
    }

    #[test]
    fn ready_queue_orders_by_priority() {
        let mut core = Core::new();
        let low = core.admit("low", 10, None).unwrap();
        let high = core.admit("high", 50, None).unwrap();
        let mid = core.admit("mid", 30, None).unwrap();

        assert_eq!(core.ready.head_priority(), Some(50));
        assert_eq!(core.ready.pop(), Some(high));
        assert_eq!(core.ready.pop(), Some(mid));
        assert_eq!(core.ready.pop(), Some(low));
        assert!(core.ready.is_empty());
    }

    #[test]
    fn equal_priorities_are_fifo() {
        let mut core = Core::new();
        let first = core.admit("first", 20, None).unwrap();
        let second = core.admit("second", 20, None).unwrap();
        let third = core.admit("third", 20, None).unwrap();

        assert_eq!(core.ready.pop(), Some(first));
        assert_eq!(core.ready.pop(), Some(second));
        assert_eq!(core.ready.pop(), Some(third));
    }

    #[test]
    fn should_preempt_requires_strictly_higher() {
        let (mut core, _running) = core_with_current("main", 30);

        core.admit("equal", 30, None).unwrap();
        assert!(!core.should_preempt());

        core.admit("higher", 31, None).unwrap();
        assert!(core.should_preempt());
    }

    #[test]
    fn idle_is_always_preempted() {
        let mut core = Core::new();
        let idle = core.admit("idle", PRI_MIN, None).unwrap();
        core.ready.remove(idle, PRI_MIN);
        core.threads.get_mut(idle).state = ThreadState::Running;
        core.current = Some(idle);
        core.idle = Some(idle);

        assert!(!core.should_preempt());
        core.admit("t", PRI_MIN, None).unwrap();
        assert!(core.should_preempt());
    }

    #[test]
    fn unblock_inserts_by_effective_priority() {
        let (mut core, _running) = core_with_current("main", 10);
        let t = core.admit("t", 40, None).unwrap();
        block(&mut core, t);

        core.unblock(t);
        assert_eq!(core.ready.head_priority(), Some(40));
        assert_eq!(core.ready.pop(), Some(t));
    }

    #[test]
    #[should_panic(expected = "not blocked")]
    fn unblock_rejects_ready_thread() {
        let mut core = Core::new();
        let t = core.admit("t", 10, None).unwrap();
        core.unblock(t);
    }

    #[test]
    fn tick_requests_resched_on_quantum_expiry() {
        let (mut core, _running) = core_with_current("main", 30);

        for _ in 0..TIME_SLICE - 1 {
            assert!(!core.tick(0));
        }
        assert!(core.tick(0));
    }

    #[test]
    fn tick_wakes_expired_sleepers_in_deadline_order() {
        let (mut core, _running) = core_with_current("main", 30);
        let t1 = core.admit("t1", 20, None).unwrap();
        let t2 = core.admit("t2", 20, None).unwrap();
        let t3 = core.admit("t3", 20, None).unwrap();
        for &t in &[t1, t2, t3] {
            block(&mut core, t);
        }

        core.sleepers.insert(t3, 30);
        core.sleepers.insert(t1, 10);
        core.sleepers.insert(t2, 20);
        assert_eq!(core.sleepers.len(), 3);

        core.tick(9);
        assert!(core.ready.is_empty());

        core.tick(10);
        assert_eq!(core.ready.pop(), Some(t1));
        assert!(core.ready.is_empty());

        core.tick(25);
        assert_eq!(core.ready.pop(), Some(t2));

        core.tick(30);
        assert_eq!(core.ready.pop(), Some(t3));
        assert_eq!(core.sleepers.len(), 0);
    }

    #[test]
    fn tick_requests_resched_when_woken_sleeper_outranks_current() {
        let (mut core, _running) = core_with_current("main", 30);
        let high = core.admit("high", 50, None).unwrap();
        block(&mut core, high);
        core.sleepers.insert(high, 5);

        assert!(core.tick(5));
    }

    #[test]
    fn set_effective_repositions_ready_thread() {
        let (mut core, _running) = core_with_current("main", 10);
        let a = core.admit("a", 20, None).unwrap();
        let b = core.admit("b", 30, None).unwrap();

        assert_eq!(core.ready.head_priority(), Some(30));
        core.set_effective(a, 40);
        assert_eq!(core.ready.head_priority(), Some(40));
        assert_eq!(core.ready.pop(), Some(a));
        assert_eq!(core.ready.pop(), Some(b));
    }

    #[test]
    fn exit_handshake_wakes_parent_then_child() {
        let (mut core, parent) = core_with_current("parent", 30);
        let child = core.admit("child", 30, None).unwrap();

        // Parent blocks on the child's exit_done.
        block(&mut core, parent);
        core.threads.get_mut(child).exit_done.waiters.push(parent);

        // Child announces its exit: parent becomes ready again.
        core.exit_done_up(child);
        assert_eq!(core.threads.get(parent).state, ThreadState::Ready);
        assert_eq!(core.threads.get(child).exit_done.value, 1);

        // Child blocks on its own reap_ack; parent acknowledges.
        block(&mut core, child);
        core.threads.get_mut(child).reap_ack.waiters.push(child);
        core.reap_ack_up(child);
        assert_eq!(core.threads.get(child).state, ThreadState::Ready);
    }

    #[test]
    fn thread_stats_counts_states() {
        let (mut core, _running) = core_with_current("main", 30);
        let a = core.admit("a", 20, None).unwrap();
        core.admit("b", 20, None).unwrap();
        block(&mut core, a);

        let stats = core.thread_stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.dying, 0);
    }
}
