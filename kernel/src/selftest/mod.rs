// In-Kernel Scenario Suite
//
// End-to-end exercises of the concurrency core on real threads, run on
// the target after `start()`. Each scenario spawns threads through the
// public API, records observable ordering, joins everything and asserts;
// a failed assertion panics the kernel, a passing scenario logs one line.
//
// Enable with the `selftest` feature and call `run_all()` from the main
// thread once preemptive scheduling is active.

use spin::Mutex;

use crate::sync::{Condvar, Lock};
use crate::thread;
use crate::timer;
use crate::util::without_interrupts;
use crate::log_info;

const LOG_ORIGIN: &str = "selftest";

static ORDER: Mutex<heapless::Vec<usize, 16>> = Mutex::new(heapless::Vec::new());

fn order_reset() {
    without_interrupts(|| ORDER.lock().clear());
}

fn order_push(id: usize) {
    without_interrupts(|| {
        ORDER
            .lock()
            .push(id)
            .expect("selftest order buffer overflow")
    });
}

fn order_snapshot() -> heapless::Vec<usize, 16> {
    without_interrupts(|| ORDER.lock().clone())
}

fn record_and_exit(id: usize) -> i32 {
    order_push(id);
    0
}

unsafe fn lock_ref(arg: usize) -> &'static Lock {
    &*(arg as *const Lock)
}

pub fn run_all() {
    log_info!(LOG_ORIGIN, "Running concurrency scenarios");

    priority_preemption();
    donation_simple();
    donation_chained();
    donation_multiple();
    sleep_ordering();
    condvar_priority();

    log_info!(LOG_ORIGIN, "All scenarios passed");
}

/// Strictly higher-priority threads run first; creation of one preempts
/// the creator immediately.
fn priority_preemption() {
    order_reset();
    thread::set_priority(40);

    let l = thread::spawn("low", 30, record_and_exit, 3).unwrap();
    let hp = thread::spawn("highest", 50, record_and_exit, 1).unwrap();
    let m = thread::spawn("mid", 35, record_and_exit, 2).unwrap();

    // The 50 ran already; dropping to the floor lets 35 then 30 finish.
    thread::set_priority(crate::PRI_MIN);

    thread::join(hp);
    thread::join(m);
    thread::join(l);
    thread::set_priority(crate::PRI_DEFAULT);

    assert_eq!(order_snapshot().as_slice(), &[1, 2, 3]);
    log_info!(LOG_ORIGIN, "PASS priority_preemption");
}

fn acquire_release_and_exit(arg: usize) -> i32 {
    let lock = unsafe { lock_ref(arg) };
    lock.acquire();
    lock.release();
    0
}

/// A high-priority waiter donates to the holder until release.
fn donation_simple() {
    thread::set_priority(30);
    let lock = Lock::new();
    lock.acquire();

    let high = thread::spawn(
        "donor",
        50,
        acquire_release_and_exit,
        &lock as *const Lock as usize,
    )
    .unwrap();

    // The donor already ran and blocked on the lock.
    assert_eq!(thread::priority(), 50);

    lock.release();
    assert_eq!(thread::priority(), 30);

    thread::join(high);
    thread::set_priority(crate::PRI_DEFAULT);
    log_info!(LOG_ORIGIN, "PASS donation_simple");
}

struct ChainArgs {
    lock_a: Lock,
    lock_b: Lock,
}

fn chain_med(arg: usize) -> i32 {
    let args = unsafe { &*(arg as *const ChainArgs) };
    args.lock_b.acquire();
    args.lock_a.acquire();
    args.lock_a.release();
    args.lock_b.release();
    0
}

fn chain_high(arg: usize) -> i32 {
    let args = unsafe { &*(arg as *const ChainArgs) };
    args.lock_b.acquire();
    args.lock_b.release();
    0
}

/// Donation propagates across a chain of blocked holders.
fn donation_chained() {
    thread::set_priority(10);
    let args = ChainArgs {
        lock_a: Lock::new(),
        lock_b: Lock::new(),
    };
    args.lock_a.acquire();

    let arg = &args as *const ChainArgs as usize;

    // Med takes B, blocks on A: its priority flows to us.
    let med = thread::spawn("med", 20, chain_med, arg).unwrap();
    assert_eq!(thread::priority(), 20);

    // High blocks on B: its priority flows through med to us.
    let high = thread::spawn("high", 30, chain_high, arg).unwrap();
    assert_eq!(thread::priority(), 30);

    // Releasing A unwinds the whole chain.
    args.lock_a.release();
    assert_eq!(thread::priority(), 10);

    thread::join(med);
    thread::join(high);
    thread::set_priority(crate::PRI_DEFAULT);
    log_info!(LOG_ORIGIN, "PASS donation_chained");
}

/// Two donations to one holder unwind one release at a time.
fn donation_multiple() {
    thread::set_priority(30);
    let lock_a = Lock::new();
    let lock_b = Lock::new();
    lock_a.acquire();
    lock_b.acquire();

    let wb = thread::spawn(
        "waiter-b",
        35,
        acquire_release_and_exit,
        &lock_b as *const Lock as usize,
    )
    .unwrap();
    let wa = thread::spawn(
        "waiter-a",
        40,
        acquire_release_and_exit,
        &lock_a as *const Lock as usize,
    )
    .unwrap();

    assert_eq!(thread::priority(), 40);

    lock_a.release();
    assert_eq!(thread::priority(), 35);

    lock_b.release();
    assert_eq!(thread::priority(), 30);

    thread::join(wa);
    thread::join(wb);
    thread::set_priority(crate::PRI_DEFAULT);
    log_info!(LOG_ORIGIN, "PASS donation_multiple");
}

fn sleep_and_record(arg: usize) -> i32 {
    let ticks = (arg * 10) as i64;
    let before = timer::ticks();
    timer::sleep_ticks(ticks);
    assert!(timer::elapsed(before) >= ticks as u64, "woke too early");
    order_push(arg);
    0
}

/// Sleepers wake in deadline order, at or after their deadline.
fn sleep_ordering() {
    order_reset();

    // Outrank the main thread so each sleeper reaches its sleep first.
    let t1 = thread::spawn("sleep-10", 40, sleep_and_record, 1).unwrap();
    let t2 = thread::spawn("sleep-20", 40, sleep_and_record, 2).unwrap();
    let t3 = thread::spawn("sleep-30", 40, sleep_and_record, 3).unwrap();

    thread::join(t1);
    thread::join(t2);
    thread::join(t3);

    assert_eq!(order_snapshot().as_slice(), &[1, 2, 3]);
    log_info!(LOG_ORIGIN, "PASS sleep_ordering");
}

struct CondArgs {
    lock: Lock,
    cond: Condvar,
}

fn cond_wait_and_record(arg: usize) -> i32 {
    let args = unsafe { &*((arg & !0xFF) as *const CondArgs) };
    let id = arg & 0xFF;
    args.lock.acquire();
    args.cond.wait(&args.lock);
    order_push(id);
    args.lock.release();
    0
}

/// Signal wakes the highest-priority waiter first.
fn condvar_priority() {
    order_reset();
    thread::set_priority(10);

    // 256-byte alignment keeps the low byte free for the waiter id.
    #[repr(align(256))]
    struct Aligned(CondArgs);
    let args = Aligned(CondArgs {
        lock: Lock::new(),
        cond: Condvar::new(),
    });
    let base = &args.0 as *const CondArgs as usize;
    assert_eq!(base & 0xFF, 0);

    // Each waiter outranks us, so all three block in wait() first.
    let w20 = thread::spawn("w20", 20, cond_wait_and_record, base | 20).unwrap();
    let w40 = thread::spawn("w40", 40, cond_wait_and_record, base | 40).unwrap();
    let w30 = thread::spawn("w30", 30, cond_wait_and_record, base | 30).unwrap();

    for _ in 0..3 {
        args.0.lock.acquire();
        args.0.cond.signal(&args.0.lock);
        args.0.lock.release();
    }

    thread::join(w20);
    thread::join(w30);
    thread::join(w40);

    assert_eq!(order_snapshot().as_slice(), &[40, 30, 20]);
    thread::set_priority(crate::PRI_DEFAULT);
    log_info!(LOG_ORIGIN, "PASS condvar_priority");
}
