//! Fixed worker pool for parallel system batches.
//!
//! A fixed number of long-lived workers is spawned at world creation and
//! joined at teardown. Batch submission is heap-allocation-free at steady
//! state: work descriptors are copied into a pre-sized slot array, a
//! monotonic `submitted` counter publishes them, workers claim tickets with
//! a `fetch_add` on `claimed`, and a `completed` counter tells the main
//! thread the batch is done. The three counters partition the ticket space
//! into submitted/claimed/completed regions.
//!
//! # Safety Architecture
//!
//! Work descriptors carry raw pointers across threads. The safety of this
//! relies on the following invariants:
//!
//! - **Exclusive systems.** Each task in a batch points at a distinct
//!   system object; the scheduler builds one task per due system and a
//!   system appears in at most one task.
//! - **Non-overlapping component access.** Systems sharing a batch have
//!   non-conflicting access sets, so concurrent `update` calls touch
//!   disjoint component columns of the shared world.
//! - **Pointer lifetimes.** All pointers in a task outlive the batch: the
//!   main thread blocks in [`WorkerPool::run_batch`] until `completed`
//!   reaches the batch target, and only then may the pointed-to data move.
//! - **Slot quiescence.** The slot array is rewritten only while no ticket
//!   at or beyond the previous target is claimable (`submitted` is only
//!   advanced after the slots for the new batch are in place).

use std::cell::UnsafeCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::{Condvar, Mutex};

use crate::command::CommandBuffer;
use crate::system::{System, SystemAccess, SystemContext};
use crate::world::World;

/// One unit of batch work: run `system.update` against the world.
#[derive(Clone, Copy)]
pub(crate) struct Task {
    pub system: *mut dyn System,
    pub world: *const World,
    pub access: *const SystemAccess,
    pub buffer: *mut CommandBuffer,
    pub delta: f64,
}

// SAFETY: tasks are inert pointer bundles; they are only dereferenced inside
// `run_task` under the batch contract above. The scheduler's task scratch
// holds no live pointers outside a `run_batch` call.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

struct PoolState {
    /// Pre-sized work descriptors for the in-flight batch. Written by the
    /// main thread only while quiescent (see module docs), read by workers
    /// holding a valid ticket.
    slots: UnsafeCell<Vec<Task>>,
    /// First ticket of the in-flight batch.
    base: CachePadded<AtomicUsize>,
    /// Tickets below this value are valid work (monotonic).
    submitted: CachePadded<AtomicUsize>,
    /// Next ticket to hand out (monotonic).
    claimed: CachePadded<AtomicUsize>,
    /// Tickets fully executed (monotonic).
    completed: CachePadded<AtomicUsize>,
    /// Bumped on every publish so parked workers re-check.
    epoch: AtomicU64,
    shutdown: AtomicBool,
    wake_lock: Mutex<()>,
    wake_cv: Condvar,
    done_lock: Mutex<()>,
    done_cv: Condvar,
}

// SAFETY: the raw pointers inside `slots` are only dereferenced under the
// invariants in the module docs; everything else is atomics and locks.
unsafe impl Send for PoolState {}
unsafe impl Sync for PoolState {}

/// Fixed-size pool of long-lived worker threads.
pub struct WorkerPool {
    state: Arc<PoolState>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(threads: usize) -> Self {
        let state = Arc::new(PoolState {
            slots: UnsafeCell::new(Vec::new()),
            base: CachePadded::new(AtomicUsize::new(0)),
            submitted: CachePadded::new(AtomicUsize::new(0)),
            claimed: CachePadded::new(AtomicUsize::new(0)),
            completed: CachePadded::new(AtomicUsize::new(0)),
            epoch: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake_cv: Condvar::new(),
            done_lock: Mutex::new(()),
            done_cv: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|i| {
                let state = Arc::clone(&state);
                std::thread::Builder::new()
                    .name(format!("cadence-worker-{i}"))
                    .spawn(move || {
                        // Task panics are caught inside the loop; a panic
                        // escaping it means the pool itself is broken and
                        // the world state is unknown.
                        let result = catch_unwind(AssertUnwindSafe(|| worker_loop(&state)));
                        if result.is_err() {
                            tracing::error!("worker thread died outside a task; aborting");
                            std::process::abort();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { state, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Pre-size the slot array. Must only be called while no batch is in
    /// flight (the world enforces this by requiring `&mut World` on every
    /// path that reaches it).
    pub(crate) fn ensure_capacity(&self, capacity: usize) {
        // SAFETY: quiescent per the caller contract; workers cannot hold a
        // claimable ticket, so nothing reads `slots`.
        let slots = unsafe { &mut *self.state.slots.get() };
        if slots.capacity() < capacity {
            slots.reserve(capacity - slots.len());
        }
    }

    /// Run one batch to completion. Tasks execute on the workers; the
    /// calling thread blocks on the completion counter. With zero workers
    /// the tasks run inline.
    ///
    /// # Safety
    /// Every task must satisfy the pointer invariants in the module docs,
    /// and the pointed-to systems/buffers must be distinct per task.
    pub(crate) unsafe fn run_batch(&self, tasks: &[Task]) {
        if tasks.is_empty() {
            return;
        }
        if self.workers.is_empty() {
            for task in tasks {
                run_task(task);
            }
            return;
        }

        let state = &*self.state;
        let base = state.submitted.load(Ordering::Relaxed);
        let target = base + tasks.len();

        {
            // SAFETY: submitted == base here, so no unclaimed valid ticket
            // exists and no worker reads the slot array.
            let slots = &mut *state.slots.get();
            slots.clear();
            slots.extend_from_slice(tasks);
        }
        state.base.store(base, Ordering::Relaxed);
        state.submitted.store(target, Ordering::Release);
        {
            let _guard = state.wake_lock.lock();
            state.epoch.fetch_add(1, Ordering::Release);
        }
        state.wake_cv.notify_all();

        let mut guard = state.done_lock.lock();
        while state.completed.load(Ordering::Acquire) < target {
            state.done_cv.wait(&mut guard);
        }
    }

    fn shutdown(&mut self) {
        self.state.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.state.wake_lock.lock();
            self.state.epoch.fetch_add(1, Ordering::Release);
        }
        self.state.wake_cv.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(state: &PoolState) {
    // A claimed ticket is held until it becomes valid work or shutdown;
    // tickets are never discarded, so every submitted slot runs exactly
    // once.
    let mut held_ticket: Option<usize> = None;

    loop {
        if state.shutdown.load(Ordering::Acquire) {
            return;
        }

        let ticket = match held_ticket.take() {
            Some(ticket) => ticket,
            None => state.claimed.fetch_add(1, Ordering::Relaxed),
        };

        if ticket < state.submitted.load(Ordering::Acquire) {
            let index = ticket - state.base.load(Ordering::Relaxed);
            // SAFETY: a valid ticket means the slot array was published
            // (Release/Acquire on `submitted`) and covers `index`; the
            // main thread will not touch the array until this batch
            // completes.
            let task = unsafe { (&(*state.slots.get()))[index] };
            unsafe { run_task(&task) };

            let done = state.completed.fetch_add(1, Ordering::AcqRel) + 1;
            if done >= state.submitted.load(Ordering::Acquire) {
                let _guard = state.done_lock.lock();
                state.done_cv.notify_one();
            }
        } else {
            held_ticket = Some(ticket);
            park_until_work(state, ticket);
        }
    }
}

/// Spin briefly, then sleep on the wake condvar until the epoch moves.
fn park_until_work(state: &PoolState, ticket: usize) {
    let backoff = Backoff::new();
    loop {
        if ticket < state.submitted.load(Ordering::Acquire)
            || state.shutdown.load(Ordering::Acquire)
        {
            return;
        }
        if backoff.is_completed() {
            let seen_epoch = state.epoch.load(Ordering::Acquire);
            let mut guard = state.wake_lock.lock();
            while state.epoch.load(Ordering::Acquire) == seen_epoch
                && !state.shutdown.load(Ordering::Acquire)
                && ticket >= state.submitted.load(Ordering::Acquire)
            {
                state.wake_cv.wait(&mut guard);
            }
            return;
        }
        backoff.snooze();
    }
}

/// Execute one task, catching panics at the worker boundary. A failed
/// system is logged and counted; the batch completes normally either way.
///
/// # Safety
/// The task's pointers must be valid and exclusive per the module docs.
pub(crate) unsafe fn run_task(task: &Task) {
    let world = &*task.world;
    let access = &*task.access;

    let result = {
        let system = &mut *task.system;
        let buffer = &mut *task.buffer;
        catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = SystemContext::new(task.delta, access, buffer);
            system.update(world, &mut ctx)
        }))
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            let system = &*task.system;
            world
                .diagnostics()
                .record_system_failure(world.frame(), system.name(), &err.to_string());
        }
        Err(payload) => {
            let message = panic_message(&payload);
            let system = &*task.system;
            world
                .diagnostics()
                .record_system_failure(world.frame(), system.name(), message);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "panic (non-string payload)"
    }
}
