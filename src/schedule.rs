//! Tick scheduler: rate buckets, due lists, and conflict-free batches.
//!
//! Systems are grouped into tick-rate buckets. Each frame the scheduler
//! accumulates the host delta into every bucket, collects the systems whose
//! bucket is due, and packs them greedily (in registration order) into
//! batches of pairwise non-conflicting systems. Batches run in sequence;
//! the systems inside one batch run in parallel on the worker pool.
//!
//! Accumulators subtract their period instead of zeroing, so long-term
//! rates stay exact under jittery host frames.

use crate::command::CommandBuffer;
use crate::error::{EcsError, Result};
use crate::executor::Task;
use crate::system::{BoxedSystem, SystemAccess, SystemId, TickRate};
use crate::world::World;

pub(crate) struct ScheduledSystem {
    id: SystemId,
    system: BoxedSystem,
    /// Captured once at registration; conflict checks must not re-allocate
    /// per frame.
    access: SystemAccess,
    rate: TickRate,
    enabled: bool,
    /// World-clock time of the last run (0 = never; world time starts at 0).
    last_run: f64,
}

/// System manager plus tick scheduler. Owned by the world but moved out for
/// the duration of a frame so systems can borrow the world shared.
pub(crate) struct TickScheduler {
    systems: Vec<ScheduledSystem>,
    next_id: u32,
    accumulators: [f64; TickRate::COUNT],
    /// Effective delta per bucket for the current frame's due systems.
    bucket_delta: [f64; TickRate::COUNT],
    // Reusable frame scratch.
    due: Vec<usize>,
    batches: Vec<Vec<usize>>,
    batch_count: usize,
    tasks: Vec<Task>,
    active_buffers: Vec<CommandBuffer>,
    buffer_pool: Vec<CommandBuffer>,
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self {
            systems: Vec::new(),
            next_id: 0,
            accumulators: [0.0; TickRate::COUNT],
            bucket_delta: [0.0; TickRate::COUNT],
            due: Vec::new(),
            batches: Vec::new(),
            batch_count: 0,
            tasks: Vec::new(),
            active_buffers: Vec::new(),
            buffer_pool: Vec::new(),
        }
    }
}

impl TickScheduler {
    pub(crate) fn register(&mut self, system: BoxedSystem) -> SystemId {
        let id = SystemId(self.next_id);
        self.next_id += 1;
        let access = system.access();
        let rate = system.rate();
        self.systems.push(ScheduledSystem {
            id,
            system,
            access,
            rate,
            enabled: true,
            last_run: 0.0,
        });
        id
    }

    /// Remove a system, preserving the registration order of the rest.
    pub(crate) fn unregister(&mut self, id: SystemId) -> Option<BoxedSystem> {
        let position = self.position_of(id)?;
        Some(self.systems.remove(position).system)
    }

    pub(crate) fn set_enabled(&mut self, id: SystemId, enabled: bool) -> Result<()> {
        let position = self.position_of(id).ok_or(EcsError::SystemNotFound)?;
        self.systems[position].enabled = enabled;
        Ok(())
    }

    pub(crate) fn is_enabled(&self, id: SystemId) -> Option<bool> {
        self.position_of(id).map(|p| self.systems[p].enabled)
    }

    pub(crate) fn len(&self) -> usize {
        self.systems.len()
    }

    fn position_of(&self, id: SystemId) -> Option<usize> {
        self.systems.iter().position(|entry| entry.id == id)
    }

    /// Run every system due this frame. `world` must be the world this
    /// scheduler was taken from; the frame's structural queues are already
    /// drained.
    pub(crate) fn run_frame(&mut self, world: &World, delta: f64) {
        // Phase 1: accumulate time into every non-manual bucket.
        for rate in TickRate::ALL {
            if rate.period().is_some() {
                self.accumulators[rate.bucket()] += delta;
            }
        }

        // Phase 2: build the due list in registration order and capture
        // each firing bucket's effective delta.
        self.due.clear();
        let mut fired = [false; TickRate::COUNT];
        for (index, entry) in self.systems.iter().enumerate() {
            if !entry.enabled {
                continue;
            }
            let Some(period) = entry.rate.period() else {
                continue;
            };
            let bucket = entry.rate.bucket();
            if self.accumulators[bucket] >= period {
                self.bucket_delta[bucket] = self.accumulators[bucket];
                fired[bucket] = true;
                self.due.push(index);
            }
        }
        for rate in TickRate::ALL {
            let bucket = rate.bucket();
            if !fired[bucket] {
                continue;
            }
            match rate.period() {
                // Subtract, don't zero: keeps the long-term rate exact.
                Some(period) if period > 0.0 => self.accumulators[bucket] -= period,
                _ => self.accumulators[bucket] = 0.0,
            }
        }

        if self.due.is_empty() {
            return;
        }

        self.form_batches();
        for batch_index in 0..self.batch_count {
            self.run_batch(world, batch_index);
        }
    }

    /// Greedy packing: a due system joins the current batch iff it
    /// conflicts with none of its members; otherwise it opens the next
    /// batch. Earlier-registered systems land in earlier batches.
    fn form_batches(&mut self) {
        self.batch_count = 0;
        for position in 0..self.due.len() {
            let index = self.due[position];
            let joins_current = self.batch_count > 0 && {
                let current = &self.batches[self.batch_count - 1];
                current.iter().all(|&member| {
                    !self.systems[member]
                        .access
                        .conflicts_with(&self.systems[index].access)
                })
            };
            if !joins_current {
                if self.batch_count == self.batches.len() {
                    self.batches.push(Vec::new());
                }
                self.batches[self.batch_count].clear();
                self.batch_count += 1;
            }
            self.batches[self.batch_count - 1].push(index);
        }
    }

    fn run_batch(&mut self, world: &World, batch_index: usize) {
        let now = world.time();

        self.active_buffers.clear();
        for _ in 0..self.batches[batch_index].len() {
            self.active_buffers
                .push(self.buffer_pool.pop().unwrap_or_default());
        }

        // Build tasks only after the buffer vector is final: the raw
        // pointers must not be invalidated by a later push.
        self.tasks.clear();
        let batch = &self.batches[batch_index];
        for (slot, &index) in batch.iter().enumerate() {
            let entry = &mut self.systems[index];
            let task = Task {
                system: entry.system.as_mut() as *mut dyn crate::system::System,
                world,
                access: &entry.access,
                buffer: &mut self.active_buffers[slot],
                delta: self.bucket_delta[entry.rate.bucket()],
            };
            self.tasks.push(task);
        }

        // SAFETY: one task per distinct system and buffer; the batch is
        // conflict-free by construction; everything pointed to outlives the
        // blocking run_batch call below.
        unsafe {
            world.worker_pool().run_batch(&self.tasks);
        }
        self.tasks.clear();

        // Batch boundary: recorded commands become visible to the world's
        // queues now, never between systems of the batch.
        for mut buffer in self.active_buffers.drain(..) {
            world.queues().absorb(&mut buffer);
            self.buffer_pool.push(buffer);
        }
        for &index in &self.batches[batch_index] {
            self.systems[index].last_run = now;
        }
    }

    /// Run one system immediately on the calling thread, outside the batch
    /// machinery. The effective delta is the time since the system's
    /// previous run (or since world start).
    pub(crate) fn run_manual(&mut self, world: &World, id: SystemId) -> Result<()> {
        let position = self.position_of(id).ok_or(EcsError::SystemNotFound)?;
        let entry = &mut self.systems[position];
        if entry.rate != TickRate::Manual {
            tracing::warn!(system = entry.system.name(), "run_manual on a scheduled system");
        }
        if !entry.enabled {
            return Ok(());
        }

        let delta = world.time() - entry.last_run;
        let mut buffer = self.buffer_pool.pop().unwrap_or_default();
        let task = Task {
            system: entry.system.as_mut() as *mut dyn crate::system::System,
            world,
            access: &entry.access,
            buffer: &mut buffer,
            delta,
        };
        // SAFETY: single task, executed synchronously on this thread; all
        // pointers outlive the call.
        unsafe {
            crate::executor::run_task(&task);
        }

        world.queues().absorb(&mut buffer);
        self.buffer_pool.push(buffer);
        self.systems[position].last_run = world.time();
        Ok(())
    }

    /// Invoke every system's shutdown hook (world teardown).
    pub(crate) fn shutdown_all(&mut self, world: &World) {
        for entry in &mut self.systems {
            if let Err(err) = entry.system.shutdown(world) {
                tracing::warn!(system = entry.system.name(), "shutdown hook failed: {err}");
            }
        }
    }

    /// The batch layout of the most recent frame, for diagnostics and
    /// tests.
    pub(crate) fn last_batches(&self) -> Vec<Vec<SystemId>> {
        self.batches[..self.batch_count]
            .iter()
            .map(|batch| batch.iter().map(|&index| self.systems[index].id).collect())
            .collect()
    }
}
