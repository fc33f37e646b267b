//! System trait, access metadata, and tick rates.
//!
//! A system declares the component types it reads and writes; the scheduler
//! uses those sets to form conflict-free batches. During execution a system
//! sees the world through a shared reference plus a [`SystemContext`] that
//! grants access-checked column views and a command buffer for structural
//! changes.

use smallvec::SmallVec;

use crate::archetype::Archetype;
use crate::command::CommandBuffer;
use crate::error::Result;
use crate::registry::ComponentTypeId;
use crate::world::World;

/// System ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub u32);

/// How often a system is due. `Manual` systems run only through
/// [`World::run_manual`](crate::world::World::run_manual).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickRate {
    /// Due every frame (period 0).
    EveryFrame,
    /// ~30 Hz.
    Ms33,
    /// 20 Hz.
    Ms50,
    /// 10 Hz.
    Ms100,
    Ms250,
    Ms500,
    Sec1,
    Sec5,
    /// Never auto-run.
    Manual,
}

impl TickRate {
    pub(crate) const COUNT: usize = 9;

    pub(crate) const ALL: [TickRate; Self::COUNT] = [
        TickRate::EveryFrame,
        TickRate::Ms33,
        TickRate::Ms50,
        TickRate::Ms100,
        TickRate::Ms250,
        TickRate::Ms500,
        TickRate::Sec1,
        TickRate::Sec5,
        TickRate::Manual,
    ];

    /// Scheduling period in seconds; `None` for `Manual`.
    pub fn period(self) -> Option<f64> {
        match self {
            TickRate::EveryFrame => Some(0.0),
            TickRate::Ms33 => Some(0.033),
            TickRate::Ms50 => Some(0.05),
            TickRate::Ms100 => Some(0.1),
            TickRate::Ms250 => Some(0.25),
            TickRate::Ms500 => Some(0.5),
            TickRate::Sec1 => Some(1.0),
            TickRate::Sec5 => Some(5.0),
            TickRate::Manual => None,
        }
    }

    #[inline]
    pub(crate) fn bucket(self) -> usize {
        match self {
            TickRate::EveryFrame => 0,
            TickRate::Ms33 => 1,
            TickRate::Ms50 => 2,
            TickRate::Ms100 => 3,
            TickRate::Ms250 => 4,
            TickRate::Ms500 => 5,
            TickRate::Sec1 => 6,
            TickRate::Sec5 => 7,
            TickRate::Manual => 8,
        }
    }
}

const INLINE_ACCESS: usize = 8;

/// System access metadata: the conflict-analysis inputs.
///
/// A component in the write set implies read access too.
#[derive(Debug, Clone, Default)]
pub struct SystemAccess {
    pub reads: SmallVec<[ComponentTypeId; INLINE_ACCESS]>,
    pub writes: SmallVec<[ComponentTypeId; INLINE_ACCESS]>,
}

impl SystemAccess {
    /// Create empty access
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(reads: &[ComponentTypeId], writes: &[ComponentTypeId]) -> Self {
        Self {
            reads: SmallVec::from_slice(reads),
            writes: SmallVec::from_slice(writes),
        }
    }

    /// Builder-style: add a read.
    pub fn read(mut self, id: ComponentTypeId) -> Self {
        self.reads.push(id);
        self
    }

    /// Builder-style: add a write.
    pub fn write(mut self, id: ComponentTypeId) -> Self {
        self.writes.push(id);
        self
    }

    /// Two systems conflict iff one's writes intersect the other's reads or
    /// writes.
    pub fn conflicts_with(&self, other: &SystemAccess) -> bool {
        for w in &self.writes {
            if other.writes.contains(w) || other.reads.contains(w) {
                return true;
            }
        }
        for r in &self.reads {
            if other.writes.contains(r) {
                return true;
            }
        }
        false
    }

    #[inline]
    pub(crate) fn can_read(&self, id: ComponentTypeId) -> bool {
        self.reads.contains(&id) || self.writes.contains(&id)
    }

    #[inline]
    pub(crate) fn can_write(&self, id: ComponentTypeId) -> bool {
        self.writes.contains(&id)
    }
}

/// System trait
pub trait System: Send + Sync {
    /// Get system name
    fn name(&self) -> &str;

    /// Get system access metadata
    fn access(&self) -> SystemAccess;

    /// Scheduling rate; read once at registration.
    fn rate(&self) -> TickRate {
        TickRate::EveryFrame
    }

    /// Called once when the system is registered.
    fn initialize(&mut self, _world: &World) -> Result<()> {
        Ok(())
    }

    /// Called when the system is unregistered or the world shuts down.
    fn shutdown(&mut self, _world: &World) -> Result<()> {
        Ok(())
    }

    /// Run one update. `ctx.delta()` is the time since this system's bucket
    /// last fired, not the host frame delta.
    fn update(&mut self, world: &World, ctx: &mut SystemContext<'_>) -> Result<()>;
}

/// Boxed system
pub type BoxedSystem = Box<dyn System>;

/// Per-execution context handed to a system: effective delta, the system's
/// command buffer, and access-checked column views.
pub struct SystemContext<'a> {
    delta: f64,
    access: &'a SystemAccess,
    commands: &'a mut CommandBuffer,
}

impl<'a> SystemContext<'a> {
    pub(crate) fn new(delta: f64, access: &'a SystemAccess, commands: &'a mut CommandBuffer) -> Self {
        Self {
            delta,
            access,
            commands,
        }
    }

    /// Seconds since this system last ran.
    #[inline]
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// The system's command buffer; drained into the world's queues after
    /// this batch completes.
    #[inline]
    pub fn commands(&mut self) -> &mut CommandBuffer {
        self.commands
    }

    /// Read-only view of a component column.
    ///
    /// # Panics
    /// Panics if `id` is not in the system's declared read or write set —
    /// an undeclared read could race another system's write in the same
    /// batch.
    pub fn read<'w, T: crate::component::Component>(
        &self,
        archetype: &'w Archetype,
        id: ComponentTypeId,
    ) -> Option<&'w [T]> {
        assert!(
            self.access.can_read(id),
            "component type {:?} is not in this system's read set",
            id
        );
        archetype.column_slice::<T>(id)
    }

    /// Mutable view of a component column.
    ///
    /// The borrow of `self` keeps at most one writable column view alive per
    /// system at a time; across systems, the scheduler guarantees no other
    /// system in the batch touches this component type. Do not mix with
    /// [`Archetype::column_slice`] for the same column while the returned
    /// slice is alive.
    ///
    /// # Panics
    /// Panics if `id` is not in the system's declared write set.
    pub fn write<'s, T: crate::component::Component>(
        &'s mut self,
        archetype: &'s Archetype,
        id: ComponentTypeId,
    ) -> Option<&'s mut [T]> {
        assert!(
            self.access.can_write(id),
            "component type {:?} is not in this system's write set",
            id
        );
        // SAFETY: the declared-access assertion plus the scheduler's
        // conflict analysis guarantee this system is the only writer of
        // this component type in the running batch, and `&mut self` keeps
        // this system from creating a second view.
        unsafe { archetype.column_slice_mut_shared::<T>(id) }
    }
}

type UpdateFn = Box<dyn FnMut(&World, &mut SystemContext<'_>) -> Result<()> + Send + Sync>;
type LifecycleFn = Box<dyn FnMut(&World) -> Result<()> + Send + Sync>;

/// A [`System`] built from a configuration record: name, rate, access sets,
/// and closures for update and the optional lifecycle hooks.
pub struct FnSystem {
    name: String,
    rate: TickRate,
    access: SystemAccess,
    update: UpdateFn,
    on_initialize: Option<LifecycleFn>,
    on_shutdown: Option<LifecycleFn>,
}

impl FnSystem {
    pub fn new(
        name: impl Into<String>,
        rate: TickRate,
        access: SystemAccess,
        update: impl FnMut(&World, &mut SystemContext<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            rate,
            access,
            update: Box::new(update),
            on_initialize: None,
            on_shutdown: None,
        }
    }

    pub fn on_initialize(
        mut self,
        f: impl FnMut(&World) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_initialize = Some(Box::new(f));
        self
    }

    pub fn on_shutdown(
        mut self,
        f: impl FnMut(&World) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_shutdown = Some(Box::new(f));
        self
    }
}

impl System for FnSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> SystemAccess {
        self.access.clone()
    }

    fn rate(&self) -> TickRate {
        self.rate
    }

    fn initialize(&mut self, world: &World) -> Result<()> {
        match &mut self.on_initialize {
            Some(f) => f(world),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self, world: &World) -> Result<()> {
        match &mut self.on_shutdown {
            Some(f) => f(world),
            None => Ok(()),
        }
    }

    fn update(&mut self, world: &World, ctx: &mut SystemContext<'_>) -> Result<()> {
        (self.update)(world, ctx)
    }
}
