//! The particle pool: a fixed arena of records plus a device dead-list.
//!
//! # Dead-list protocol
//!
//! The dead-list is a stack of free slot indices with an atomic
//! `dead_count`:
//!
//! - **Init** writes a default record to every slot and lists every index
//!   in `[0, capacity)`, slot 0 on top, so spawns fill the pool from the
//!   bottom and the spawn high-water mark stays low.
//! - **Spawn** consumes: `top = atomicSub(dead_count, 1)`. A thread that
//!   sees `top <= 0` restores the counter and does nothing, so requesting
//!   more particles than there are free slots simply spawns fewer.
//! - **Update** appends the slot of every particle whose age passed its
//!   lifespan.
//!
//! Spawn is submitted before Update in every tick and a dispatch either only
//! consumes or only appends, so between ticks every slot is either active
//! or listed exactly once:
//!
//! ```text
//! dead_count + live == capacity
//! ```

use log::{debug, info};

use crate::dispatch::{DispatchArgBuilder, DispatchDecision};
use crate::error::DustError;
use crate::kernel::{Backend, Handle, Kernel, RampBindings};
use crate::params::SimParams;
use crate::particle::Particle;

/// Largest pool a single simulation supports.
pub const MAX_CAPACITY: u32 = 1 << 20;

const WHAT: &str = "particle pool";

/// Fixed-capacity particle arena with a device-side free list.
pub struct ParticlePool<B: Backend> {
    buffers: Handle<B::Pool>,
    capacity: u32,
}

impl<B: Backend> Default for ParticlePool<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ParticlePool<B> {
    /// An uninitialized pool. Owns nothing until [`initialize`](Self::initialize).
    pub fn new() -> Self {
        Self {
            buffers: Handle::Empty,
            capacity: 0,
        }
    }

    /// Allocate the pool and dispatch Init over it.
    ///
    /// `args` is sized from `capacity` and used for the Init dispatch, so
    /// the capacity is only ever known to the device through that buffer.
    pub fn initialize(
        &mut self,
        backend: &mut B,
        capacity: u32,
        args: &mut DispatchArgBuilder<B>,
    ) -> Result<(), DustError> {
        if capacity == 0 {
            return Err(DustError::ZeroCapacity);
        }
        if capacity > MAX_CAPACITY {
            return Err(DustError::CapacityTooLarge {
                requested: capacity,
                max: MAX_CAPACITY,
            });
        }
        match self.buffers {
            Handle::Live(_) => return Err(DustError::AlreadyInitialized),
            Handle::Released => return Err(DustError::Released(WHAT)),
            Handle::Empty => {}
        }

        let mut pool = backend.create_pool(capacity)?;
        let init = match args.build_from_count(backend, capacity) {
            Ok(DispatchDecision::Dispatch(_)) => args
                .dispatchable(Kernel::Init)
                .and_then(|a| backend.dispatch_init(&mut pool, a, &SimParams::for_init(capacity))),
            Ok(DispatchDecision::Skip) => Err(DustError::DegenerateDispatch(Kernel::Init)),
            Err(e) => Err(e),
        };
        if let Err(e) = init {
            backend.release_pool(pool);
            return Err(e);
        }

        self.buffers.replace(pool);
        self.capacity = capacity;
        info!(
            "Initialized particle pool on {}: {} slots ({:.1} MB)",
            backend.name(),
            capacity,
            (capacity as u64 * Particle::STRIDE) as f64 / (1024.0 * 1024.0)
        );
        Ok(())
    }

    /// Dispatch Spawn for `params.spawn_count()` particles.
    ///
    /// A spawn count of zero issues no dispatch.
    pub fn spawn(
        &mut self,
        backend: &mut B,
        args: &DispatchArgBuilder<B>,
        mesh: Option<&B::Mesh>,
        params: &SimParams,
    ) -> Result<(), DustError> {
        let pool = self.buffers.get_mut(WHAT)?;
        if params.spawn_count() == 0 {
            debug!("Spawn skipped: nothing to spawn");
            return Ok(());
        }
        let args = args.dispatchable(Kernel::Spawn)?;
        backend.dispatch_spawn(pool, args, mesh, params)
    }

    /// Dispatch the one-thread kernel that sizes Update from the spawn
    /// high-water mark.
    pub fn size_update(
        &mut self,
        backend: &mut B,
        update_args: &mut DispatchArgBuilder<B>,
    ) -> Result<(), DustError> {
        let pool = self.buffers.get_mut(WHAT)?;
        backend.dispatch_size_update(pool, update_args.buffer_mut()?)?;
        update_args.mark_device_written();
        Ok(())
    }

    /// Dispatch Update.
    pub fn update(
        &mut self,
        backend: &mut B,
        args: &DispatchArgBuilder<B>,
        ramps: RampBindings<'_, B::Ramp>,
        params: &SimParams,
    ) -> Result<(), DustError> {
        let pool = self.buffers.get_mut(WHAT)?;
        let args = args.dispatchable(Kernel::Update)?;
        backend.dispatch_update(pool, args, ramps, params)
    }

    /// Free slots. Stalls until the device has finished all submitted work.
    pub fn free_count(&self, backend: &mut B) -> Result<u32, DustError> {
        backend.read_free_count(self.buffers.get(WHAT)?)
    }

    /// Copy of every record.
    pub fn read_particles(&self, backend: &mut B) -> Result<Vec<Particle>, DustError> {
        backend.read_particles(self.buffers.get(WHAT)?)
    }

    /// Free slot indices currently listed.
    pub fn read_dead_list(&self, backend: &mut B) -> Result<Vec<u32>, DustError> {
        backend.read_dead_list(self.buffers.get(WHAT)?)
    }

    /// Number of active records. Reads the whole pool back.
    pub fn live_count(&self, backend: &mut B) -> Result<u32, DustError> {
        let particles = self.read_particles(backend)?;
        Ok(particles.iter().filter(|p| p.is_active()).count() as u32)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn is_initialized(&self) -> bool {
        self.buffers.is_live()
    }

    /// Read-only access to the device buffers for renderers.
    pub fn buffers(&self) -> Result<&B::Pool, DustError> {
        self.buffers.get(WHAT)
    }

    /// Release the pool's buffers. A second call returns [`DustError::Released`].
    pub fn release(&mut self, backend: &mut B) -> Result<(), DustError> {
        let pool = self.buffers.take(WHAT)?;
        backend.release_pool(pool);
        info!("Released particle pool ({} slots)", self.capacity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostBackend;

    fn setup(capacity: u32) -> (HostBackend, ParticlePool<HostBackend>, DispatchArgBuilder<HostBackend>) {
        let mut backend = HostBackend::new();
        let mut args = DispatchArgBuilder::new(&mut backend, "init args").unwrap();
        let mut pool = ParticlePool::new();
        pool.initialize(&mut backend, capacity, &mut args).unwrap();
        (backend, pool, args)
    }

    #[test]
    fn test_initialize_lists_every_slot() {
        let (mut backend, pool, _) = setup(300);
        assert_eq!(pool.free_count(&mut backend).unwrap(), 300);

        let mut dead = pool.read_dead_list(&mut backend).unwrap();
        dead.sort_unstable();
        assert_eq!(dead, (0..300).collect::<Vec<_>>());
        assert!(pool.read_particles(&mut backend).unwrap().iter().all(|p| *p == Particle::dead()));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut backend = HostBackend::new();
        let mut args = DispatchArgBuilder::new(&mut backend, "init args").unwrap();
        let mut pool = ParticlePool::new();
        assert!(matches!(
            pool.initialize(&mut backend, 0, &mut args),
            Err(DustError::ZeroCapacity)
        ));
        assert!(matches!(
            pool.initialize(&mut backend, MAX_CAPACITY + 1, &mut args),
            Err(DustError::CapacityTooLarge { .. })
        ));
        assert!(!pool.is_initialized());
    }

    #[test]
    fn test_initialize_twice_rejected() {
        let (mut backend, mut pool, mut args) = setup(16);
        assert!(matches!(
            pool.initialize(&mut backend, 16, &mut args),
            Err(DustError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_use_before_initialize() {
        let mut backend = HostBackend::new();
        let args = DispatchArgBuilder::new(&mut backend, "spawn args").unwrap();
        let mut pool = ParticlePool::<HostBackend>::new();
        let params = SimParams::for_init(16).with_spawn_count(4);

        assert!(matches!(
            pool.spawn(&mut backend, &args, None, &params),
            Err(DustError::NotInitialized(_))
        ));
        assert!(matches!(pool.free_count(&mut backend), Err(DustError::NotInitialized(_))));
    }

    #[test]
    fn test_release_exactly_once() {
        let (mut backend, mut pool, mut args) = setup(64);
        pool.release(&mut backend).unwrap();
        args.release(&mut backend).unwrap();
        assert_eq!(backend.live_resources(), 0);

        assert!(matches!(pool.release(&mut backend), Err(DustError::Released(_))));
        assert!(matches!(pool.free_count(&mut backend), Err(DustError::Released(_))));
    }

    #[test]
    fn test_init_dispatch_is_sized_from_capacity() {
        let (backend, _, _) = setup(1000);
        let (kernel, args) = backend.dispatch_log()[0];
        assert_eq!(kernel, Kernel::Init);
        assert_eq!(args.to_array(), [2, 2, 1]);
    }
}
