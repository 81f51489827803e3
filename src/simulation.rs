//! The per-tick orchestrator.
//!
//! [`Simulation`] owns a backend and every device resource of one emitter:
//! the pool, three argument buffers, the ramp textures and the emission
//! mesh. A tick runs:
//!
//! 1. Emitter velocity (rigid body or transform delta).
//! 2. Uniform snapshot.
//! 3. Spawn sizing. Spawn is skipped outright when nothing can spawn.
//! 4. SizeUpdate, in [`UpdateExtent::HighWater`] mode.
//! 5. Update, always.
//!
//! Resources are released exactly once, by [`Simulation::teardown`] or on drop.

use glam::{Mat4, Vec3, Vec4};
use log::{debug, info, warn};

use crate::config::{
    EmissionShape, NoiseConfig, SimulationConfig, SpawnSizing, UpdateExtent, VelocityColor,
    VelocitySource,
};
use crate::dispatch::{DispatchArgBuilder, DispatchArgs, SpawnDispatch};
use crate::error::DustError;
use crate::kernel::Backend;
use crate::mesh::{MeshSampler, SourceMesh};
use crate::params::{FrameInputs, SimParams};
use crate::particle::Particle;
use crate::pool::ParticlePool;
use crate::ramp::{Curve, Gradient, RampSet};
use crate::time::FixedClock;

/// What Spawn did in one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnOutcome {
    /// Particles requested this tick.
    pub budget: u32,
    /// Free slots read back before sizing. `None` without a readback.
    pub free_before: Option<u32>,
    /// Threads allowed to spawn. Fewer may succeed with [`SpawnSizing::WorstCase`].
    pub dispatched: u32,
    /// Grid used, `None` when Spawn was skipped.
    pub args: Option<DispatchArgs>,
}

impl SpawnOutcome {
    pub fn skipped(&self) -> bool {
        self.args.is_none()
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub frame: u32,
    pub dt: f32,
    /// Simulated seconds at the start of the tick.
    pub time: f32,
    pub spawn: SpawnOutcome,
    /// Update's grid, when the host knows it. `None` in high-water mode,
    /// where the device sizes Update.
    pub update_args: Option<DispatchArgs>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Emitter {
    origin: Vec3,
    previous_origin: Option<Vec3>,
    rigidbody_velocity: Option<Vec3>,
}

/// One emitter and its particle pool.
pub struct Simulation<B: Backend> {
    backend: B,
    config: SimulationConfig,
    clock: FixedClock,
    emitter: Emitter,
    pool: ParticlePool<B>,
    init_args: DispatchArgBuilder<B>,
    spawn_args: DispatchArgBuilder<B>,
    update_args: DispatchArgBuilder<B>,
    ramps: RampSet<B>,
    mesh: MeshSampler<B>,
    torn_down: bool,
}

impl<B: Backend> Simulation<B> {
    /// Validate `config`, allocate every resource, initialise the pool and
    /// run the configured pre-warm ticks.
    ///
    /// On error everything acquired so far is released before returning.
    pub fn new(backend: B, config: SimulationConfig) -> Result<Self, DustError> {
        config.validate()?;

        let mut sim = Self {
            backend,
            clock: FixedClock::new(config.fixed_dt, config.max_steps_per_advance),
            emitter: Emitter::default(),
            pool: ParticlePool::new(),
            init_args: DispatchArgBuilder::unallocated("init args"),
            spawn_args: DispatchArgBuilder::unallocated("spawn args"),
            update_args: DispatchArgBuilder::unallocated("update args"),
            ramps: RampSet::empty(),
            mesh: MeshSampler::new(),
            torn_down: false,
            config,
        };
        // A failed build drops `sim`, which tears down whatever was created.
        sim.build()?;
        Ok(sim)
    }

    fn build(&mut self) -> Result<(), DustError> {
        let backend = &mut self.backend;
        self.ramps.allocate(backend, &self.config)?;
        self.init_args.allocate(backend)?;
        self.spawn_args.allocate(backend)?;
        self.update_args.allocate(backend)?;

        self.pool.initialize(backend, self.config.capacity, &mut self.init_args)?;

        if let Some(source) = &self.config.emission_mesh {
            self.mesh.capture(backend, source)?;
        }
        self.mesh.set_transform(self.config.mesh_transform);

        // High-water mode sizes Update on the device every tick.
        if self.config.update_extent == UpdateExtent::FullPool {
            self.update_args.build_from_count(backend, self.config.capacity)?;
        }

        info!(
            "Simulation ready on {}: capacity {}, emission {}/tick, {:?} spawn sizing, {:?} update",
            self.backend.name(),
            self.config.capacity,
            self.config.emission,
            self.config.spawn_sizing,
            self.config.update_extent
        );

        self.prewarm(self.config.prewarm_frames)
    }

    /// Run `frames` ticks with the fixed timestep.
    pub fn prewarm(&mut self, frames: u32) -> Result<(), DustError> {
        if frames == 0 {
            return Ok(());
        }
        for _ in 0..frames {
            self.step()?;
        }
        debug!("Pre-warmed {} frames", frames);
        Ok(())
    }

    /// One tick with the fixed timestep.
    pub fn step(&mut self) -> Result<TickReport, DustError> {
        self.tick(self.clock.fixed_dt())
    }

    /// Add wall time and run every whole fixed step it covers, up to
    /// `max_steps_per_advance`.
    pub fn advance(&mut self, wall_dt: f32) -> Result<Vec<TickReport>, DustError> {
        let steps = self.clock.accumulate(wall_dt);
        (0..steps).map(|_| self.step()).collect()
    }

    /// One tick of `dt` seconds.
    pub fn tick(&mut self, dt: f32) -> Result<TickReport, DustError> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(DustError::InvalidConfig(format!("tick dt must be positive, got {}", dt)));
        }
        if self.torn_down {
            return Err(DustError::Released("simulation"));
        }

        let origin = self.emitter.origin;
        let inputs = FrameInputs {
            dt,
            time: self.clock.time(),
            frame: self.clock.frame(),
            origin,
            emitter_velocity: self.emitter_velocity(),
            velocity_color_range: self.ramps.velocity_range(),
            mesh: self.mesh.uniforms(),
        };
        let params = SimParams::snapshot(&self.config, &inputs);

        let spawn = self.spawn_args.build_from_live_free_count(
            &mut self.backend,
            &self.pool,
            self.config.emission,
            self.config.spawn_sizing,
        )?;
        let outcome = SpawnOutcome {
            budget: self.config.emission,
            free_before: match self.config.spawn_sizing {
                SpawnSizing::Readback => self.spawn_args.last_free_count(),
                SpawnSizing::WorstCase => None,
            },
            dispatched: spawn.count(),
            args: match spawn {
                SpawnDispatch::Skip => None,
                SpawnDispatch::Dispatch { args, .. } => Some(args),
            },
        };

        match spawn {
            SpawnDispatch::Skip => debug!("Frame {}: spawn skipped", inputs.frame),
            SpawnDispatch::Dispatch { count, .. } => {
                let spawn_params = params.with_spawn_count(count);
                self.pool
                    .spawn(&mut self.backend, &self.spawn_args, self.mesh.buffers(), &spawn_params)?;
            }
        }

        if self.config.update_extent == UpdateExtent::HighWater {
            self.pool.size_update(&mut self.backend, &mut self.update_args)?;
        }
        self.pool
            .update(&mut self.backend, &self.update_args, self.ramps.bindings()?, &params)?;

        self.clock.tick(dt);
        self.emitter.previous_origin = Some(origin);

        Ok(TickReport {
            frame: inputs.frame,
            dt,
            time: inputs.time,
            spawn: outcome,
            update_args: self.update_args.current(),
        })
    }

    /// Rigid-body velocity, or the emitter's displacement since the last tick.
    fn emitter_velocity(&self) -> Vec3 {
        match self.config.velocity_source {
            VelocitySource::Rigidbody => self.emitter.rigidbody_velocity.unwrap_or(Vec3::ZERO),
            VelocitySource::Transform => match self.emitter.previous_origin {
                Some(previous) => self.emitter.origin - previous,
                None => Vec3::ZERO,
            },
        }
    }

    /// Move the emitter. Only the translation is used.
    pub fn set_emitter_transform(&mut self, transform: Mat4) {
        self.emitter.origin = transform.w_axis.truncate();
    }

    pub fn set_origin(&mut self, origin: Vec3) {
        self.emitter.origin = origin;
    }

    pub fn origin(&self) -> Vec3 {
        self.emitter.origin
    }

    /// Velocity reported by an attached rigid body. `None` detaches it.
    pub fn set_rigidbody_velocity(&mut self, velocity: Option<Vec3>) {
        self.emitter.rigidbody_velocity = velocity;
    }

    /// Particles requested per tick.
    pub fn set_emission(&mut self, emission: u32) {
        self.config.emission = emission;
    }

    /// Capture a new emission mesh and switch to mesh emission.
    pub fn set_emission_mesh(&mut self, source: SourceMesh) -> Result<(), DustError> {
        self.mesh.capture(&mut self.backend, &source)?;
        self.config.emission_mesh = Some(source);
        self.config.shape = EmissionShape::Mesh;
        Ok(())
    }

    pub fn set_mesh_transform(&mut self, local_to_world: Mat4) {
        self.mesh.set_transform(local_to_world);
        self.config.mesh_transform = local_to_world;
    }

    /// Switch the emission shape. Mesh emission needs a captured mesh.
    pub fn set_shape(&mut self, shape: EmissionShape) -> Result<(), DustError> {
        if shape == EmissionShape::Mesh && !self.mesh.is_captured() {
            return Err(DustError::InvalidConfig(
                "mesh emission selected without an emission mesh".into(),
            ));
        }
        self.config.shape = shape;
        Ok(())
    }

    pub fn set_size_over_life(&mut self, curve: Option<Curve>) -> Result<(), DustError> {
        self.ramps.set_size_over_life(&mut self.backend, curve.as_ref())?;
        self.config.size_over_life = curve;
        Ok(())
    }

    pub fn set_color_over_life(&mut self, gradient: Option<Gradient>) -> Result<(), DustError> {
        self.ramps.set_color_over_life(&mut self.backend, gradient.as_ref())?;
        self.config.color_over_life = gradient;
        Ok(())
    }

    pub fn set_color_over_velocity(&mut self, gradient: Option<Gradient>, range: f32) -> Result<(), DustError> {
        self.ramps
            .set_color_over_velocity(&mut self.backend, gradient.as_ref(), range)?;
        self.config.color_over_velocity = gradient.map(|gradient| VelocityColor { gradient, range });
        Ok(())
    }

    /// Enable, change or (with `None`) disable noise displacement.
    pub fn set_noise(&mut self, noise: Option<NoiseConfig>) {
        self.config.noise = noise;
    }

    pub fn set_start_color(&mut self, color: Vec4) {
        self.config.start_color = color;
    }

    pub fn set_gravity_modifier(&mut self, modifier: f32) {
        self.config.gravity_modifier = modifier;
    }

    /// Free slots. Blocks until the device is idle.
    pub fn free_count(&mut self) -> Result<u32, DustError> {
        self.pool.free_count(&mut self.backend)
    }

    /// Copy of every particle record. Blocks.
    pub fn read_particles(&mut self) -> Result<Vec<Particle>, DustError> {
        self.pool.read_particles(&mut self.backend)
    }

    /// Free slot indices currently listed. Blocks.
    pub fn read_dead_list(&mut self) -> Result<Vec<u32>, DustError> {
        self.pool.read_dead_list(&mut self.backend)
    }

    /// Active records. Reads the whole pool back.
    pub fn live_count(&mut self) -> Result<u32, DustError> {
        self.pool.live_count(&mut self.backend)
    }

    /// The pool, for renderers that bind its particle buffer.
    pub fn pool(&self) -> &ParticlePool<B> {
        &self.pool
    }

    pub fn mesh(&self) -> &MeshSampler<B> {
        &self.mesh
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn clock(&self) -> &FixedClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut FixedClock {
        &mut self.clock
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Release every device resource. Later calls do nothing.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let backend = &mut self.backend;
        let mut released = 0;
        if self.pool.is_initialized() {
            count_release(self.pool.release(backend), &mut released);
        }
        for args in [&mut self.init_args, &mut self.spawn_args, &mut self.update_args] {
            if args.is_live() {
                count_release(args.release(backend), &mut released);
            }
        }
        if self.ramps.is_live() {
            count_release(self.ramps.release(backend), &mut released);
        }
        if self.mesh.is_captured() {
            count_release(self.mesh.release(backend), &mut released);
        }
        info!("Simulation torn down ({} components released)", released);
    }
}

fn count_release(result: Result<(), DustError>, released: &mut u32) {
    match result {
        Ok(()) => *released += 1,
        Err(e) => warn!("Release failed during teardown: {}", e),
    }
}

impl<B: Backend> Drop for Simulation<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostBackend;
    use crate::kernel::Kernel;

    fn small() -> SimulationConfig {
        SimulationConfig::new()
            .with_capacity(256)
            .with_emission(16)
            .with_lifespan(1.0..1.0)
            .with_fixed_dt(0.1)
    }

    #[test]
    fn test_tick_order_is_spawn_then_update() {
        let mut sim = Simulation::new(HostBackend::new(), small()).unwrap();
        sim.backend_mut().clear_dispatch_log();
        sim.step().unwrap();

        let kernels: Vec<_> = sim.backend().dispatch_log().iter().map(|(k, _)| *k).collect();
        assert_eq!(kernels, vec![Kernel::Spawn, Kernel::Update]);
    }

    #[test]
    fn test_report_counts_spawn() {
        let mut sim = Simulation::new(HostBackend::new(), small()).unwrap();
        let report = sim.step().unwrap();

        assert_eq!(report.frame, 0);
        assert_eq!(report.spawn.budget, 16);
        assert_eq!(report.spawn.free_before, Some(256));
        assert_eq!(report.spawn.dispatched, 16);
        assert_eq!(report.update_args, Some(DispatchArgs::new(1, 1, 1)));
        assert_eq!(sim.free_count().unwrap(), 240);
    }

    #[test]
    fn test_transform_velocity_source() {
        let config = small().with_inherit_velocity(1.0, VelocitySource::Transform);
        let mut sim = Simulation::new(HostBackend::new(), config).unwrap();
        sim.step().unwrap();

        sim.set_origin(Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(sim.emitter_velocity(), Vec3::new(1.0, 0.0, 0.0));

        // Displacement, not a rate: dt does not scale it.
        sim.step().unwrap();
        sim.set_origin(Vec3::new(1.0, 0.5, 0.0));
        assert_eq!(sim.emitter_velocity(), Vec3::new(0.0, 0.5, 0.0));
    }

    #[test]
    fn test_rigidbody_velocity_source() {
        let mut sim = Simulation::new(HostBackend::new(), small()).unwrap();
        assert_eq!(sim.emitter_velocity(), Vec3::ZERO);
        sim.set_rigidbody_velocity(Some(Vec3::Y));
        assert_eq!(sim.emitter_velocity(), Vec3::Y);
    }

    #[test]
    fn test_invalid_dt_rejected() {
        let mut sim = Simulation::new(HostBackend::new(), small()).unwrap();
        assert!(sim.tick(0.0).is_err());
        assert!(sim.tick(f32::INFINITY).is_err());
    }

    #[test]
    fn test_mesh_shape_requires_capture() {
        let mut sim = Simulation::new(HostBackend::new(), small()).unwrap();
        assert!(sim.set_shape(EmissionShape::Mesh).is_err());
        sim.set_emission_mesh(SourceMesh::cube(0.5)).unwrap();
        assert_eq!(sim.config().shape, EmissionShape::Mesh);
        assert!(sim.set_shape(EmissionShape::Box).is_ok());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut sim = Simulation::new(HostBackend::new(), small()).unwrap();
        sim.teardown();
        sim.teardown();
        assert_eq!(sim.backend().live_resources(), 0);
        assert!(matches!(sim.step(), Err(DustError::Released(_))));
    }
}
