//! Simulation configuration.
//!
//! Configuration arrives as an in-memory [`SimulationConfig`] built with
//! method chaining. Defaults match a single large emitter: a 1M-slot pool,
//! 65,000 spawns requested per tick, five second lifespan, no gravity.
//!
//! # Example
//!
//! ```ignore
//! let config = SimulationConfig::new()
//!     .with_capacity(262_144)
//!     .with_emission(2_000)
//!     .with_lifespan(1.0..3.0)
//!     .with_shape(EmissionShape::Box)
//!     .with_gravity_modifier(0.2)
//!     .with_noise(NoiseConfig::new(NoiseKind::Value).amplitude(Vec3::splat(0.5)));
//! ```

use std::ops::Range;

use glam::{Mat4, Vec3, Vec4};

use crate::error::DustError;
use crate::mesh::SourceMesh;
use crate::pool::MAX_CAPACITY;
use crate::ramp::{Curve, Gradient};

/// Where newly spawned particles are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmissionShape {
    /// Ellipsoid with radii `emission_size`.
    #[default]
    Sphere,
    /// Box with extents `emission_size`.
    Box,
    /// Surface of the captured emission mesh.
    Mesh,
}

impl EmissionShape {
    /// Selector value read by the Spawn kernel.
    pub fn selector(self) -> u32 {
        match self {
            EmissionShape::Sphere => 0,
            EmissionShape::Box => 1,
            EmissionShape::Mesh => 2,
        }
    }
}

/// Displacement field applied by the Update kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoiseKind {
    /// Cheap analytic field, smooth and periodic.
    #[default]
    Sine,
    /// Hash-lattice value noise with smoothstep interpolation.
    Value,
}

impl NoiseKind {
    pub fn selector(self) -> u32 {
        match self {
            NoiseKind::Sine => 0,
            NoiseKind::Value => 1,
        }
    }
}

/// Noise displacement settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseConfig {
    pub kind: NoiseKind,
    pub amplitude: Vec3,
    pub scale: Vec3,
    /// Field offset; `w` shifts all three axes together.
    pub offset: Vec4,
    /// Offset added per second of simulation time.
    pub offset_speed: Vec4,
}

impl NoiseConfig {
    pub fn new(kind: NoiseKind) -> Self {
        Self {
            kind,
            amplitude: Vec3::ZERO,
            scale: Vec3::ONE,
            offset: Vec4::ZERO,
            offset_speed: Vec4::ZERO,
        }
    }

    pub fn amplitude(mut self, amplitude: Vec3) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn offset(mut self, offset: Vec4) -> Self {
        self.offset = offset;
        self
    }

    pub fn offset_speed(mut self, speed: Vec4) -> Self {
        self.offset_speed = speed;
        self
    }
}

/// Source of the emitter velocity that spawned particles may inherit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VelocitySource {
    /// Velocity supplied by an external rigid body (zero when none is attached).
    #[default]
    Rigidbody,
    /// Frame-over-frame displacement of the emitter transform.
    Transform,
}

/// How the Spawn dispatch is sized each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpawnSizing {
    /// Read the free-slot count back every tick and size Spawn exactly.
    /// This stalls the host until the device catches up.
    #[default]
    Readback,
    /// Never read back: size Spawn from the budget (bounded by capacity) and
    /// let the kernel stop at an empty dead-list.
    WorstCase,
}

/// How much of the pool the Update dispatch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateExtent {
    /// Every slot, every tick. Fixed cost.
    #[default]
    FullPool,
    /// Slots below the highest index ever spawned. Sized on the device after
    /// Spawn, so no extra readback.
    HighWater,
}

/// Colour-over-velocity ramp with the speed that maps to the ramp's end.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityColor {
    pub gradient: Gradient,
    pub range: f32,
}

/// Full simulation configuration.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of particle slots in the pool.
    pub capacity: u32,
    /// Particles requested per tick (the spawn budget).
    pub emission: u32,
    pub mass: Range<f32>,
    /// Per-tick velocity retention (1.0 = no drag).
    pub momentum: Range<f32>,
    /// Seconds until death.
    pub lifespan: Range<f32>,
    /// Ticks run with `fixed_dt` before the first visible tick.
    pub prewarm_frames: u32,
    /// Fixed timestep in seconds.
    pub fixed_dt: f32,
    /// Upper bound on fixed steps taken by one `advance` call.
    pub max_steps_per_advance: u32,
    /// Multiplier on the emitter velocity added to spawned particles.
    pub inherit_velocity: f32,
    pub velocity_source: VelocitySource,
    pub gravity: Vec3,
    pub gravity_modifier: f32,
    pub shape: EmissionShape,
    pub emission_size: Vec3,
    /// 0 = spawn on the shape's surface, 1 = anywhere in its volume.
    pub scatter_volume: f32,
    pub initial_speed: f32,
    /// Random velocity added on spawn.
    pub jitter: f32,
    /// Blend from the shape direction towards a random direction.
    pub randomize_direction: f32,
    /// Fraction of a full turn used for the random spawn rotation.
    pub randomize_rotation: f32,
    pub particle_scale: Vec3,
    /// Spawn colour. HDR values are allowed.
    pub start_color: Vec4,
    pub size_over_life: Option<Curve>,
    pub color_over_life: Option<Gradient>,
    pub color_over_velocity: Option<VelocityColor>,
    pub noise: Option<NoiseConfig>,
    pub emission_mesh: Option<SourceMesh>,
    pub mesh_transform: Mat4,
    pub spawn_sizing: SpawnSizing,
    pub update_extent: UpdateExtent,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_CAPACITY,
            emission: 65_000,
            mass: 0.5..0.5,
            momentum: 0.95..0.95,
            lifespan: 5.0..5.0,
            prewarm_frames: 0,
            fixed_dt: 0.02,
            max_steps_per_advance: 8,
            inherit_velocity: 0.0,
            velocity_source: VelocitySource::Rigidbody,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            gravity_modifier: 0.0,
            shape: EmissionShape::Sphere,
            emission_size: Vec3::ONE,
            scatter_volume: 0.0,
            initial_speed: 0.0,
            jitter: 0.0,
            randomize_direction: 0.0,
            randomize_rotation: 0.0,
            particle_scale: Vec3::ONE,
            start_color: Vec4::ONE,
            size_over_life: None,
            color_over_life: None,
            color_over_velocity: None,
            noise: None,
            emission_mesh: None,
            mesh_transform: Mat4::IDENTITY,
            spawn_sizing: SpawnSizing::Readback,
            update_extent: UpdateExtent::FullPool,
        }
    }
}

impl SimulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of particle slots.
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the number of particles requested per tick.
    pub fn with_emission(mut self, emission: u32) -> Self {
        self.emission = emission;
        self
    }

    pub fn with_mass(mut self, mass: Range<f32>) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_momentum(mut self, momentum: Range<f32>) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_lifespan(mut self, lifespan: Range<f32>) -> Self {
        self.lifespan = lifespan;
        self
    }

    pub fn with_prewarm(mut self, frames: u32) -> Self {
        self.prewarm_frames = frames;
        self
    }

    pub fn with_fixed_dt(mut self, dt: f32) -> Self {
        self.fixed_dt = dt;
        self
    }

    pub fn with_inherit_velocity(mut self, multiplier: f32, source: VelocitySource) -> Self {
        self.inherit_velocity = multiplier;
        self.velocity_source = source;
        self
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_gravity_modifier(mut self, modifier: f32) -> Self {
        self.gravity_modifier = modifier;
        self
    }

    pub fn with_shape(mut self, shape: EmissionShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_emission_size(mut self, size: Vec3) -> Self {
        self.emission_size = size;
        self
    }

    pub fn with_scatter_volume(mut self, scatter: f32) -> Self {
        self.scatter_volume = scatter;
        self
    }

    pub fn with_initial_speed(mut self, speed: f32) -> Self {
        self.initial_speed = speed;
        self
    }

    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_randomize_direction(mut self, amount: f32) -> Self {
        self.randomize_direction = amount;
        self
    }

    pub fn with_randomize_rotation(mut self, amount: f32) -> Self {
        self.randomize_rotation = amount;
        self
    }

    pub fn with_particle_scale(mut self, scale: Vec3) -> Self {
        self.particle_scale = scale;
        self
    }

    pub fn with_start_color(mut self, color: Vec4) -> Self {
        self.start_color = color;
        self
    }

    pub fn with_size_over_life(mut self, curve: Curve) -> Self {
        self.size_over_life = Some(curve);
        self
    }

    pub fn with_color_over_life(mut self, gradient: Gradient) -> Self {
        self.color_over_life = Some(gradient);
        self
    }

    pub fn with_color_over_velocity(mut self, gradient: Gradient, range: f32) -> Self {
        self.color_over_velocity = Some(VelocityColor { gradient, range });
        self
    }

    pub fn with_noise(mut self, noise: NoiseConfig) -> Self {
        self.noise = Some(noise);
        self
    }

    /// Emit from a mesh surface. Also switches the shape to [`EmissionShape::Mesh`].
    pub fn with_emission_mesh(mut self, mesh: SourceMesh, transform: Mat4) -> Self {
        self.emission_mesh = Some(mesh);
        self.mesh_transform = transform;
        self.shape = EmissionShape::Mesh;
        self
    }

    pub fn with_spawn_sizing(mut self, sizing: SpawnSizing) -> Self {
        self.spawn_sizing = sizing;
        self
    }

    pub fn with_update_extent(mut self, extent: UpdateExtent) -> Self {
        self.update_extent = extent;
        self
    }

    /// Check the configuration before any device resource is created.
    pub fn validate(&self) -> Result<(), DustError> {
        if self.capacity == 0 {
            return Err(DustError::ZeroCapacity);
        }
        if self.capacity > MAX_CAPACITY {
            return Err(DustError::CapacityTooLarge {
                requested: self.capacity,
                max: MAX_CAPACITY,
            });
        }
        for (name, range) in [
            ("mass", &self.mass),
            ("momentum", &self.momentum),
            ("lifespan", &self.lifespan),
        ] {
            if range.start > range.end || !range.start.is_finite() || !range.end.is_finite() {
                return Err(DustError::InvalidConfig(format!(
                    "{} range {:?} is inverted or not finite",
                    name, range
                )));
            }
        }
        if self.lifespan.start <= 0.0 {
            return Err(DustError::InvalidConfig("lifespan must be positive".into()));
        }
        if !(self.fixed_dt > 0.0) {
            return Err(DustError::InvalidConfig(format!(
                "fixed_dt must be positive, got {}",
                self.fixed_dt
            )));
        }
        if self.shape == EmissionShape::Mesh && self.emission_mesh.is_none() {
            return Err(DustError::InvalidConfig(
                "mesh emission selected without an emission mesh".into(),
            ));
        }
        if let Some(velocity) = &self.color_over_velocity {
            if !(velocity.range > 0.0) {
                return Err(DustError::InvalidConfig(
                    "color-over-velocity range must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}
