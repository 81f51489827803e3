//! # Dust - GPU particle pools
//!
//! Large-capacity particle simulation (up to 1,048,576 particles) whose state
//! lives entirely in device buffers. The host never touches individual
//! particles; it sizes indirect dispatches, uploads emission data and
//! submits three compute kernels per tick.
//!
//! ## Quick Start
//!
//! ```ignore
//! use dust::prelude::*;
//!
//! fn main() -> Result<(), DustError> {
//!     let backend = GpuBackend::new()?;
//!     let config = SimulationConfig::new()
//!         .with_capacity(262_144)
//!         .with_emission(4_000)
//!         .with_lifespan(2.0..4.0)
//!         .with_initial_speed(1.5);
//!
//!     let mut sim = Simulation::new(backend, config)?;
//!     for _ in 0..100 {
//!         sim.step()?;
//!     }
//!     println!("free slots: {}", sim.free_count()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### The pool
//!
//! A [`ParticlePool`] is a fixed array of [`Particle`] slots plus a device
//! side *dead-list*: a stack of free slot indices with an atomic counter.
//! Spawning pops indices, dying pushes them back. At every tick boundary
//! `dead_count + live == capacity`.
//!
//! ### Dispatch sizing
//!
//! Kernels run on 16×16 thread groups. To cover `n` items the host writes
//! indirect arguments `[g, g, 1]` with `g = ceil(sqrt(n) / 16)`, so a full
//! 1M pool is a 64×64 grid. See [`dispatch`].
//!
//! ### Backends
//!
//! The kernel contract is executed by a [`Backend`]:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`GpuBackend`] | wgpu compute pipelines, headless |
//! | [`HostBackend`] | deterministic CPU executor over the same group grid |
//!
//! ### Per-tick flow
//!
//! 1. Snapshot the uniforms ([`SimParams`]).
//! 2. Size the Spawn dispatch from the free count and the emission budget,
//!    or skip it entirely when nothing can spawn.
//! 3. Dispatch Update over the pool.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod gpu;
pub mod host;
pub mod kernel;
pub mod mesh;
pub mod params;
pub mod particle;
pub mod pool;
pub mod ramp;
pub mod render;
pub mod shader_utils;
mod simulation;
pub mod time;

// Lets `#[derive(GpuStruct)]` refer to `dust::GpuStruct` from inside this crate.
extern crate self as dust;

pub use bytemuck;
pub use config::{
    EmissionShape, NoiseConfig, NoiseKind, SimulationConfig, SpawnSizing, UpdateExtent,
    VelocitySource,
};
pub use dispatch::{DispatchArgBuilder, DispatchArgs, DispatchDecision, SpawnDispatch};
pub use dust_derive::GpuStruct;
pub use error::{DustError, GpuError};
pub use glam::{Mat4, Vec3, Vec4};
pub use gpu::GpuBackend;
pub use host::HostBackend;
pub use kernel::{Backend, Kernel};
pub use mesh::{MeshSampler, MeshVertex, SourceMesh};
pub use params::SimParams;
pub use particle::Particle;
pub use pool::{ParticlePool, MAX_CAPACITY};
pub use ramp::{Curve, Gradient, RampSet};
pub use render::{DrawIndirectArgs, Renderer};
pub use simulation::{Simulation, SpawnOutcome, TickReport};

/// Trait implemented by `#[derive(GpuStruct)]`.
///
/// Ties a `#[repr(C)]` host struct to the WGSL struct the kernels declare.
/// The derive also asserts at compile time that every field sits at the
/// offset WGSL expects, so a buffer written from the host is read back
/// field for field on the device.
///
/// # Do Not Implement Manually
///
/// A hand-written impl skips the layout assertions.
pub trait GpuStruct {
    /// Name of the WGSL struct.
    const WGSL_NAME: &'static str;

    /// Complete WGSL `struct` declaration.
    const WGSL_STRUCT: &'static str;

    /// Size of the struct in WGSL storage/uniform layout.
    const WGSL_SIZE: usize;
}

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use dust::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{
        EmissionShape, NoiseConfig, NoiseKind, SimulationConfig, SpawnSizing, UpdateExtent,
        VelocitySource,
    };
    pub use crate::error::{DustError, GpuError};
    pub use crate::gpu::GpuBackend;
    pub use crate::host::HostBackend;
    pub use crate::kernel::Backend;
    pub use crate::mesh::SourceMesh;
    pub use crate::particle::Particle;
    pub use crate::ramp::{Curve, Gradient};
    pub use crate::render::Renderer;
    pub use crate::simulation::{Simulation, TickReport};
    pub use crate::{Mat4, Vec3, Vec4};
}
