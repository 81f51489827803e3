//! Per-tick uniform snapshot.
//!
//! [`SimParams`] is built once per tick from the configuration and the
//! emitter state, then passed by reference to Spawn and Update. Nothing
//! mutates it after the spawn count is filled in, so both kernels of a tick
//! observe identical parameters.
//!
//! The layout is vec4-packed so the host struct, the WGSL uniform and the
//! std140 rules agree without hidden padding.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::config::SimulationConfig;
use crate::GpuStruct;

/// `counts[3]` bit: noise displacement enabled.
pub const FLAG_NOISE: u32 = 1;
/// `counts[3]` bit: emit from the captured mesh.
pub const FLAG_MESH: u32 = 2;

/// Uniform block shared by every kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable, GpuStruct)]
pub struct SimParams {
    /// `[dt, time, velocity_color_range, 0]`
    pub time_params: [f32; 4],
    /// `[capacity, spawn_count, frame, flags]`
    pub counts: [u32; 4],
    /// `[shape, noise_kind, mesh_vertex_count, mesh_triangle_count]`
    pub selectors: [u32; 4],
    pub origin: [f32; 4],
    /// `[mass_min, mass_max, momentum_min, momentum_max]`
    pub mass_momentum: [f32; 4],
    /// `[lifespan_min, lifespan_max, gravity_modifier, inherit_velocity]`
    pub lifespan_gravity: [f32; 4],
    pub emitter_velocity: [f32; 4],
    pub gravity: [f32; 4],
    /// `xyz` = emission size, `w` = scatter volume
    pub emission_size: [f32; 4],
    /// `[initial_speed, jitter, randomize_direction, randomize_rotation]`
    pub motion: [f32; 4],
    pub start_color: [f32; 4],
    pub particle_scale: [f32; 4],
    pub noise_amplitude: [f32; 4],
    pub noise_scale: [f32; 4],
    pub noise_offset: [f32; 4],
    pub noise_offset_speed: [f32; 4],
    pub mesh_matrix: [[f32; 4]; 4],
    pub mesh_normal_matrix: [[f32; 4]; 4],
}

/// Emitter state sampled at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInputs {
    pub dt: f32,
    pub time: f32,
    pub frame: u32,
    pub origin: Vec3,
    /// Velocity inherited by spawned particles (before the multiplier).
    pub emitter_velocity: Vec3,
    pub velocity_color_range: f32,
    pub mesh: Option<MeshUniforms>,
}

/// Mesh emission values pushed alongside the other uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshUniforms {
    pub matrix: Mat4,
    pub normal_matrix: Mat4,
    pub vertex_count: u32,
    pub triangle_count: u32,
}

impl SimParams {
    /// Build the snapshot for one tick. The spawn count starts at zero.
    pub fn snapshot(config: &SimulationConfig, inputs: &FrameInputs) -> Self {
        let mut flags = 0;
        let (noise_kind, amplitude, scale, offset, offset_speed) = match &config.noise {
            Some(noise) => {
                flags |= FLAG_NOISE;
                (
                    noise.kind.selector(),
                    noise.amplitude.extend(0.0),
                    noise.scale.extend(0.0),
                    noise.offset,
                    noise.offset_speed,
                )
            }
            None => Default::default(),
        };

        let (mesh_matrix, mesh_normal_matrix, vertex_count, triangle_count) = match inputs.mesh {
            Some(mesh) => {
                flags |= FLAG_MESH;
                (mesh.matrix, mesh.normal_matrix, mesh.vertex_count, mesh.triangle_count)
            }
            None => (Mat4::IDENTITY, Mat4::IDENTITY, 0, 0),
        };

        Self {
            time_params: [inputs.dt, inputs.time, inputs.velocity_color_range, 0.0],
            counts: [config.capacity, 0, inputs.frame, flags],
            selectors: [config.shape.selector(), noise_kind, vertex_count, triangle_count],
            origin: inputs.origin.extend(1.0).to_array(),
            mass_momentum: [
                config.mass.start,
                config.mass.end,
                config.momentum.start,
                config.momentum.end,
            ],
            lifespan_gravity: [
                config.lifespan.start,
                config.lifespan.end,
                config.gravity_modifier,
                config.inherit_velocity,
            ],
            emitter_velocity: inputs.emitter_velocity.extend(0.0).to_array(),
            gravity: config.gravity.extend(0.0).to_array(),
            emission_size: config.emission_size.extend(config.scatter_volume).to_array(),
            motion: [
                config.initial_speed,
                config.jitter,
                config.randomize_direction,
                config.randomize_rotation,
            ],
            start_color: config.start_color.to_array(),
            particle_scale: config.particle_scale.extend(0.0).to_array(),
            noise_amplitude: amplitude.to_array(),
            noise_scale: scale.to_array(),
            noise_offset: offset.to_array(),
            noise_offset_speed: offset_speed.to_array(),
            mesh_matrix: mesh_matrix.to_cols_array_2d(),
            mesh_normal_matrix: mesh_normal_matrix.to_cols_array_2d(),
        }
    }

    /// Parameters for the Init kernel, which only reads the capacity.
    pub fn for_init(capacity: u32) -> Self {
        Self {
            counts: [capacity, 0, 0, 0],
            mesh_matrix: Mat4::IDENTITY.to_cols_array_2d(),
            mesh_normal_matrix: Mat4::IDENTITY.to_cols_array_2d(),
            ..Self::zeroed()
        }
    }

    /// The same snapshot with the number of particles Spawn may create.
    pub fn with_spawn_count(mut self, count: u32) -> Self {
        self.counts[1] = count;
        self
    }

    #[inline]
    pub fn dt(&self) -> f32 {
        self.time_params[0]
    }

    #[inline]
    pub fn time(&self) -> f32 {
        self.time_params[1]
    }

    #[inline]
    pub fn velocity_color_range(&self) -> f32 {
        self.time_params[2]
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.counts[0]
    }

    #[inline]
    pub fn spawn_count(&self) -> u32 {
        self.counts[1]
    }

    #[inline]
    pub fn frame(&self) -> u32 {
        self.counts[2]
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.counts[3]
    }

    pub fn noise_enabled(&self) -> bool {
        self.flags() & FLAG_NOISE != 0
    }

    pub fn mesh_enabled(&self) -> bool {
        self.flags() & FLAG_MESH != 0
    }
}
