//! The device-resident particle record.
//!
//! Every slot of the pool holds one [`Particle`]. The layout is shared
//! verbatim with the WGSL kernels (`#[derive(GpuStruct)]` checks it at
//! compile time), so the struct carries explicit padding and no Rust-only
//! types.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::GpuStruct;

/// One particle slot.
///
/// | Field | Meaning |
/// |-------|---------|
/// | `position`, `velocity` | world-space state |
/// | `age`, `lifespan` | seconds since spawn / seconds until death |
/// | `color`, `start_color` | current (ramp-modulated) and spawn colour |
/// | `scale` | non-uniform size |
/// | `mass`, `momentum` | drawn from configured ranges at spawn |
/// | `rotation` | orientation transform |
/// | `alive` | 1 = active, 0 = free (listed in the dead-list) |
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable, GpuStruct)]
pub struct Particle {
    pub position: [f32; 3],
    pub age: f32,
    pub velocity: [f32; 3],
    pub lifespan: f32,
    pub color: [f32; 4],
    pub start_color: [f32; 4],
    pub scale: [f32; 3],
    pub mass: f32,
    pub rotation: [[f32; 4]; 4],
    pub momentum: f32,
    pub alive: u32,
    pub _pad: [f32; 2],
}

impl Particle {
    /// Size of one record in the particle buffer.
    pub const STRIDE: u64 = std::mem::size_of::<Particle>() as u64;

    /// The record written by the Init kernel: inactive, identity rotation.
    pub fn dead() -> Self {
        Self {
            rotation: Mat4::IDENTITY.to_cols_array_2d(),
            ..Self::zeroed()
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.alive != 0
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    #[inline]
    pub fn velocity(&self) -> Vec3 {
        Vec3::from_array(self.velocity)
    }

    #[inline]
    pub fn color(&self) -> Vec4 {
        Vec4::from_array(self.color)
    }

    /// Normalized age in `[0, 1]`, the lookup coordinate for life ramps.
    pub fn life_fraction(&self) -> f32 {
        if self.lifespan > 0.0 {
            (self.age / self.lifespan).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

impl Default for Particle {
    fn default() -> Self {
        Self::dead()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_particle_stride_is_160_bytes() {
        assert_eq!(Particle::STRIDE, 160);
        assert_eq!(Particle::WGSL_SIZE, 160);
    }

    #[test]
    fn test_particle_wgsl_struct() {
        let wgsl = Particle::WGSL_STRUCT;
        assert!(wgsl.starts_with("struct Particle {"));
        assert!(wgsl.contains("position: vec3<f32>,"));
        assert!(wgsl.contains("rotation: mat4x4<f32>,"));
        assert!(wgsl.contains("alive: u32,"));
        assert!(wgsl.contains("_pad: vec2<f32>,"));
    }

    #[test]
    fn test_dead_particle() {
        let p = Particle::dead();
        assert!(!p.is_active());
        assert_eq!(p.rotation, Mat4::IDENTITY.to_cols_array_2d());
        assert_eq!(p.life_fraction(), 1.0);
    }
}
