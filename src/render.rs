//! Renderer variants.
//!
//! Renderers only read the particle buffer. Each frame a renderer refreshes
//! its bindings from the pool ([`Renderer::update_bindings`]) and then
//! describes the draw it would submit ([`Renderer::draw`]). Pipelines and
//! materials belong to the host application, which binds the handle from
//! [`ParticlePool::buffers`] read-only next to these values.
//!
//! | Variant | Draw |
//! |---------|------|
//! | [`Renderer::Points`] | one point per pool slot, dead records culled in the vertex stage |
//! | [`Renderer::Instanced`] | indirect indexed draw of one mesh per particle |
//! | [`Renderer::Mesh`] | the emission mesh itself |

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use log::debug;

use crate::error::DustError;
use crate::kernel::Backend;
use crate::pool::ParticlePool;

/// Indexed indirect draw arguments, as read by `draw_indexed_indirect`.
///
/// Distinct from [`DispatchArgs`](crate::DispatchArgs): five words, and only
/// ever consumed by draw calls.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    pub index_count_per_instance: u32,
    pub instance_count: u32,
    pub start_index: u32,
    pub base_vertex: u32,
    pub start_instance: u32,
}

impl DrawIndirectArgs {
    pub const SIZE: u64 = std::mem::size_of::<DrawIndirectArgs>() as u64;

    pub fn new(index_count_per_instance: u32, instance_count: u32) -> Self {
        Self {
            index_count_per_instance,
            instance_count,
            ..Self::zeroed()
        }
    }

    pub fn to_array(self) -> [u32; 5] {
        bytemuck::cast(self)
    }
}

/// Values a renderer's material reads each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderBindings {
    /// Records in the bound particle buffer.
    pub capacity: u32,
    /// Particles requested per tick.
    pub num_particles: u32,
    /// Instances the draw covers (instanced renderer only).
    pub num_instances: u32,
    pub scale: Vec3,
}

/// A draw as it would be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCall {
    /// Non-indexed point list.
    Points { vertex_count: u32 },
    /// Indexed draw with arguments taken from the indirect buffer.
    IndexedIndirect { args: DrawIndirectArgs },
    /// Plain indexed draw.
    Indexed { index_count: u32 },
}

/// The closed set of particle renderers.
#[derive(Debug, Clone, PartialEq)]
pub enum Renderer {
    Points {
        bindings: Option<RenderBindings>,
    },
    Instanced {
        index_count: u32,
        /// Requested instances, before clamping to the emission budget.
        instance_count: u32,
        scale: Vec3,
        args: Option<DrawIndirectArgs>,
        uploads: u64,
        bindings: Option<RenderBindings>,
    },
    Mesh {
        index_count: u32,
        bindings: Option<RenderBindings>,
    },
}

impl Renderer {
    pub fn points() -> Self {
        Renderer::Points { bindings: None }
    }

    /// One instance of a mesh with `index_count` indices per particle.
    pub fn instanced(index_count: u32, instance_count: u32) -> Self {
        Renderer::Instanced {
            index_count,
            instance_count,
            scale: Vec3::ONE,
            args: None,
            uploads: 0,
            bindings: None,
        }
    }

    pub fn mesh(index_count: u32) -> Self {
        Renderer::Mesh {
            index_count,
            bindings: None,
        }
    }

    /// Set the requested instance count. Ignored by other variants.
    pub fn set_instance_count(&mut self, count: u32) {
        if let Renderer::Instanced { instance_count, .. } = self {
            *instance_count = count;
        }
    }

    pub fn set_scale(&mut self, value: Vec3) {
        if let Renderer::Instanced { scale, .. } = self {
            *scale = value;
        }
    }

    /// Refresh bindings for this frame from `pool`.
    ///
    /// Fails when the pool holds no live buffers. The instanced renderer
    /// clamps its instance count to `emission` and returns the new indirect
    /// arguments only when they changed, i.e. when the caller must re-upload
    /// its argument buffer.
    pub fn update_bindings<B: Backend>(
        &mut self,
        pool: &ParticlePool<B>,
        emission: u32,
    ) -> Result<Option<DrawIndirectArgs>, DustError> {
        pool.buffers()?;
        let capacity = pool.capacity();
        match self {
            Renderer::Points { bindings } | Renderer::Mesh { bindings, .. } => {
                *bindings = Some(RenderBindings {
                    capacity,
                    num_particles: emission,
                    num_instances: 0,
                    scale: Vec3::ONE,
                });
                Ok(None)
            }
            Renderer::Instanced {
                index_count,
                instance_count,
                scale,
                args,
                uploads,
                bindings,
            } => {
                *bindings = Some(RenderBindings {
                    capacity,
                    num_particles: emission,
                    num_instances: *instance_count,
                    scale: *scale,
                });
                let wanted = DrawIndirectArgs::new(*index_count, (*instance_count).min(emission));
                if *args == Some(wanted) {
                    return Ok(None);
                }
                *args = Some(wanted);
                *uploads += 1;
                debug!("Instanced draw args: {:?}", wanted.to_array());
                Ok(Some(wanted))
            }
        }
    }

    pub fn bindings(&self) -> Option<RenderBindings> {
        match self {
            Renderer::Points { bindings, .. }
            | Renderer::Instanced { bindings, .. }
            | Renderer::Mesh { bindings, .. } => *bindings,
        }
    }

    /// Indirect argument uploads so far. Zero for non-instanced variants.
    pub fn upload_count(&self) -> u64 {
        match self {
            Renderer::Instanced { uploads, .. } => *uploads,
            _ => 0,
        }
    }

    /// The draw for this frame. Fails before the first
    /// [`update_bindings`](Self::update_bindings).
    pub fn draw(&self) -> Result<DrawCall, DustError> {
        let bindings = self
            .bindings()
            .ok_or(DustError::NotInitialized("renderer bindings"))?;
        match self {
            Renderer::Points { .. } => Ok(DrawCall::Points {
                vertex_count: bindings.capacity,
            }),
            Renderer::Instanced { args, .. } => args
                .map(|args| DrawCall::IndexedIndirect { args })
                .ok_or(DustError::NotInitialized("draw indirect args")),
            Renderer::Mesh { index_count, .. } => Ok(DrawCall::Indexed {
                index_count: *index_count,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::host::HostBackend;
    use crate::Simulation;

    fn sim(capacity: u32) -> Simulation<HostBackend> {
        let config = SimulationConfig::new().with_capacity(capacity).with_emission(0);
        Simulation::new(HostBackend::new(), config).unwrap()
    }

    #[test]
    fn test_draw_args_layout() {
        assert_eq!(DrawIndirectArgs::SIZE, 20);
        assert_eq!(DrawIndirectArgs::new(36, 100).to_array(), [36, 100, 0, 0, 0]);
    }

    #[test]
    fn test_instanced_clamps_to_emission() {
        let sim = sim(1024);
        let mut renderer = Renderer::instanced(36, 1000);
        let args = renderer.update_bindings(sim.pool(), 250).unwrap().unwrap();
        assert_eq!(args.to_array(), [36, 250, 0, 0, 0]);
        assert_eq!(renderer.draw().unwrap(), DrawCall::IndexedIndirect { args });
    }

    #[test]
    fn test_instanced_uploads_only_on_change() {
        let sim = sim(1024);
        let pool = sim.pool();
        let mut renderer = Renderer::instanced(6, 100);
        assert!(renderer.update_bindings(pool, 500).unwrap().is_some());
        assert!(renderer.update_bindings(pool, 500).unwrap().is_none());
        // Clamped value unchanged.
        assert!(renderer.update_bindings(pool, 400).unwrap().is_none());
        assert_eq!(renderer.upload_count(), 1);

        renderer.set_instance_count(50);
        assert_eq!(renderer.update_bindings(pool, 400).unwrap().unwrap().instance_count, 50);
        assert_eq!(renderer.upload_count(), 2);
    }

    #[test]
    fn test_points_draw_whole_pool() {
        let sim = sim(4096);
        let mut renderer = Renderer::points();
        assert!(renderer.draw().is_err());
        assert!(renderer.update_bindings(sim.pool(), 650).unwrap().is_none());
        assert_eq!(renderer.draw().unwrap(), DrawCall::Points { vertex_count: 4096 });

        let bindings = renderer.bindings().unwrap();
        assert_eq!(bindings.capacity, 4096);
        assert_eq!(bindings.num_particles, 650);
    }

    #[test]
    fn test_released_pool_cannot_be_bound() {
        let mut sim = sim(256);
        sim.teardown();
        let mut renderer = Renderer::points();
        assert!(matches!(
            renderer.update_bindings(sim.pool(), 10),
            Err(DustError::Released(_))
        ));
        assert!(renderer.draw().is_err());
    }

    #[test]
    fn test_mesh_draw() {
        let sim = sim(256);
        let mut renderer = Renderer::mesh(36);
        renderer.update_bindings(sim.pool(), 10).unwrap();
        assert_eq!(renderer.draw().unwrap(), DrawCall::Indexed { index_count: 36 });
        assert_eq!(renderer.bindings().unwrap().capacity, 256);
    }
}
