//! wgpu executor of the kernel contract.
//!
//! [`GpuBackend`] owns a headless device and one compute pipeline per
//! [`Kernel`], all built when the backend is created. A pipeline that fails
//! validation (bad source or missing entry point) is reported as
//! [`GpuError::MissingKernel`] instead of surfacing later as a dispatch of
//! nothing.
//!
//! Every dispatch is indirect: the grid is read from an argument buffer
//! written by the host ([`DispatchArgBuilder`](crate::DispatchArgBuilder))
//! or by the SizeUpdate kernel. Readbacks go through a mapped staging
//! buffer and block until the queue is idle.

pub mod shaders;

use std::sync::mpsc;

use bytemuck::Zeroable;
use log::{debug, info};
use wgpu::util::DeviceExt;

use crate::dispatch::DispatchArgs;
use crate::error::{DustError, GpuError};
use crate::kernel::{Backend, Kernel, RampBindings};
use crate::mesh::MeshVertex;
use crate::params::SimParams;
use crate::particle::Particle;
use crate::ramp::{RampKind, RampTexels, RAMP_WIDTH};

pub use shaders::{kernel_source, COUNTERS_SIZE};

/// Particle buffer, dead-list, counters and the uniform block of one pool.
pub struct GpuPool {
    particles: wgpu::Buffer,
    dead_list: wgpu::Buffer,
    counters: wgpu::Buffer,
    params: wgpu::Buffer,
    capacity: u32,
}

impl GpuPool {
    /// The particle buffer, for binding as a vertex or read-only storage buffer.
    pub fn particle_buffer(&self) -> &wgpu::Buffer {
        &self.particles
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

pub struct GpuArgs {
    buffer: wgpu::Buffer,
    /// Last value written by the host. `None` once a kernel wrote it.
    host_value: Option<DispatchArgs>,
}

impl GpuArgs {
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

pub struct GpuMesh {
    vertices: wgpu::Buffer,
    triangles: wgpu::Buffer,
}

pub struct GpuRamp {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct KernelPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

/// Headless wgpu backend.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    init: KernelPipeline,
    spawn: KernelPipeline,
    update: KernelPipeline,
    size_update: KernelPipeline,
    // Bound to Spawn when no emission mesh is captured.
    empty_vertices: wgpu::Buffer,
    empty_triangles: wgpu::Buffer,
    storage_limit: u64,
}

impl GpuBackend {
    /// Create the device and build every kernel. Blocks.
    pub fn new() -> Result<Self, DustError> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self, DustError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        // A full pool is 160 MB, above the default storage binding limit.
        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Dust Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(GpuError::from)?;

        let storage_limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        info!(
            "Using {} ({:?}), storage binding limit {} MB",
            adapter.get_info().name,
            adapter.get_info().backend,
            storage_limit / (1024 * 1024)
        );

        let init = build_kernel(&device, Kernel::Init).await?;
        let spawn = build_kernel(&device, Kernel::Spawn).await?;
        let update = build_kernel(&device, Kernel::Update).await?;
        let size_update = build_kernel(&device, Kernel::SizeUpdate).await?;

        let empty_vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Empty Mesh Vertices"),
            contents: bytemuck::bytes_of(&MeshVertex::zeroed()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let empty_triangles = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Empty Mesh Triangles"),
            contents: bytemuck::cast_slice(&[0u32; 3]),
            usage: wgpu::BufferUsages::STORAGE,
        });

        Ok(Self {
            device,
            queue,
            init,
            spawn,
            update,
            size_update,
            empty_vertices,
            empty_triangles,
            storage_limit,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn kernel(&self, kernel: Kernel) -> &KernelPipeline {
        match kernel {
            Kernel::Init => &self.init,
            Kernel::Spawn => &self.spawn,
            Kernel::Update => &self.update,
            Kernel::SizeUpdate => &self.size_update,
        }
    }

    fn check_grid(kernel: Kernel, args: &GpuArgs) -> Result<(), DustError> {
        match args.host_value {
            Some(grid) if grid.is_empty() => Err(DustError::DegenerateDispatch(kernel)),
            _ => Ok(()),
        }
    }

    fn pool_entries<'a>(pool: &'a GpuPool) -> [wgpu::BindGroupEntry<'a>; 4] {
        [
            wgpu::BindGroupEntry { binding: 0, resource: pool.particles.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 1, resource: pool.dead_list.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 2, resource: pool.counters.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 3, resource: pool.params.as_entire_binding() },
        ]
    }

    /// Encode and submit one indirect dispatch.
    fn submit(&self, kernel: Kernel, entries: &[wgpu::BindGroupEntry], indirect: Option<&wgpu::Buffer>) {
        let k = self.kernel(kernel);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.entry_point()),
            layout: &k.layout,
            entries,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(kernel.entry_point()),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.entry_point()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&k.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            match indirect {
                Some(args) => pass.dispatch_workgroups_indirect(args, 0),
                None => pass.dispatch_workgroups(1, 1, 1),
            }
        }
        self.queue.submit(Some(encoder.finish()));
    }

    /// Copy `size` bytes of `src` into a staging buffer and map it. Blocks.
    fn read_buffer(&self, src: &wgpu::Buffer, size: u64) -> Result<Vec<u8>, DustError> {
        if size == 0 {
            return Ok(Vec::new());
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        staging.destroy();
        Ok(data)
    }

    fn read_dead_count(&self, pool: &GpuPool) -> Result<i32, DustError> {
        let bytes = self.read_buffer(&pool.counters, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

// Float32 ramps are read with textureLoad, so no filtering is required.
fn ramp_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn layout_entries(kernel: Kernel) -> Vec<wgpu::BindGroupLayoutEntry> {
    let pool = vec![
        storage_entry(0, false),
        storage_entry(1, false),
        storage_entry(2, false),
        uniform_entry(3),
    ];
    match kernel {
        Kernel::Init => pool,
        Kernel::Spawn => [pool, vec![storage_entry(4, true), storage_entry(5, true)]].concat(),
        Kernel::Update => [pool, vec![ramp_entry(4), ramp_entry(5), ramp_entry(6)]].concat(),
        Kernel::SizeUpdate => vec![storage_entry(0, false), storage_entry(1, false)],
    }
}

async fn build_kernel(device: &wgpu::Device, kernel: Kernel) -> Result<KernelPipeline, DustError> {
    let label = kernel.entry_point();
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(shaders::kernel_source(kernel).into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &layout_entries(kernel),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some(label),
        compilation_options: Default::default(),
        cache: None,
    });

    if let Some(error) = device.pop_error_scope().await {
        return Err(GpuError::MissingKernel {
            kernel,
            message: error.to_string(),
        }
        .into());
    }
    debug!("Built compute pipeline '{}'", label);
    Ok(KernelPipeline { pipeline, layout })
}

impl Backend for GpuBackend {
    type Pool = GpuPool;
    type Args = GpuArgs;
    type Mesh = GpuMesh;
    type Ramp = GpuRamp;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_pool(&mut self, capacity: u32) -> Result<GpuPool, DustError> {
        let size = capacity as u64 * Particle::STRIDE;
        if size > self.storage_limit {
            return Err(GpuError::BufferTooLarge {
                size,
                limit: self.storage_limit,
            }
            .into());
        }

        // wgpu zero-initializes new buffers.
        let particles = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Buffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let dead_list = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Dead List Buffer"),
            size: capacity as u64 * 4,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let counters = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Dead List Counters"),
            size: COUNTERS_SIZE,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sim Params Buffer"),
            size: std::mem::size_of::<SimParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(GpuPool {
            particles,
            dead_list,
            counters,
            params,
            capacity,
        })
    }

    fn release_pool(&mut self, pool: GpuPool) {
        pool.particles.destroy();
        pool.dead_list.destroy();
        pool.counters.destroy();
        pool.params.destroy();
    }

    fn create_args(&mut self, label: &'static str) -> Result<GpuArgs, DustError> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: DispatchArgs::SIZE,
            usage: wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Ok(GpuArgs {
            buffer,
            host_value: None,
        })
    }

    fn write_args(&mut self, args: &mut GpuArgs, value: DispatchArgs) {
        self.queue.write_buffer(&args.buffer, 0, bytemuck::bytes_of(&value));
        args.host_value = Some(value);
    }

    fn release_args(&mut self, args: GpuArgs) {
        args.buffer.destroy();
    }

    fn create_mesh(&mut self, vertices: &[MeshVertex], triangles: &[u32]) -> Result<GpuMesh, DustError> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        if vertex_bytes.len() as u64 > self.storage_limit {
            return Err(GpuError::BufferTooLarge {
                size: vertex_bytes.len() as u64,
                limit: self.storage_limit,
            }
            .into());
        }
        let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Emission Mesh Vertices"),
            contents: vertex_bytes,
            usage: wgpu::BufferUsages::STORAGE,
        });
        let triangles = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Emission Mesh Triangles"),
            contents: bytemuck::cast_slice(triangles),
            usage: wgpu::BufferUsages::STORAGE,
        });
        Ok(GpuMesh { vertices, triangles })
    }

    fn release_mesh(&mut self, mesh: GpuMesh) {
        mesh.vertices.destroy();
        mesh.triangles.destroy();
    }

    fn create_ramp(&mut self, kind: RampKind) -> Result<GpuRamp, DustError> {
        let format = if kind.is_scalar() {
            wgpu::TextureFormat::R32Float
        } else {
            wgpu::TextureFormat::Rgba32Float
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(kind.label()),
            size: wgpu::Extent3d {
                width: RAMP_WIDTH,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuRamp { texture, view })
    }

    fn write_ramp(&mut self, ramp: &mut GpuRamp, texels: &RampTexels) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &ramp.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            texels.as_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(texels.width() * texels.bytes_per_texel()),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: texels.width(),
                height: 1,
                depth_or_array_layers: 1,
            },
        );
    }

    fn release_ramp(&mut self, ramp: GpuRamp) {
        ramp.texture.destroy();
    }

    fn dispatch_init(&mut self, pool: &mut GpuPool, args: &GpuArgs, params: &SimParams) -> Result<(), DustError> {
        Self::check_grid(Kernel::Init, args)?;
        self.queue.write_buffer(&pool.params, 0, bytemuck::bytes_of(params));
        self.submit(Kernel::Init, &Self::pool_entries(pool), Some(&args.buffer));
        Ok(())
    }

    fn dispatch_spawn(
        &mut self,
        pool: &mut GpuPool,
        args: &GpuArgs,
        mesh: Option<&GpuMesh>,
        params: &SimParams,
    ) -> Result<(), DustError> {
        Self::check_grid(Kernel::Spawn, args)?;
        self.queue.write_buffer(&pool.params, 0, bytemuck::bytes_of(params));

        let (vertices, triangles) = match mesh {
            Some(mesh) => (&mesh.vertices, &mesh.triangles),
            None => (&self.empty_vertices, &self.empty_triangles),
        };
        let [e0, e1, e2, e3] = Self::pool_entries(pool);
        let entries = [
            e0,
            e1,
            e2,
            e3,
            wgpu::BindGroupEntry { binding: 4, resource: vertices.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 5, resource: triangles.as_entire_binding() },
        ];
        self.submit(Kernel::Spawn, &entries, Some(&args.buffer));
        Ok(())
    }

    fn dispatch_size_update(&mut self, pool: &mut GpuPool, update_args: &mut GpuArgs) -> Result<(), DustError> {
        let entries = [
            wgpu::BindGroupEntry { binding: 0, resource: pool.counters.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 1, resource: update_args.buffer.as_entire_binding() },
        ];
        self.submit(Kernel::SizeUpdate, &entries, None);
        update_args.host_value = None;
        Ok(())
    }

    fn dispatch_update(
        &mut self,
        pool: &mut GpuPool,
        args: &GpuArgs,
        ramps: RampBindings<'_, GpuRamp>,
        params: &SimParams,
    ) -> Result<(), DustError> {
        Self::check_grid(Kernel::Update, args)?;
        self.queue.write_buffer(&pool.params, 0, bytemuck::bytes_of(params));

        let [e0, e1, e2, e3] = Self::pool_entries(pool);
        let entries = [
            e0,
            e1,
            e2,
            e3,
            wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::TextureView(&ramps.size_over_life.view),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: wgpu::BindingResource::TextureView(&ramps.color_over_life.view),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: wgpu::BindingResource::TextureView(&ramps.color_over_velocity.view),
            },
        ];
        self.submit(Kernel::Update, &entries, Some(&args.buffer));
        Ok(())
    }

    fn read_free_count(&mut self, pool: &GpuPool) -> Result<u32, DustError> {
        Ok(self.read_dead_count(pool)?.max(0) as u32)
    }

    fn read_particles(&mut self, pool: &GpuPool) -> Result<Vec<Particle>, DustError> {
        let bytes = self.read_buffer(&pool.particles, pool.capacity as u64 * Particle::STRIDE)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    fn read_dead_list(&mut self, pool: &GpuPool) -> Result<Vec<u32>, DustError> {
        let count = (self.read_dead_count(pool)?.max(0) as u32).min(pool.capacity);
        let bytes = self.read_buffer(&pool.dead_list, count as u64 * 4)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    fn read_args(&mut self, args: &GpuArgs) -> Result<DispatchArgs, DustError> {
        let bytes = self.read_buffer(&args.buffer, DispatchArgs::SIZE)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }
}
