//! CPU executor of the kernel contract.
//!
//! [`HostBackend`] runs Init, Spawn, SizeUpdate and Update on the host over
//! the same grid the device would launch: every thread of every 16×16 group
//! computes `idx = gid.y * (groups_x * 16) + gid.x` and does exactly what
//! the WGSL entry point does for that index. The dead-list counter is
//! updated with the same consume/restore and append steps, so the pool
//! protocol can be checked without a GPU.
//!
//! Threads run in index order, which makes every run deterministic. The
//! random stream, emission shapes and noise fields mirror the functions in
//! [`shader_utils`](crate::shader_utils).
//!
//! The backend also keeps a log of every dispatch and counts live resources
//! and argument uploads, which tests use to check that nothing leaks and
//! nothing is uploaded or dispatched twice.

use std::f32::consts::TAU;

use bytemuck::Zeroable;
use glam::{Mat4, Vec3, Vec4};
use log::trace;

use crate::config::{EmissionShape, NoiseKind};
use crate::dispatch::{groups_for_count, DispatchArgs, THREADS_PER_GROUP_EDGE};
use crate::error::{DustError, GpuError};
use crate::kernel::{Backend, Kernel, RampBindings};
use crate::mesh::MeshVertex;
use crate::params::SimParams;
use crate::particle::Particle;
use crate::ramp::{RampKind, RampTexels};

/// Pool storage: records, dead-list and counters.
#[derive(Debug)]
pub struct HostPool {
    particles: Vec<Particle>,
    dead_list: Vec<u32>,
    dead_count: i32,
    high_water: u32,
}

impl HostPool {
    fn capacity(&self) -> u32 {
        self.particles.len() as u32
    }

    /// Pop a free slot. `None` when the list is empty.
    fn consume(&mut self) -> Option<u32> {
        let top = self.dead_count;
        self.dead_count -= 1;
        if top <= 0 {
            self.dead_count += 1;
            return None;
        }
        Some(self.dead_list[(top - 1) as usize])
    }

    fn append(&mut self, slot: u32) {
        let i = self.dead_count;
        self.dead_count += 1;
        if i >= 0 && (i as u32) < self.capacity() {
            self.dead_list[i as usize] = slot;
        }
    }
}

#[derive(Debug)]
pub struct HostArgs {
    label: &'static str,
    value: Option<DispatchArgs>,
}

#[derive(Debug)]
pub struct HostMesh {
    /// 9 floats per vertex, as bound to the Spawn kernel.
    vertices: Vec<f32>,
    triangles: Vec<u32>,
}

#[derive(Debug)]
pub struct HostRamp {
    kind: RampKind,
    texels: RampTexels,
}

/// Deterministic CPU backend.
#[derive(Debug, Default)]
pub struct HostBackend {
    live: usize,
    args_uploads: u64,
    dispatches: Vec<(Kernel, DispatchArgs)>,
    storage_limit: Option<u64>,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse storage buffers larger than `bytes`, as a device binding limit would.
    pub fn with_storage_limit(mut self, bytes: u64) -> Self {
        self.storage_limit = Some(bytes);
        self
    }

    fn check_storage(&self, size: u64) -> Result<(), DustError> {
        match self.storage_limit {
            Some(limit) if size > limit => Err(GpuError::BufferTooLarge { size, limit }.into()),
            _ => Ok(()),
        }
    }

    /// Resources created and not yet released.
    pub fn live_resources(&self) -> usize {
        self.live
    }

    /// Host writes to argument buffers.
    pub fn args_uploads(&self) -> u64 {
        self.args_uploads
    }

    /// Every dispatch issued, in order, with the grid it ran on.
    pub fn dispatch_log(&self) -> &[(Kernel, DispatchArgs)] {
        &self.dispatches
    }

    pub fn dispatch_count(&self, kernel: Kernel) -> usize {
        self.dispatches.iter().filter(|(k, _)| *k == kernel).count()
    }

    pub fn clear_dispatch_log(&mut self) {
        self.dispatches.clear();
    }

    fn grid(&mut self, kernel: Kernel, args: &HostArgs) -> Result<DispatchArgs, DustError> {
        let grid = args.value.ok_or(DustError::NotInitialized(args.label))?;
        if grid.is_empty() {
            return Err(DustError::DegenerateDispatch(kernel));
        }
        self.dispatches.push((kernel, grid));
        trace!("{}: {:?}", kernel.entry_point(), grid.to_array());
        Ok(grid)
    }
}

/// Invoke `f` with the linear index of every thread in the grid.
fn for_each_thread(grid: DispatchArgs, mut f: impl FnMut(u32)) {
    let row = grid.x * THREADS_PER_GROUP_EDGE;
    let rows = grid.y * THREADS_PER_GROUP_EDGE;
    for _z in 0..grid.z {
        for y in 0..rows {
            for x in 0..row {
                f(y * row + x);
            }
        }
    }
}

impl Backend for HostBackend {
    type Pool = HostPool;
    type Args = HostArgs;
    type Mesh = HostMesh;
    type Ramp = HostRamp;

    fn name(&self) -> &'static str {
        "host"
    }

    fn create_pool(&mut self, capacity: u32) -> Result<HostPool, DustError> {
        self.check_storage(capacity as u64 * Particle::STRIDE)?;
        self.live += 1;
        Ok(HostPool {
            particles: vec![Particle::zeroed(); capacity as usize],
            dead_list: vec![0; capacity as usize],
            dead_count: 0,
            high_water: 0,
        })
    }

    fn release_pool(&mut self, _pool: HostPool) {
        self.live -= 1;
    }

    fn create_args(&mut self, label: &'static str) -> Result<HostArgs, DustError> {
        self.live += 1;
        Ok(HostArgs { label, value: None })
    }

    fn write_args(&mut self, args: &mut HostArgs, value: DispatchArgs) {
        args.value = Some(value);
        self.args_uploads += 1;
    }

    fn release_args(&mut self, _args: HostArgs) {
        self.live -= 1;
    }

    fn create_mesh(&mut self, vertices: &[MeshVertex], triangles: &[u32]) -> Result<HostMesh, DustError> {
        self.check_storage(std::mem::size_of_val(vertices) as u64)?;
        self.live += 1;
        Ok(HostMesh {
            vertices: bytemuck::cast_slice::<MeshVertex, f32>(vertices).to_vec(),
            triangles: triangles.to_vec(),
        })
    }

    fn release_mesh(&mut self, _mesh: HostMesh) {
        self.live -= 1;
    }

    fn create_ramp(&mut self, kind: RampKind) -> Result<HostRamp, DustError> {
        self.live += 1;
        let texels = if kind.is_scalar() {
            RampTexels::from_curve(None)
        } else {
            RampTexels::from_gradient(None)
        };
        Ok(HostRamp { kind, texels })
    }

    fn write_ramp(&mut self, ramp: &mut HostRamp, texels: &RampTexels) {
        debug_assert_eq!(ramp.kind.is_scalar(), matches!(texels, RampTexels::Scalar(_)));
        ramp.texels = texels.clone();
    }

    fn release_ramp(&mut self, _ramp: HostRamp) {
        self.live -= 1;
    }

    fn dispatch_init(&mut self, pool: &mut HostPool, args: &HostArgs, params: &SimParams) -> Result<(), DustError> {
        let grid = self.grid(Kernel::Init, args)?;
        let capacity = params.capacity().min(pool.capacity());
        for_each_thread(grid, |idx| {
            if idx >= capacity {
                return;
            }
            pool.particles[idx as usize] = Particle::dead();
            pool.dead_list[idx as usize] = capacity - 1 - idx;
            pool.dead_count += 1;
        });
        Ok(())
    }

    fn dispatch_spawn(
        &mut self,
        pool: &mut HostPool,
        args: &HostArgs,
        mesh: Option<&HostMesh>,
        params: &SimParams,
    ) -> Result<(), DustError> {
        let grid = self.grid(Kernel::Spawn, args)?;
        let count = params.spawn_count();
        for_each_thread(grid, |idx| {
            if idx >= count {
                return;
            }
            let Some(slot) = pool.consume() else {
                return;
            };
            pool.high_water = pool.high_water.max(slot + 1);
            pool.particles[slot as usize] = spawn_particle(idx, slot, params, mesh);
        });
        Ok(())
    }

    fn dispatch_size_update(&mut self, pool: &mut HostPool, update_args: &mut HostArgs) -> Result<(), DustError> {
        self.dispatches.push((Kernel::SizeUpdate, DispatchArgs::new(1, 1, 1)));
        let g = groups_for_count(pool.high_water).max(1);
        update_args.value = Some(DispatchArgs::new(g, g, 1));
        Ok(())
    }

    fn dispatch_update(
        &mut self,
        pool: &mut HostPool,
        args: &HostArgs,
        ramps: RampBindings<'_, HostRamp>,
        params: &SimParams,
    ) -> Result<(), DustError> {
        let grid = self.grid(Kernel::Update, args)?;
        let capacity = params.capacity().min(pool.capacity());
        for_each_thread(grid, |idx| {
            if idx >= capacity {
                return;
            }
            let mut p = pool.particles[idx as usize];
            if !p.is_active() {
                return;
            }
            let alive = update_particle(&mut p, &ramps, params);
            pool.particles[idx as usize] = p;
            if !alive {
                pool.append(idx);
            }
        });
        Ok(())
    }

    fn read_free_count(&mut self, pool: &HostPool) -> Result<u32, DustError> {
        Ok(pool.dead_count.max(0) as u32)
    }

    fn read_particles(&mut self, pool: &HostPool) -> Result<Vec<Particle>, DustError> {
        Ok(pool.particles.clone())
    }

    fn read_dead_list(&mut self, pool: &HostPool) -> Result<Vec<u32>, DustError> {
        let n = (pool.dead_count.max(0) as usize).min(pool.dead_list.len());
        Ok(pool.dead_list[..n].to_vec())
    }

    fn read_args(&mut self, args: &HostArgs) -> Result<DispatchArgs, DustError> {
        args.value.ok_or(DustError::NotInitialized(args.label))
    }
}

// ---------------------------------------------------------------------------
// Kernel bodies. Each mirrors the WGSL function of the same name.
// ---------------------------------------------------------------------------

pub(crate) fn hash(n: u32) -> u32 {
    let mut x = n;
    x ^= x >> 17;
    x = x.wrapping_mul(0xed5ad4bb);
    x ^= x >> 11;
    x = x.wrapping_mul(0xac4c1b51);
    x ^= x >> 15;
    x = x.wrapping_mul(0x31848bab);
    x ^= x >> 14;
    x
}

/// Per-thread seed: distinct per slot, thread and frame.
pub(crate) fn spawn_seed(slot: u32, idx: u32, frame: u32) -> u32 {
    hash(slot ^ hash(frame.wrapping_mul(0x9e3779b9).wrapping_add(idx)))
}

pub(crate) fn next_rand(state: &mut u32) -> f32 {
    *state = hash(*state);
    *state as f32 / 4294967295.0
}

fn rand_unit(state: &mut u32) -> Vec3 {
    let z = next_rand(state) * 2.0 - 1.0;
    let a = next_rand(state) * TAU;
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(r * a.cos(), r * a.sin(), z)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Position, direction and colour multiplier for a new particle.
struct ShapeSample {
    position: Vec3,
    direction: Vec3,
    color: Vec4,
}

fn sample_sphere(state: &mut u32, origin: Vec3, size: Vec3, scatter: f32) -> ShapeSample {
    let d = rand_unit(state);
    let radius = lerp(1.0, next_rand(state).powf(1.0 / 3.0), scatter);
    ShapeSample {
        position: origin + d * size * radius,
        direction: d,
        color: Vec4::ONE,
    }
}

fn sample_box(state: &mut u32, origin: Vec3, size: Vec3, scatter: f32) -> ShapeSample {
    let r = Vec3::new(next_rand(state), next_rand(state), next_rand(state));
    let mut local = (r - 0.5) * size;
    let face = next_rand(state);
    let axis_pick = next_rand(state);
    if face >= scatter {
        let axis = ((axis_pick * 3.0) as usize).min(2);
        let half = 0.5 * size[axis];
        local[axis] = if local[axis] >= 0.0 { half } else { -half };
    }
    let len = local.length();
    ShapeSample {
        position: origin + local,
        direction: if len > 1e-6 { local / len } else { Vec3::Y },
        color: Vec4::ONE,
    }
}

fn mesh_vertex(mesh: &HostMesh, i: u32) -> (Vec3, Vec3, Vec3) {
    let b = i as usize * MeshVertex::FLOATS;
    let v = &mesh.vertices;
    (
        Vec3::new(v[b], v[b + 1], v[b + 2]),
        Vec3::new(v[b + 3], v[b + 4], v[b + 5]),
        Vec3::new(v[b + 6], v[b + 7], v[b + 8]),
    )
}

fn sample_mesh(state: &mut u32, mesh: &HostMesh, params: &SimParams) -> ShapeSample {
    let triangle_count = params.selectors[3];
    let tri = ((next_rand(state) * triangle_count as f32) as u32).min(triangle_count - 1);
    let r1 = next_rand(state).sqrt();
    let r2 = next_rand(state);
    let (a, b, c) = (1.0 - r1, r1 * (1.0 - r2), r1 * r2);

    let base = tri as usize * 3;
    let (p0, n0, c0) = mesh_vertex(mesh, mesh.triangles[base]);
    let (p1, n1, c1) = mesh_vertex(mesh, mesh.triangles[base + 1]);
    let (p2, n2, c2) = mesh_vertex(mesh, mesh.triangles[base + 2]);

    let matrix = Mat4::from_cols_array_2d(&params.mesh_matrix);
    let normal_matrix = Mat4::from_cols_array_2d(&params.mesh_normal_matrix);
    let local = p0 * a + p1 * b + p2 * c;
    let normal = normal_matrix.transform_vector3(n0 * a + n1 * b + n2 * c);
    let len = normal.length();

    ShapeSample {
        position: matrix.transform_point3(local),
        direction: if len > 1e-6 { normal / len } else { Vec3::Y },
        color: (c0 * a + c1 * b + c2 * c).extend(1.0),
    }
}

/// Rotation matrix about a unit `axis`, same construction as the WGSL `axis_angle`.
fn axis_angle(axis: Vec3, angle: f32) -> Mat4 {
    let (s, c) = angle.sin_cos();
    let t = 1.0 - c;
    let (x, y, z) = (axis.x, axis.y, axis.z);
    Mat4::from_cols(
        Vec4::new(t * x * x + c, t * x * y + s * z, t * x * z - s * y, 0.0),
        Vec4::new(t * x * y - s * z, t * y * y + c, t * y * z + s * x, 0.0),
        Vec4::new(t * x * z + s * y, t * y * z - s * x, t * z * z + c, 0.0),
        Vec4::W,
    )
}

/// Body of the `spawn` entry point for one popped slot.
fn spawn_particle(idx: u32, slot: u32, params: &SimParams, mesh: Option<&HostMesh>) -> Particle {
    let mut state = spawn_seed(slot, idx, params.frame());
    let [mass_min, mass_max, mom_min, mom_max] = params.mass_momentum;
    let [life_min, life_max, _, inherit] = params.lifespan_gravity;
    let [speed, jitter, randomize_direction, randomize_rotation] = params.motion;

    let mass = lerp(mass_min, mass_max, next_rand(&mut state));
    let momentum = lerp(mom_min, mom_max, next_rand(&mut state));
    let lifespan = lerp(life_min, life_max, next_rand(&mut state));
    let random_dir = rand_unit(&mut state);

    let origin = Vec4::from_array(params.origin).truncate();
    let size = Vec4::from_array(params.emission_size);
    let sample = match (params.selectors[0], mesh) {
        (s, Some(mesh)) if s == EmissionShape::Mesh.selector()
            && params.mesh_enabled()
            && params.selectors[3] > 0 => {
            sample_mesh(&mut state, mesh, params)
        }
        (s, _) if s == EmissionShape::Box.selector() => {
            sample_box(&mut state, origin, size.truncate(), size.w)
        }
        (s, _) if s == EmissionShape::Sphere.selector() => {
            sample_sphere(&mut state, origin, size.truncate(), size.w)
        }
        _ => ShapeSample {
            position: origin,
            direction: random_dir,
            color: Vec4::ONE,
        },
    };

    let axis = rand_unit(&mut state);
    let angle = next_rand(&mut state) * TAU * randomize_rotation;

    let blended = sample.direction.lerp(random_dir, randomize_direction);
    let len = blended.length();
    let direction = if len > 1e-6 { blended / len } else { random_dir };
    let emitter_velocity = Vec4::from_array(params.emitter_velocity).truncate();
    let velocity = direction * speed + emitter_velocity * inherit + random_dir * jitter;

    let color = Vec4::from_array(params.start_color) * sample.color;
    Particle {
        position: sample.position.to_array(),
        age: 0.0,
        velocity: velocity.to_array(),
        lifespan,
        color: color.to_array(),
        start_color: color.to_array(),
        scale: Vec4::from_array(params.particle_scale).truncate().to_array(),
        mass,
        rotation: axis_angle(axis, angle).to_cols_array_2d(),
        momentum,
        alive: 1,
        _pad: [0.0; 2],
    }
}

fn lattice(i: [i32; 3]) -> f32 {
    let h = hash((i[0] as u32).wrapping_add(hash((i[1] as u32).wrapping_add(hash(i[2] as u32)))));
    h as f32 / 4294967295.0
}

/// Trilinear hash-lattice value noise in `[-1, 1]`.
fn value_noise(p: Vec3) -> f32 {
    let i = p.floor();
    let f = p - i;
    let u = f * f * (Vec3::splat(3.0) - 2.0 * f);
    let (x, y, z) = (i.x as i32, i.y as i32, i.z as i32);

    let c = |dx: i32, dy: i32, dz: i32| lattice([x.wrapping_add(dx), y.wrapping_add(dy), z.wrapping_add(dz)]);
    let x00 = lerp(c(0, 0, 0), c(1, 0, 0), u.x);
    let x10 = lerp(c(0, 1, 0), c(1, 1, 0), u.x);
    let x01 = lerp(c(0, 0, 1), c(1, 0, 1), u.x);
    let x11 = lerp(c(0, 1, 1), c(1, 1, 1), u.x);
    let y0 = lerp(x00, x10, u.y);
    let y1 = lerp(x01, x11, u.y);
    lerp(y0, y1, u.z) * 2.0 - 1.0
}

pub(crate) fn noise_field(kind: u32, q: Vec3) -> Vec3 {
    if kind == NoiseKind::Value.selector() {
        Vec3::new(
            value_noise(q),
            value_noise(q + Vec3::splat(31.4)),
            value_noise(q + Vec3::splat(71.9)),
        )
    } else {
        Vec3::new((q.y + q.z).sin(), (q.z + q.x).sin(), (q.x + q.y).sin())
    }
}

/// Body of the `update` entry point for one active slot. Returns `false`
/// when the particle died this step.
fn update_particle(p: &mut Particle, ramps: &RampBindings<'_, HostRamp>, params: &SimParams) -> bool {
    let dt = params.dt();
    p.age += dt;
    if p.age > p.lifespan {
        p.alive = 0;
        return false;
    }

    let gravity = Vec4::from_array(params.gravity).truncate();
    let modifier = params.lifespan_gravity[2];
    let mut velocity = p.velocity();
    velocity += gravity * modifier * dt;
    velocity *= p.momentum;
    let mut position = p.position() + velocity * dt;

    if params.noise_enabled() {
        let time = params.time();
        let scale = Vec4::from_array(params.noise_scale).truncate();
        let offset = Vec4::from_array(params.noise_offset);
        let speed = Vec4::from_array(params.noise_offset_speed);
        let amplitude = Vec4::from_array(params.noise_amplitude).truncate();
        let q = position * scale
            + offset.truncate()
            + speed.truncate() * time
            + Vec3::splat(offset.w + speed.w * time);
        position += noise_field(params.selectors[1], q) * amplitude * dt;
    }

    let life = p.age / p.lifespan;
    let speed_t = velocity.length() / params.velocity_color_range().max(1e-6);
    let color = Vec4::from_array(p.start_color)
        * ramps.color_over_life.texels.sample(life)
        * ramps.color_over_velocity.texels.sample(speed_t);
    let size = ramps.size_over_life.texels.sample(life).x;

    p.velocity = velocity.to_array();
    p.position = position.to_array();
    p.color = color.to_array();
    p.scale = (Vec4::from_array(params.particle_scale).truncate() * size).to_array();
    true
}
