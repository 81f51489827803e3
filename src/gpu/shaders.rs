//! WGSL source for the pool kernels.
//!
//! Each kernel is generated as its own module so its bind group holds
//! exactly the bindings listed in its layout:
//!
//! | Kernel | Bindings (group 0) |
//! |--------|--------------------|
//! | `init` | 0 particles, 1 dead_list, 2 counters, 3 params |
//! | `spawn` | 0-3, 4 mesh_vertices, 5 mesh_triangles |
//! | `update` | 0-3, 4 size_over_life, 5 color_over_life, 6 color_over_velocity |
//! | `size_update` | 0 counters, 1 update_args |

use crate::kernel::Kernel;
use crate::params::{SimParams, FLAG_MESH, FLAG_NOISE};
use crate::particle::Particle;
use crate::shader_utils;
use crate::GpuStruct;

const COUNTERS_WGSL: &str = r#"
struct Counters {
    dead_count: atomic<i32>,
    high_water: atomic<u32>,
    _pad0: u32,
    _pad1: u32,
}
"#;

/// Bytes in the counters buffer.
pub const COUNTERS_SIZE: u64 = 16;

/// Thread index shared by every grid-shaped kernel.
const THREAD_INDEX_WGSL: &str = r#"
fn thread_index(gid: vec3<u32>, groups: vec3<u32>) -> u32 {
    return gid.y * (groups.x * 16u) + gid.x;
}
"#;

const POOL_BINDINGS_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read_write> particles: array<Particle>;
@group(0) @binding(1) var<storage, read_write> dead_list: array<u32>;
@group(0) @binding(2) var<storage, read_write> counters: Counters;
@group(0) @binding(3) var<uniform> params: SimParams;

fn append_dead(slot: u32) {
    let i = atomicAdd(&counters.dead_count, 1);
    if i >= 0 && u32(i) < params.counts.x {
        dead_list[u32(i)] = slot;
    }
}
"#;

const INIT_WGSL: &str = r#"
@compute @workgroup_size(16, 16, 1)
fn init(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) groups: vec3<u32>) {
    let idx = thread_index(gid, groups);
    if idx >= params.counts.x {
        return;
    }

    var p: Particle;
    p.rotation = mat4x4<f32>(
        vec4<f32>(1.0, 0.0, 0.0, 0.0),
        vec4<f32>(0.0, 1.0, 0.0, 0.0),
        vec4<f32>(0.0, 0.0, 1.0, 0.0),
        vec4<f32>(0.0, 0.0, 0.0, 1.0)
    );
    particles[idx] = p;
    // Highest slot at the bottom, so Spawn fills the pool from slot 0 up.
    dead_list[idx] = params.counts.x - 1u - idx;
    atomicAdd(&counters.dead_count, 1);
}
"#;

const SPAWN_WGSL: &str = r#"
@group(0) @binding(4) var<storage, read> mesh_vertices: array<f32>;
@group(0) @binding(5) var<storage, read> mesh_triangles: array<u32>;

struct ShapeSample {
    position: vec3<f32>,
    direction: vec3<f32>,
    color: vec4<f32>,
}

fn sample_sphere(state: ptr<function, u32>, origin: vec3<f32>, size: vec3<f32>, scatter: f32) -> ShapeSample {
    let d = rand_unit(state);
    let radius = mix(1.0, pow(next_rand(state), 1.0 / 3.0), scatter);
    return ShapeSample(origin + d * size * radius, d, vec4<f32>(1.0));
}

fn sample_box(state: ptr<function, u32>, origin: vec3<f32>, size: vec3<f32>, scatter: f32) -> ShapeSample {
    let r = vec3<f32>(next_rand(state), next_rand(state), next_rand(state));
    var rel = (r - vec3<f32>(0.5)) * size;
    let face = next_rand(state);
    let axis_pick = next_rand(state);
    if face >= scatter {
        let axis = min(u32(axis_pick * 3.0), 2u);
        let extent = 0.5 * size[axis];
        rel[axis] = select(-extent, extent, rel[axis] >= 0.0);
    }
    let len = length(rel);
    var dir = vec3<f32>(0.0, 1.0, 0.0);
    if len > 1e-6 {
        dir = rel / len;
    }
    return ShapeSample(origin + rel, dir, vec4<f32>(1.0));
}

// attr: 0 = position, 1 = normal, 2 = color
fn mesh_attribute(vi: u32, attr: u32) -> vec3<f32> {
    let b = vi * 9u + attr * 3u;
    return vec3<f32>(mesh_vertices[b], mesh_vertices[b + 1u], mesh_vertices[b + 2u]);
}

fn sample_mesh(state: ptr<function, u32>) -> ShapeSample {
    let tri_count = params.selectors.w;
    let tri = min(u32(next_rand(state) * f32(tri_count)), tri_count - 1u);
    let r1 = sqrt(next_rand(state));
    let r2 = next_rand(state);
    let a = 1.0 - r1;
    let b = r1 * (1.0 - r2);
    let c = r1 * r2;

    let i0 = mesh_triangles[tri * 3u];
    let i1 = mesh_triangles[tri * 3u + 1u];
    let i2 = mesh_triangles[tri * 3u + 2u];

    let pos = mesh_attribute(i0, 0u) * a + mesh_attribute(i1, 0u) * b + mesh_attribute(i2, 0u) * c;
    let nrm = mesh_attribute(i0, 1u) * a + mesh_attribute(i1, 1u) * b + mesh_attribute(i2, 1u) * c;
    let col = mesh_attribute(i0, 2u) * a + mesh_attribute(i1, 2u) * b + mesh_attribute(i2, 2u) * c;

    let world_normal = (params.mesh_normal_matrix * vec4<f32>(nrm, 0.0)).xyz;
    let len = length(world_normal);
    var dir = vec3<f32>(0.0, 1.0, 0.0);
    if len > 1e-6 {
        dir = world_normal / len;
    }
    return ShapeSample((params.mesh_matrix * vec4<f32>(pos, 1.0)).xyz, dir, vec4<f32>(col, 1.0));
}

@compute @workgroup_size(16, 16, 1)
fn spawn(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) groups: vec3<u32>) {
    let idx = thread_index(gid, groups);
    if idx >= params.counts.y {
        return;
    }

    let top = atomicSub(&counters.dead_count, 1);
    if top <= 0 {
        atomicAdd(&counters.dead_count, 1);
        return;
    }
    let slot = dead_list[u32(top - 1)];
    atomicMax(&counters.high_water, slot + 1u);

    var state = spawn_seed(slot, idx, params.counts.z);
    let mass = mix(params.mass_momentum.x, params.mass_momentum.y, next_rand(&state));
    let momentum = mix(params.mass_momentum.z, params.mass_momentum.w, next_rand(&state));
    let lifespan = mix(params.lifespan_gravity.x, params.lifespan_gravity.y, next_rand(&state));
    let random_dir = rand_unit(&state);

    let origin = params.origin.xyz;
    let size = params.emission_size.xyz;
    let scatter = params.emission_size.w;
    let shape = params.selectors.x;
    var shape_sample = ShapeSample(origin, random_dir, vec4<f32>(1.0));
    if shape == SHAPE_MESH && (params.counts.w & FLAG_MESH) != 0u && params.selectors.w > 0u {
        shape_sample = sample_mesh(&state);
    } else if shape == SHAPE_BOX {
        shape_sample = sample_box(&state, origin, size, scatter);
    } else if shape == SHAPE_SPHERE {
        shape_sample = sample_sphere(&state, origin, size, scatter);
    }

    let axis = rand_unit(&state);
    let angle = next_rand(&state) * TAU * params.motion.w;

    let blended = mix(shape_sample.direction, random_dir, params.motion.z);
    let blen = length(blended);
    var direction = random_dir;
    if blen > 1e-6 {
        direction = blended / blen;
    }
    let velocity = direction * params.motion.x
        + params.emitter_velocity.xyz * params.lifespan_gravity.w
        + random_dir * params.motion.y;
    let color = params.start_color * shape_sample.color;

    var p: Particle;
    p.position = shape_sample.position;
    p.age = 0.0;
    p.velocity = velocity;
    p.lifespan = lifespan;
    p.color = color;
    p.start_color = color;
    p.scale = params.particle_scale.xyz;
    p.mass = mass;
    p.rotation = axis_angle(axis, angle);
    p.momentum = momentum;
    p.alive = 1u;
    particles[slot] = p;
}
"#;

const UPDATE_WGSL: &str = r#"
@group(0) @binding(4) var size_over_life: texture_2d<f32>;
@group(0) @binding(5) var color_over_life: texture_2d<f32>;
@group(0) @binding(6) var color_over_velocity: texture_2d<f32>;

@compute @workgroup_size(16, 16, 1)
fn update(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) groups: vec3<u32>) {
    let idx = thread_index(gid, groups);
    if idx >= params.counts.x {
        return;
    }

    var p = particles[idx];
    if p.alive == 0u {
        return;
    }

    let dt = params.time_params.x;
    p.age += dt;
    if p.age > p.lifespan {
        p.alive = 0u;
        particles[idx] = p;
        append_dead(idx);
        return;
    }

    var vel = p.velocity + params.gravity.xyz * params.lifespan_gravity.z * dt;
    vel *= p.momentum;
    var pos = p.position + vel * dt;

    if (params.counts.w & FLAG_NOISE) != 0u {
        let t = params.time_params.y;
        let q = pos * params.noise_scale.xyz
            + params.noise_offset.xyz
            + params.noise_offset_speed.xyz * t
            + vec3<f32>(params.noise_offset.w + params.noise_offset_speed.w * t);
        pos += noise_field(params.selectors.y, q) * params.noise_amplitude.xyz * dt;
    }

    let life = p.age / p.lifespan;
    let speed_t = length(vel) / max(params.time_params.z, 1e-6);
    p.color = p.start_color
        * sample_ramp(color_over_life, life)
        * sample_ramp(color_over_velocity, speed_t);
    p.scale = params.particle_scale.xyz * sample_ramp(size_over_life, life).x;
    p.velocity = vel;
    p.position = pos;
    particles[idx] = p;
}
"#;

const SIZE_UPDATE_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read_write> counters: Counters;
@group(0) @binding(1) var<storage, read_write> update_args: array<u32>;

fn ceil_sqrt(n: u32) -> u32 {
    if n == 0u {
        return 0u;
    }
    var r = u32(sqrt(f32(n)));
    while r * r < n {
        r += 1u;
    }
    while r > 1u && (r - 1u) * (r - 1u) >= n {
        r -= 1u;
    }
    return r;
}

@compute @workgroup_size(1)
fn size_update() {
    let high_water = atomicLoad(&counters.high_water);
    let g = max((ceil_sqrt(high_water) + 15u) / 16u, 1u);
    update_args[0] = g;
    update_args[1] = g;
    update_args[2] = 1u;
}
"#;

fn constants() -> String {
    format!(
        "const SHAPE_SPHERE: u32 = 0u;\nconst SHAPE_BOX: u32 = 1u;\nconst SHAPE_MESH: u32 = 2u;\n\
         const FLAG_NOISE: u32 = {}u;\nconst FLAG_MESH: u32 = {}u;\n",
        FLAG_NOISE, FLAG_MESH
    )
}

/// Complete WGSL module for one kernel. The entry point is
/// [`Kernel::entry_point`].
pub fn kernel_source(kernel: Kernel) -> String {
    let body = match kernel {
        Kernel::Init => INIT_WGSL,
        Kernel::Spawn => SPAWN_WGSL,
        Kernel::Update => UPDATE_WGSL,
        Kernel::SizeUpdate => return format!("{}{}", COUNTERS_WGSL, SIZE_UPDATE_WGSL),
    };

    let mut src = String::new();
    src.push_str(Particle::WGSL_STRUCT);
    src.push_str(SimParams::WGSL_STRUCT);
    src.push_str(COUNTERS_WGSL);
    src.push_str(&constants());
    src.push_str(&shader_utils::all());
    src.push_str(THREAD_INDEX_WGSL);
    src.push_str(POOL_BINDINGS_WGSL);
    src.push_str(body);
    src
}
