//! WGSL helper functions shared by the pool kernels.
//!
//! Every kernel source generated by [`gpu::shaders`](crate::gpu) starts with
//! these snippets. The host executor mirrors each function, so a change here
//! must be made in [`host`](crate::host) as well.
//!
//! # Available Functions
//!
//! ## Random & Hash
//! - `hash(n: u32) -> u32` - Hash a u32 to pseudo-random u32
//! - `spawn_seed(slot: u32, idx: u32, frame: u32) -> u32` - Per-thread stream seed
//! - `next_rand(state: ptr<function, u32>) -> f32` - Advance the stream, value in [0, 1]
//! - `rand_unit(state: ptr<function, u32>) -> vec3<f32>` - Uniform unit vector
//!
//! ## Transform
//! - `axis_angle(axis: vec3<f32>, angle: f32) -> mat4x4<f32>` - Rotation matrix
//!
//! ## Noise
//! - `value_noise(p: vec3<f32>) -> f32` - Hash-lattice value noise in [-1, 1]
//! - `noise_field(kind: u32, q: vec3<f32>) -> vec3<f32>` - Displacement field
//!   (`0` = sine, `1` = value noise)
//!
//! ## Ramps
//! - `sample_ramp(tex: texture_2d<f32>, t: f32) -> vec4<f32>` - Linear lookup
//!   in a 1024×1 ramp with `textureLoad`

/// WGSL code for random/hash functions.
pub const RANDOM_WGSL: &str = r#"
// Hash functions for pseudo-random number generation
fn hash(n: u32) -> u32 {
    var x = n;
    x = x ^ (x >> 17u);
    x = x * 0xed5ad4bbu;
    x = x ^ (x >> 11u);
    x = x * 0xac4c1b51u;
    x = x ^ (x >> 15u);
    x = x * 0x31848babu;
    x = x ^ (x >> 14u);
    return x;
}

fn spawn_seed(slot: u32, idx: u32, frame: u32) -> u32 {
    return hash(slot ^ hash(frame * 0x9e3779b9u + idx));
}

// Random float in [0, 1], advancing the stream
fn next_rand(state: ptr<function, u32>) -> f32 {
    *state = hash(*state);
    return f32(*state) / 4294967295.0;
}

// Uniformly distributed unit vector
fn rand_unit(state: ptr<function, u32>) -> vec3<f32> {
    let z = next_rand(state) * 2.0 - 1.0;
    let a = next_rand(state) * TAU;
    let r = sqrt(max(1.0 - z * z, 0.0));
    return vec3<f32>(r * cos(a), r * sin(a), z);
}
"#;

/// WGSL code for rotation helpers.
pub const TRANSFORM_WGSL: &str = r#"
const TAU: f32 = 6.283185307179586;

fn axis_angle(axis: vec3<f32>, angle: f32) -> mat4x4<f32> {
    let s = sin(angle);
    let c = cos(angle);
    let t = 1.0 - c;
    let x = axis.x;
    let y = axis.y;
    let z = axis.z;
    return mat4x4<f32>(
        vec4<f32>(t * x * x + c, t * x * y + s * z, t * x * z - s * y, 0.0),
        vec4<f32>(t * x * y - s * z, t * y * y + c, t * y * z + s * x, 0.0),
        vec4<f32>(t * x * z + s * y, t * y * z - s * x, t * z * z + c, 0.0),
        vec4<f32>(0.0, 0.0, 0.0, 1.0)
    );
}
"#;

/// WGSL code for the displacement noise fields.
pub const NOISE_WGSL: &str = r#"
fn lattice(i: vec3<i32>) -> f32 {
    let u = bitcast<vec3<u32>>(i);
    return f32(hash(u.x + hash(u.y + hash(u.z)))) / 4294967295.0;
}

// Trilinear value noise in [-1, 1]
fn value_noise(p: vec3<f32>) -> f32 {
    let fl = floor(p);
    let f = p - fl;
    let u = f * f * (vec3<f32>(3.0) - 2.0 * f);
    let i = vec3<i32>(fl);

    let x00 = mix(lattice(i), lattice(i + vec3<i32>(1, 0, 0)), u.x);
    let x10 = mix(lattice(i + vec3<i32>(0, 1, 0)), lattice(i + vec3<i32>(1, 1, 0)), u.x);
    let x01 = mix(lattice(i + vec3<i32>(0, 0, 1)), lattice(i + vec3<i32>(1, 0, 1)), u.x);
    let x11 = mix(lattice(i + vec3<i32>(0, 1, 1)), lattice(i + vec3<i32>(1, 1, 1)), u.x);
    let y0 = mix(x00, x10, u.y);
    let y1 = mix(x01, x11, u.y);
    return mix(y0, y1, u.z) * 2.0 - 1.0;
}

fn noise_field(kind: u32, q: vec3<f32>) -> vec3<f32> {
    if kind == 1u {
        return vec3<f32>(
            value_noise(q),
            value_noise(q + vec3<f32>(31.4)),
            value_noise(q + vec3<f32>(71.9))
        );
    }
    return vec3<f32>(sin(q.y + q.z), sin(q.z + q.x), sin(q.x + q.y));
}
"#;

/// WGSL code for ramp lookups.
pub const RAMP_WGSL: &str = r#"
const RAMP_WIDTH: f32 = 1024.0;

// Linear between neighbouring texels, clamped at both ends
fn sample_ramp(tex: texture_2d<f32>, t: f32) -> vec4<f32> {
    let x = clamp(t * RAMP_WIDTH, 0.0, RAMP_WIDTH - 1.0);
    let i0 = u32(floor(x));
    let i1 = min(i0 + 1u, u32(RAMP_WIDTH) - 1u);
    let a = textureLoad(tex, vec2<u32>(i0, 0u), 0);
    let b = textureLoad(tex, vec2<u32>(i1, 0u), 0);
    return mix(a, b, x - floor(x));
}
"#;

/// All helpers, in dependency order.
pub fn all() -> String {
    format!("{}{}{}{}", TRANSFORM_WGSL, RANDOM_WGSL, NOISE_WGSL, RAMP_WGSL)
}
