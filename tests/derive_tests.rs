//! Integration tests for the `#[derive(GpuStruct)]` macro.
//!
//! These tests use the derived implementations from outside the crate, the
//! way a host application sharing its own structs with WGSL would. Layout
//! mismatches are compile errors, so every struct here is a passing case.

use bytemuck::{Pod, Zeroable};
use dust::{GpuStruct, Particle, SimParams};

// ============================================================================
// Scalars and vectors
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, GpuStruct)]
struct Spark {
    position: [f32; 3],
    age: f32,
}

#[test]
fn test_vec3_packs_with_trailing_scalar() {
    assert_eq!(Spark::WGSL_NAME, "Spark");
    assert_eq!(Spark::WGSL_SIZE, 16);
    assert_eq!(
        Spark::WGSL_STRUCT,
        "struct Spark {\n    position: vec3<f32>,\n    age: f32,\n}\n"
    );
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, GpuStruct)]
struct Counters {
    dead_count: i32,
    high_water: u32,
    _pad: [u32; 2],
}

#[test]
fn test_integer_fields() {
    assert_eq!(Counters::WGSL_SIZE, 16);
    assert!(Counters::WGSL_STRUCT.contains("dead_count: i32,"));
    assert!(Counters::WGSL_STRUCT.contains("high_water: u32,"));
    assert!(Counters::WGSL_STRUCT.contains("_pad: vec2<u32>,"));
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, GpuStruct)]
struct Uv {
    uv: [f32; 2],
    weight: f32,
    _pad: f32,
}

#[test]
fn test_vec2_alignment() {
    assert_eq!(Uv::WGSL_SIZE, 16);
    assert!(Uv::WGSL_STRUCT.contains("uv: vec2<f32>,"));
}

// ============================================================================
// Matrices
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, GpuStruct)]
struct Instance {
    transform: [[f32; 4]; 4],
    tint: [f32; 4],
}

#[test]
fn test_mat4_field() {
    assert_eq!(Instance::WGSL_SIZE, 80);
    assert!(Instance::WGSL_STRUCT.contains("transform: mat4x4<f32>,"));
    assert!(Instance::WGSL_STRUCT.contains("tint: vec4<f32>,"));
}

// ============================================================================
// Crate structs
// ============================================================================

#[test]
fn test_particle_layout() {
    assert_eq!(Particle::WGSL_SIZE, 160);
    assert_eq!(Particle::WGSL_SIZE, std::mem::size_of::<Particle>());

    let expected_order = [
        "position", "age", "velocity", "lifespan", "color", "start_color", "scale", "mass",
        "rotation", "momentum", "alive", "_pad",
    ];
    let mut last = 0;
    for field in expected_order {
        let at = Particle::WGSL_STRUCT
            .find(&format!("    {}:", field))
            .unwrap_or_else(|| panic!("missing field {}", field));
        assert!(at >= last, "field {} out of order", field);
        last = at;
    }
}

#[test]
fn test_sim_params_layout() {
    assert_eq!(SimParams::WGSL_SIZE, std::mem::size_of::<SimParams>());
    assert_eq!(SimParams::WGSL_SIZE % 16, 0);
}
