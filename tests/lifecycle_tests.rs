//! Pool lifecycle tests against the host backend.
//!
//! Every test drives a full [`Simulation`] and checks the dead-list protocol
//! from the outside: slots are conserved, nothing outlives its lifespan,
//! spawning stops cleanly at a full pool and every resource is released.

use dust::prelude::*;
use dust::{DispatchArgs, Kernel};

fn sim(config: SimulationConfig) -> Simulation<HostBackend> {
    Simulation::new(HostBackend::new(), config).unwrap()
}

fn assert_conserved(sim: &mut Simulation<HostBackend>) {
    let capacity = sim.pool().capacity();
    let particles = sim.read_particles().unwrap();
    let mut dead = sim.read_dead_list().unwrap();
    let live = particles.iter().filter(|p| p.is_active()).count() as u32;

    assert_eq!(dead.len() as u32 + live, capacity, "slots lost or duplicated");
    assert_eq!(sim.free_count().unwrap(), dead.len() as u32);

    // No slot both live and listed, none listed twice.
    for &slot in &dead {
        assert!(!particles[slot as usize].is_active(), "slot {} live and listed", slot);
    }
    dead.sort_unstable();
    dead.dedup();
    assert_eq!(dead.len() as u32 + live, capacity, "slot listed twice");
}

// ============================================================================
// Conservation
// ============================================================================

#[test]
fn test_slots_conserved_every_tick() {
    let config = SimulationConfig::new()
        .with_capacity(2_000)
        .with_emission(150)
        .with_lifespan(0.2..0.9)
        .with_initial_speed(1.0)
        .with_jitter(0.3)
        .with_fixed_dt(0.05);
    let mut sim = sim(config);

    for _ in 0..60 {
        sim.step().unwrap();
        assert_conserved(&mut sim);
    }
}

#[test]
fn test_no_live_particle_past_its_lifespan() {
    let config = SimulationConfig::new()
        .with_capacity(1_000)
        .with_emission(80)
        .with_lifespan(0.1..0.5)
        .with_fixed_dt(0.07);
    let mut sim = sim(config);

    for _ in 0..40 {
        sim.step().unwrap();
        for p in sim.read_particles().unwrap().iter().filter(|p| p.is_active()) {
            assert!(p.age <= p.lifespan, "age {} > lifespan {}", p.age, p.lifespan);
        }
    }
}

#[test]
fn test_burst_then_everything_dies() {
    let config = SimulationConfig::new()
        .with_capacity(1024)
        .with_emission(1024)
        .with_lifespan(1.0..1.0)
        .with_fixed_dt(0.1);
    let mut sim = sim(config);

    let first = sim.step().unwrap();
    assert_eq!(first.spawn.dispatched, 1024);
    assert_eq!(sim.live_count().unwrap(), 1024);
    assert_eq!(sim.free_count().unwrap(), 0);

    sim.set_emission(0);
    for _ in 0..10 {
        let report = sim.step().unwrap();
        assert!(report.spawn.skipped());
    }

    assert_eq!(sim.live_count().unwrap(), 0);
    assert_eq!(sim.read_dead_list().unwrap().len(), 1024);
    assert_conserved(&mut sim);
}

// ============================================================================
// Spawn sizing
// ============================================================================

#[test]
fn test_full_pool_skips_spawn() {
    let config = SimulationConfig::new()
        .with_capacity(64)
        .with_emission(100)
        .with_lifespan(10.0..10.0);
    let mut sim = sim(config);

    let first = sim.step().unwrap();
    assert_eq!(first.spawn.dispatched, 64);

    sim.backend_mut().clear_dispatch_log();
    let second = sim.step().unwrap();
    assert_eq!(second.spawn.free_before, Some(0));
    assert!(second.spawn.skipped());
    assert_eq!(sim.backend().dispatch_count(Kernel::Spawn), 0);
    assert_eq!(sim.backend().dispatch_count(Kernel::Update), 1);
    assert_eq!(sim.live_count().unwrap(), 64);
}

#[test]
fn test_spawn_args_not_reuploaded_for_same_grid() {
    let config = SimulationConfig::new()
        .with_capacity(100_000)
        .with_emission(500)
        .with_lifespan(10.0..10.0);
    let mut sim = sim(config);
    let before = sim.backend().args_uploads();

    for _ in 0..5 {
        sim.step().unwrap();
    }
    // Init and Update args at build, then one Spawn upload for the whole run.
    assert_eq!(sim.backend().args_uploads() - before, 1);
}

#[test]
fn test_worst_case_sizing_never_reads_back() {
    let config = SimulationConfig::new()
        .with_capacity(64)
        .with_emission(100)
        .with_lifespan(10.0..10.0)
        .with_spawn_sizing(SpawnSizing::WorstCase);
    let mut sim = sim(config);

    for _ in 0..3 {
        let report = sim.step().unwrap();
        assert_eq!(report.spawn.free_before, None);
        assert_eq!(report.spawn.dispatched, 64);
    }
    assert_eq!(sim.live_count().unwrap(), 64);
    assert_conserved(&mut sim);
}

#[test]
fn test_high_water_update_extent() {
    let config = SimulationConfig::new()
        .with_capacity(65_536)
        .with_emission(300)
        .with_lifespan(10.0..10.0)
        .with_update_extent(UpdateExtent::HighWater);
    let mut sim = sim(config);

    sim.backend_mut().clear_dispatch_log();
    let report = sim.step().unwrap();
    assert_eq!(report.update_args, None);

    let kernels: Vec<_> = sim.backend().dispatch_log().iter().map(|(k, _)| *k).collect();
    assert_eq!(kernels, vec![Kernel::Spawn, Kernel::SizeUpdate, Kernel::Update]);

    // 300 slots from the bottom of the pool: a 2×2 grid instead of 16×16.
    let (_, update_grid) = sim.backend().dispatch_log()[2];
    assert_eq!(update_grid, DispatchArgs::new(2, 2, 1));
    assert_eq!(sim.live_count().unwrap(), 300);
}

#[test]
fn test_high_water_update_reaches_every_live_slot() {
    let config = SimulationConfig::new()
        .with_capacity(3_000)
        .with_emission(200)
        .with_lifespan(0.3..0.6)
        .with_fixed_dt(0.1)
        .with_update_extent(UpdateExtent::HighWater);
    let mut sim = sim(config);

    for _ in 0..20 {
        sim.step().unwrap();
        for p in sim.read_particles().unwrap().iter().filter(|p| p.is_active()) {
            assert!(p.age <= p.lifespan);
        }
        assert_conserved(&mut sim);
    }
}

// ============================================================================
// Emission
// ============================================================================

#[test]
fn test_prewarm_runs_fixed_ticks() {
    let config = SimulationConfig::new()
        .with_capacity(512)
        .with_emission(10)
        .with_lifespan(10.0..10.0)
        .with_prewarm(5);
    let mut sim = sim(config);

    assert_eq!(sim.clock().frame(), 5);
    assert_eq!(sim.backend().dispatch_count(Kernel::Spawn), 5);
    assert_eq!(sim.live_count().unwrap(), 50);
}

#[test]
fn test_mesh_emission_stays_on_the_mesh() {
    let offset = Vec3::new(10.0, 0.0, -4.0);
    let config = SimulationConfig::new()
        .with_capacity(512)
        .with_emission(200)
        .with_lifespan(10.0..10.0)
        .with_emission_mesh(SourceMesh::cube(0.5), Mat4::from_translation(offset));
    let mut sim = sim(config);
    sim.step().unwrap();

    let live: Vec<_> = sim
        .read_particles()
        .unwrap()
        .into_iter()
        .filter(|p| p.is_active())
        .collect();
    assert_eq!(live.len(), 200);
    for p in live {
        let local = p.position() - offset;
        assert!(
            (local.abs().max_element() - 0.5).abs() < 1e-4,
            "{:?} is not on the cube surface",
            local
        );
    }
}

#[test]
fn test_sphere_scatter_volume() {
    let config = SimulationConfig::new()
        .with_capacity(512)
        .with_emission(256)
        .with_lifespan(10.0..10.0)
        .with_emission_size(Vec3::splat(3.0))
        .with_scatter_volume(1.0);
    let mut sim = sim(config);
    sim.step().unwrap();

    let particles = sim.read_particles().unwrap();
    let radii: Vec<f32> = particles
        .iter()
        .filter(|p| p.is_active())
        .map(|p| p.position().length())
        .collect();
    assert!(radii.iter().all(|&r| r <= 3.0 + 1e-4));
    assert!(radii.iter().any(|&r| r < 2.5), "volume scatter never left the surface");
}

#[test]
fn test_inherited_velocity() {
    let config = SimulationConfig::new()
        .with_capacity(256)
        .with_emission(10)
        .with_lifespan(10.0..10.0)
        .with_momentum(1.0..1.0)
        .with_inherit_velocity(0.5, VelocitySource::Rigidbody);
    let mut sim = sim(config);
    sim.set_rigidbody_velocity(Some(Vec3::new(4.0, 0.0, 0.0)));
    sim.step().unwrap();

    for p in sim.read_particles().unwrap().iter().filter(|p| p.is_active()) {
        assert!(p.velocity().abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-5));
    }
}

#[test]
fn test_transform_velocity_is_frame_displacement() {
    let config = SimulationConfig::new()
        .with_capacity(256)
        .with_emission(10)
        .with_lifespan(10.0..10.0)
        .with_momentum(1.0..1.0)
        .with_fixed_dt(0.02)
        .with_inherit_velocity(1.0, VelocitySource::Transform);
    let mut sim = sim(config);

    sim.set_origin(Vec3::ZERO);
    sim.step().unwrap();
    sim.set_origin(Vec3::new(1.0, 0.0, 0.0));
    sim.step().unwrap();

    let velocities: Vec<Vec3> = sim
        .read_particles()
        .unwrap()
        .iter()
        .filter(|p| p.is_active())
        .map(|p| p.velocity())
        .collect();
    assert_eq!(velocities.len(), 20);

    // First batch saw no previous origin; second batch inherits the raw
    // one-unit step, independent of dt.
    let moved = velocities
        .iter()
        .filter(|v| v.abs_diff_eq(Vec3::X, 1e-5))
        .count();
    let still = velocities.iter().filter(|v| v.abs_diff_eq(Vec3::ZERO, 1e-5)).count();
    assert_eq!(moved, 10, "velocities {:?}", velocities);
    assert_eq!(still, 10);
}

#[test]
fn test_color_over_life_ramp() {
    let config = SimulationConfig::new()
        .with_capacity(256)
        .with_emission(16)
        .with_lifespan(1.0..1.0)
        .with_fixed_dt(0.5)
        .with_color_over_life(Gradient::two_color(Vec4::ONE, Vec4::ZERO));
    let mut sim = sim(config);
    sim.step().unwrap();

    for p in sim.read_particles().unwrap().iter().filter(|p| p.is_active()) {
        assert!((p.color().x - 0.5).abs() < 1e-2, "colour {:?}", p.color());
    }
}

#[test]
fn test_mesh_transform_moves_emission() {
    let offset = Vec3::new(-3.0, 2.0, 5.0);
    let config = SimulationConfig::new()
        .with_capacity(512)
        .with_emission(100)
        .with_lifespan(10.0..10.0)
        .with_emission_mesh(SourceMesh::cube(0.5), Mat4::IDENTITY);
    let mut sim = sim(config);

    sim.set_mesh_transform(Mat4::from_translation(offset));
    sim.step().unwrap();

    let particles = sim.read_particles().unwrap();
    let live: Vec<_> = particles.iter().filter(|p| p.is_active()).collect();
    assert_eq!(live.len(), 100);
    for p in live {
        let local = p.position() - offset;
        assert!(
            (local.abs().max_element() - 0.5).abs() < 1e-4,
            "{:?} is not on the moved cube",
            p.position()
        );
    }
}

// ============================================================================
// Noise
// ============================================================================

fn still_config() -> SimulationConfig {
    SimulationConfig::new()
        .with_capacity(256)
        .with_emission(50)
        .with_lifespan(10.0..10.0)
        .with_fixed_dt(0.1)
}

fn positions(sim: &mut Simulation<HostBackend>) -> Vec<Vec3> {
    sim.read_particles().unwrap().iter().map(|p| p.position()).collect()
}

#[test]
fn test_noise_displaces_positions() {
    let mut plain = sim(still_config());
    let mut noisy = sim(still_config());
    noisy.set_noise(Some(NoiseConfig::new(NoiseKind::Value).amplitude(Vec3::ONE)));

    for _ in 0..3 {
        plain.step().unwrap();
        noisy.step().unwrap();
    }

    let moved: f32 = positions(&mut plain)
        .iter()
        .zip(positions(&mut noisy))
        .map(|(a, b)| (*a - b).length())
        .sum();
    assert!(moved > 1e-3, "noise moved particles by only {}", moved);
}

#[test]
fn test_zero_amplitude_noise_is_inert() {
    let mut plain = sim(still_config());
    let mut silent = sim(still_config());
    silent.set_noise(Some(NoiseConfig::new(NoiseKind::Sine).amplitude(Vec3::ZERO)));

    for _ in 0..3 {
        plain.step().unwrap();
        silent.step().unwrap();
    }
    assert_eq!(positions(&mut plain), positions(&mut silent));
}

#[test]
fn test_disabling_noise_stops_displacement() {
    let mut plain = sim(still_config());
    let mut noisy = sim(still_config());
    noisy.set_noise(Some(NoiseConfig::new(NoiseKind::Value).amplitude(Vec3::ONE)));

    for _ in 0..3 {
        plain.step().unwrap();
        noisy.step().unwrap();
    }

    noisy.set_noise(None);
    let plain_before = positions(&mut plain);
    let noisy_before = positions(&mut noisy);
    plain.step().unwrap();
    noisy.step().unwrap();

    // Without noise a step moves each slot exactly as in the plain run.
    let plain_step = positions(&mut plain).into_iter().zip(plain_before).map(|(a, b)| a - b);
    let noisy_step = positions(&mut noisy).into_iter().zip(noisy_before).map(|(a, b)| a - b);
    for (a, b) in plain_step.zip(noisy_step) {
        assert!(a.abs_diff_eq(b, 1e-4), "{:?} != {:?}", a, b);
    }
}

// ============================================================================
// Errors and teardown
// ============================================================================

#[test]
fn test_invalid_config_creates_nothing() {
    let result = Simulation::new(HostBackend::new(), SimulationConfig::new().with_capacity(0));
    assert!(matches!(result, Err(DustError::ZeroCapacity)));
}

#[test]
fn test_bad_mesh_tears_down_partial_build() {
    let bad = SourceMesh::new(vec![Vec3::ZERO, Vec3::X], vec![0, 1, 5]);
    let config = SimulationConfig::new()
        .with_capacity(128)
        .with_emission_mesh(bad, Mat4::IDENTITY);

    match Simulation::new(HostBackend::new(), config) {
        Err(DustError::InvalidMesh(_)) => {}
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("invalid mesh accepted"),
    }
}

#[test]
fn test_teardown_releases_everything_once() {
    let config = SimulationConfig::new()
        .with_capacity(128)
        .with_emission_mesh(SourceMesh::cube(1.0), Mat4::IDENTITY);
    let mut sim = sim(config);
    // Pool, three argument buffers, three ramps, one mesh.
    assert_eq!(sim.backend().live_resources(), 8);

    sim.teardown();
    assert_eq!(sim.backend().live_resources(), 0);
    sim.teardown();
    assert_eq!(sim.backend().live_resources(), 0);

    assert!(matches!(sim.step(), Err(DustError::Released(_))));
    assert!(matches!(sim.free_count(), Err(DustError::Released(_))));
}

#[test]
fn test_mesh_recapture_releases_previous() {
    let mut sim = sim(SimulationConfig::new().with_capacity(128));
    let before = sim.backend().live_resources();

    sim.set_emission_mesh(SourceMesh::cube(1.0)).unwrap();
    sim.set_emission_mesh(SourceMesh::cube(2.0)).unwrap();
    assert_eq!(sim.backend().live_resources(), before + 1);
    assert_eq!(sim.mesh().triangle_count(), 12);
}
