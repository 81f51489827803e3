//! Headless demo: one emitter on the GPU backend.
//!
//! Runs a few hundred fixed steps of a box emitter with gravity, noise and
//! a colour ramp, logging the pool occupancy as it fills and settles.
//! Set `RUST_LOG=debug` for per-tick detail.

use std::process::ExitCode;

use dust::prelude::*;
use log::{error, info};

const FRAMES: u32 = 300;

fn run() -> Result<(), DustError> {
    let backend = GpuBackend::new()?;

    let config = SimulationConfig::new()
        .with_capacity(262_144)
        .with_emission(4_000)
        .with_lifespan(1.0..3.0)
        .with_shape(EmissionShape::Box)
        .with_emission_size(Vec3::new(2.0, 0.5, 2.0))
        .with_scatter_volume(1.0)
        .with_initial_speed(2.0)
        .with_randomize_direction(0.3)
        .with_gravity_modifier(0.25)
        .with_color_over_life(Gradient::two_color(
            Vec4::new(1.0, 0.8, 0.3, 1.0),
            Vec4::new(0.2, 0.1, 0.6, 0.0),
        ))
        .with_noise(NoiseConfig::new(NoiseKind::Value).amplitude(Vec3::splat(0.5)))
        .with_prewarm(10);

    let mut sim = Simulation::new(backend, config)?;
    let mut renderer = Renderer::points();

    for frame in 0..FRAMES {
        let report = sim.step()?;
        renderer.update_bindings(sim.pool(), sim.config().emission)?;

        if frame % 50 == 0 {
            info!(
                "frame {:>4}  t={:>5.2}s  spawned {:>5}  free before {:>7}  draw {:?}",
                report.frame,
                report.time,
                report.spawn.dispatched,
                report.spawn.free_before.unwrap_or(0),
                renderer.draw()?
            );
        }
    }

    let live = sim.live_count()?;
    let free = sim.free_count()?;
    info!(
        "{} live + {} free = {} (capacity {})",
        live,
        free,
        live + free,
        sim.pool().capacity()
    );
    sim.teardown();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(DustError::Gpu(GpuError::NoAdapter)) => {
            error!("No GPU adapter available; the host backend still runs the tests");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
