//! Benchmarks for host-side work: dispatch sizing, ramp baking, mesh
//! packing, kernel source generation and full ticks on the host backend.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};

use dust::dispatch::groups_for_count;
use dust::gpu::kernel_source;
use dust::mesh::EmissionMeshData;
use dust::ramp::RampTexels;
use dust::{Curve, Gradient, HostBackend, Kernel, Simulation, SimulationConfig, SourceMesh, Vec3, Vec4};

fn bench_dispatch_sizing(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_sizing");

    for n in [1u32, 65_000, 1_048_576] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| black_box(groups_for_count(black_box(n))))
        });
    }

    group.finish();
}

fn bench_ramp_bake(c: &mut Criterion) {
    let mut group = c.benchmark_group("ramp_bake");

    group.bench_function("curve", |b| {
        let curve = Curve::new().add_key(0.0, 0.0).add_key(0.2, 1.0).add_key(1.0, 0.0);
        b.iter(|| black_box(RampTexels::from_curve(Some(&curve))))
    });

    group.bench_function("gradient", |b| {
        let gradient = Gradient::two_color(Vec4::ONE, Vec4::new(1.0, 0.2, 0.0, 0.0))
            .add_key(0.5, Vec4::new(1.0, 0.6, 0.1, 1.0));
        b.iter(|| black_box(RampTexels::from_gradient(Some(&gradient))))
    });

    group.finish();
}

fn bench_mesh_pack(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let vertices = 30_000;
    let positions: Vec<Vec3> = (0..vertices)
        .map(|_| Vec3::new(rng.gen(), rng.gen(), rng.gen()))
        .collect();
    let indices: Vec<u32> = (0..vertices * 3).map(|_| rng.gen_range(0..vertices as u32)).collect();
    let mesh = SourceMesh::new(positions, indices);

    c.bench_function("mesh_pack_30k", |b| b.iter(|| black_box(EmissionMeshData::pack(&mesh))));
}

fn bench_kernel_source(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_source");

    for kernel in Kernel::ALL {
        group.bench_function(kernel.entry_point(), |b| b.iter(|| black_box(kernel_source(kernel))));
    }

    group.finish();
}

fn bench_host_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_tick");
    group.sample_size(20);

    for capacity in [4_096u32, 65_536] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            let config = SimulationConfig::new()
                .with_capacity(capacity)
                .with_emission(capacity / 64)
                .with_lifespan(0.5..1.5)
                .with_initial_speed(1.0);
            let mut sim = match Simulation::new(HostBackend::new(), config) {
                Ok(sim) => sim,
                Err(e) => panic!("simulation setup failed: {}", e),
            };
            b.iter(|| black_box(sim.step().map(|report| report.spawn.dispatched)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dispatch_sizing,
    bench_ramp_bake,
    bench_mesh_pack,
    bench_kernel_source,
    bench_host_tick
);
criterion_main!(benches);
