use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rexla::{
    ComputationBuilder, DType, ExecutableBuildOptions, ExecutableRunOptions, Literal, LocalClient,
    Shape,
};
use rexla_backend_host::{HostPlatform, HostPlatformConfig};

const WARMUP_RUNS: usize = 2;
const RNG_SEED: u64 = 0x5EED_0A11;

fn host_client() -> LocalClient {
    LocalClient::new(Arc::new(HostPlatform::new("host", HostPlatformConfig::default())))
        .expect("host client")
}

/// Per-run cost of a tiny `x + x` executable: validation, transfers and
/// output allocation dominate the arithmetic.
fn local_client_overhead(c: &mut Criterion) {
    let client = host_client();
    let shape = Shape::array(DType::F32, [2, 3]);
    let mut b = ComputationBuilder::new("overhead");
    let x = b.parameter(0, shape.clone(), "x");
    b.add(x, x);
    let computation = b.build().expect("computation builds");

    let device = client.default_device_ordinal().expect("device");
    let allocator = client.default_allocator();
    let stream = client.new_stream(device).expect("stream");
    let executable = client
        .compile(&computation, &[shape.clone()], &ExecutableBuildOptions::new())
        .expect("compile");
    let run = ExecutableRunOptions::new()
        .with_allocator(allocator.clone())
        .with_stream(stream);

    let zeros = Literal::zeros(&shape).expect("zeros");
    let zeros = client
        .literal_to_shaped_buffer(&zeros, device, Some(allocator.clone()))
        .expect("transfer");
    for _ in 0..WARMUP_RUNS {
        executable.run(&[&zeros], &run).expect("warmup run");
    }

    let mut group = c.benchmark_group("local_client_overhead");
    group.bench_function("run_add_2x3_zeros", |bench| {
        bench.iter(|| black_box(executable.run(&[&zeros], &run).expect("run")))
    });

    let mut rng = StdRng::seed_from_u64(RNG_SEED);
    let values = (0..6).map(|_| rng.gen_range(-1.0f32..1.0)).collect::<Vec<_>>();
    let random = Literal::from_vec([2, 3], values).expect("literal");
    group.bench_function("transfer_and_run_random_2x3", |bench| {
        bench.iter(|| {
            let argument = client
                .literal_to_shaped_buffer(&random, device, Some(allocator.clone()))
                .expect("transfer");
            let output = executable.run(&[&argument], &run).expect("run");
            black_box(client.shaped_buffer_to_literal(&output).expect("read back"))
        })
    });
    group.finish();
}

criterion_group!(benches, local_client_overhead);
criterion_main!(benches);
