// benches/gpu_schedulers.rs — GPU wavefront schedules.
//
//   cargo bench --bench gpu_schedulers
//
// CRITERION + GPU CAVEATS
// ────────────────────────
// Criterion measures wall time including CPU overhead (param writes, bind
// group creation, submit, poll). Both strategies end in poll(Wait), so the
// device work is inside the measurement. Host-barrier pays one submit +
// poll per wave; device-resident pays one submit + a status readback.
//
// The first iterations pay pipeline compilation on some drivers, so
// warm_up_time is set explicitly.

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use wavepred::completion::WaitLimit;
use wavepred::gpu::{GpuDevice, GpuPlane, GpuWavefront};
use wavepred::grid::TileGrid;
use wavepred::plane::Plane;
use wavepred::schedule::{DispatchHint, Strategy};
use wavepred::wave::WaveOrder;

fn bench_gpu_pass(c: &mut Criterion, w: usize, h: usize) {
    let gpu = GpuDevice::new().expect("no Vulkan GPU");
    let grid = TileGrid::for_image(w, h, 16).unwrap();
    let order = Arc::new(WaveOrder::for_grid(&grid));
    let input = Plane::residual_pattern(w, h, 1);
    let plane = GpuPlane::upload(&gpu, &input).unwrap();

    let mut group = c.benchmark_group(format!("gpu_pass_{w}x{h}"));
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(20);

    for hint in [DispatchHint::Waves, DispatchHint::Native] {
        let wavefront = GpuWavefront::new(&gpu, grid, Arc::clone(&order))
            .unwrap()
            .with_wait_limit(WaitLimit::Timeout(Duration::from_secs(2)))
            .with_hint(&gpu, hint.clone())
            .unwrap();
        for strategy in Strategy::ALL {
            // The hint only matters to the device-resident pass.
            if strategy == Strategy::HostBarrier && hint != DispatchHint::Waves {
                continue;
            }
            let id = BenchmarkId::new(strategy.label(), format!("{hint:?}"));
            group.bench_function(id, |b| {
                b.iter(|| wavefront.run_pass(&gpu, strategy, &plane).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_small(c: &mut Criterion) {
    bench_gpu_pass(c, 256, 256);
}

fn bench_reference(c: &mut Criterion) {
    bench_gpu_pass(c, 1024, 2048);
}

criterion_group!(benches, bench_small, bench_reference);
criterion_main!(benches);
