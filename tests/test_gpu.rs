// tests/test_gpu.rs — GPU passes against the CPU reference.
//
// All tests need a real Vulkan adapter:
//   cargo test --test test_gpu -- --include-ignored

use std::sync::Arc;
use std::time::Duration;

use wavepred::completion::WaitLimit;
use wavepred::config::{Backend, Config};
use wavepred::gpu::{GpuDevice, GpuPlane, GpuWavefront};
use wavepred::grid::TileGrid;
use wavepred::plane::Plane;
use wavepred::predict::{predict_sequential, EdgePredictor};
use wavepred::schedule::Strategy;
use wavepred::wave::WaveOrder;

#[test]
#[ignore = "requires a real Vulkan GPU"]
fn gpu_strategies_match_cpu_reference() {
    let gpu = GpuDevice::new().expect("need Vulkan GPU");
    for (tw, th, block) in [(1, 1, 16), (4, 3, 8), (17, 13, 16), (1, 9, 4), (9, 1, 4)] {
        let grid = TileGrid::new(tw, th, block).unwrap();
        let order = Arc::new(WaveOrder::for_grid(&grid));
        let input = Plane::residual_pattern(grid.width(), grid.height(), 40 + tw as u32);
        let expected = predict_sequential(&grid, &EdgePredictor, &input);

        let wavefront = GpuWavefront::new(&gpu, grid, order)
            .unwrap()
            .with_wait_limit(WaitLimit::Timeout(Duration::from_secs(2)));
        let plane = GpuPlane::upload(&gpu, &input).unwrap();
        for strategy in Strategy::ALL {
            plane.restore(&gpu, &input).unwrap();
            wavefront.run_pass(&gpu, strategy, &plane).unwrap();
            let got = plane.readback(&gpu).unwrap();
            assert_eq!(got.first_mismatch(&expected), None, "{strategy} on {grid}");
        }
    }
}

#[test]
#[ignore = "requires a real Vulkan GPU"]
fn driver_runs_on_gpu_with_verification() {
    let config = Config {
        width: 256,
        height: 128,
        backend: Backend::Gpu,
        warmup: 1,
        times: 2,
        verify: true,
        ..Config::default()
    };
    let reports = wavepred::bench::run(&config).unwrap();
    assert_eq!(reports.len(), 2);
}

#[test]
#[ignore = "requires a real Vulkan GPU"]
fn driver_honours_workgroup_override() {
    // 16 threads per workgroup: each thread of a 16×16 tile owns 4 words.
    let config = Config {
        width: 128,
        height: 64,
        backend: Backend::Gpu,
        workgroup: Some(16),
        warmup: 0,
        times: 1,
        verify: true,
        ..Config::default()
    };
    assert_eq!(wavepred::bench::run(&config).unwrap().len(), 2);

    let too_wide = Config { workgroup: Some(1024), ..config };
    let err = wavepred::bench::run(&too_wide).unwrap_err();
    assert!(matches!(err, wavepred::PredError::Device(_)), "{err}");
}
