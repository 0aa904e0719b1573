// bench.rs — Warm-up, timed repetition and the end-to-end driver.
//
// MEASUREMENT
// ───────────
//   warmup × pass()            untimed; first-touch, thread spawn, shader
//                              pipeline caches
//   t0 = now
//   times × pass()             every pass blocks until its plane is final
//   elapsed = now - t0
//
// Each pass resets the completion flags itself, so consecutive passes never
// observe each other's flags. The plane is not restored between timed
// passes: each pass predicts on top of the previous output, which changes
// the bytes but not the amount of work.
//
// Wall-clock time is used for both backends. GPU passes end in
// `device.poll(Wait)`, so a pass is complete on the device when it returns.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::completion::CompletionState;
use crate::config::{Backend, Config};
use crate::error::PredError;
use crate::gpu::{GpuDevice, GpuPlane, GpuWavefront};
use crate::grid::TileGrid;
use crate::plane::{Plane, SharedPlane};
use crate::predict::{predict_sequential, EdgePredictor};
use crate::schedule::{
    DeviceResidentScheduler, DispatchHint, HostBarrierScheduler, Scheduler, Strategy,
};
use crate::wave::WaveOrder;

/// Seed for the synthetic residual plane.
pub const RESIDUAL_SEED: u32 = 0x5eed;

/// Timing of one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchReport {
    pub label: String,
    pub warmup: usize,
    pub times: usize,
    /// From the start of the first timed pass to the end of the last.
    pub elapsed: Duration,
}

impl BenchReport {
    pub fn per_pass(&self) -> Duration {
        self.elapsed.div_f64(self.times.max(1) as f64)
    }

    pub fn total_msec(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1e3
    }

    pub fn msec_per_pass(&self) -> f64 {
        self.per_pass().as_secs_f64() * 1e3
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} passes, {:.3} [msec], {:.3} [msec/pass]",
            self.label,
            self.times,
            self.total_msec(),
            self.msec_per_pass()
        )
    }
}

/// Run `pass` `warmup` times untimed, then `times` times timed.
///
/// # Errors
/// The first error returned by `pass`; the remaining passes are skipped.
pub fn measure<F>(
    label: impl Into<String>,
    warmup: usize,
    times: usize,
    mut pass: F,
) -> Result<BenchReport, PredError>
where
    F: FnMut() -> Result<(), PredError>,
{
    let label = label.into();
    for _ in 0..warmup {
        pass()?;
    }
    debug!(%label, warmup, "warm-up done");

    let t0 = Instant::now();
    for _ in 0..times {
        pass()?;
    }
    let elapsed = t0.elapsed();

    Ok(BenchReport { label, warmup, times, elapsed })
}

// ---------------------------------------------------------------------------
// Backends as pass runners
// ---------------------------------------------------------------------------

/// One backend's view of a pass: reset the plane, run, read the result.
trait PassRunner {
    fn backend(&self) -> Backend;
    fn restore(&mut self, input: &Plane) -> Result<(), PredError>;
    fn run(&mut self, strategy: Strategy) -> Result<(), PredError>;
    fn output(&mut self) -> Result<Plane, PredError>;
}

struct CpuRunner {
    host: HostBarrierScheduler<EdgePredictor>,
    resident: DeviceResidentScheduler<EdgePredictor>,
    plane: SharedPlane,
    completion: CompletionState,
}

impl CpuRunner {
    fn new(
        config: &Config,
        grid: TileGrid,
        order: Arc<WaveOrder>,
        input: &Plane,
    ) -> Result<Self, PredError> {
        let host =
            HostBarrierScheduler::new(grid, Arc::clone(&order), config.units, EdgePredictor)?;
        let resident = DeviceResidentScheduler::new(grid, order, config.units, EdgePredictor)?
            .with_wait_limit(config.wait_limit())
            .with_hint(hint_for(config))?;
        Ok(CpuRunner {
            host,
            resident,
            plane: SharedPlane::from_plane(input.clone()),
            completion: CompletionState::new(grid.len()),
        })
    }
}

impl PassRunner for CpuRunner {
    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn restore(&mut self, input: &Plane) -> Result<(), PredError> {
        self.plane.load_from(input);
        Ok(())
    }

    fn run(&mut self, strategy: Strategy) -> Result<(), PredError> {
        let scheduler: &dyn Scheduler = match strategy {
            Strategy::HostBarrier => &self.host,
            Strategy::DeviceResident => &self.resident,
        };
        scheduler.run_pass(&self.plane, &mut self.completion)
    }

    fn output(&mut self) -> Result<Plane, PredError> {
        Ok(self.plane.snapshot())
    }
}

struct GpuRunner {
    gpu: GpuDevice,
    wavefront: GpuWavefront,
    plane: GpuPlane,
}

impl GpuRunner {
    fn new(
        config: &Config,
        grid: TileGrid,
        order: Arc<WaveOrder>,
        input: &Plane,
    ) -> Result<Self, PredError> {
        let mut gpu = GpuDevice::new()?;
        if let Some(threads) = config.workgroup {
            gpu.set_workgroup_size(threads)?;
        }
        let wavefront = GpuWavefront::new(&gpu, grid, order)?
            .with_wait_limit(config.wait_limit())
            .with_hint(&gpu, hint_for(config))?;
        let plane = GpuPlane::upload(&gpu, input)?;
        Ok(GpuRunner { gpu, wavefront, plane })
    }
}

impl PassRunner for GpuRunner {
    fn backend(&self) -> Backend {
        Backend::Gpu
    }

    fn restore(&mut self, input: &Plane) -> Result<(), PredError> {
        self.plane.restore(&self.gpu, input)
    }

    fn run(&mut self, strategy: Strategy) -> Result<(), PredError> {
        self.wavefront.run_pass(&self.gpu, strategy, &self.plane)
    }

    fn output(&mut self) -> Result<Plane, PredError> {
        self.plane.readback(&self.gpu)
    }
}

fn hint_for(config: &Config) -> DispatchHint {
    if config.dispatch_hint {
        DispatchHint::Waves
    } else {
        DispatchHint::Native
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Validate `config`, then benchmark every configured strategy on the
/// configured backend. Returns one report per strategy, in order.
///
/// # Errors
/// Any configuration, device, dispatch or verification failure. A liveness
/// timeout is recovered from only when `config.fallback` is set.
pub fn run(config: &Config) -> Result<Vec<BenchReport>, PredError> {
    let grid = config.validate()?;
    let order = Arc::new(WaveOrder::for_grid(&grid));
    info!(
        %grid,
        waves = order.wave_count(),
        max_parallelism = order.max_parallelism(),
        backend = %config.backend,
        "wavefront prepared"
    );

    let input = Plane::residual_pattern(grid.width(), grid.height(), RESIDUAL_SEED);
    let expected = config
        .verify
        .then(|| predict_sequential(&grid, &EdgePredictor, &input));

    match config.backend {
        Backend::Cpu => {
            let mut runner = CpuRunner::new(config, grid, order, &input)?;
            run_strategies(&mut runner, config, &input, expected.as_ref())
        }
        Backend::Gpu => {
            let mut runner = GpuRunner::new(config, grid, order, &input)?;
            run_strategies(&mut runner, config, &input, expected.as_ref())
        }
    }
}

fn run_strategies<R: PassRunner>(
    runner: &mut R,
    config: &Config,
    input: &Plane,
    expected: Option<&Plane>,
) -> Result<Vec<BenchReport>, PredError> {
    let mut reports = Vec::with_capacity(config.strategies.len());
    for &strategy in &config.strategies {
        let report = match bench_strategy(runner, strategy, config, input, expected) {
            Err(err) if err.is_liveness() && config.fallback => {
                warn!(%err, "{strategy} stalled, falling back to {}", Strategy::HostBarrier);
                let mut report =
                    bench_strategy(runner, Strategy::HostBarrier, config, input, expected)?;
                report.label = format!("{} ({strategy} fallback)", report.label);
                report
            }
            other => other?,
        };
        info!(%report, "strategy done");
        reports.push(report);
    }
    Ok(reports)
}

fn bench_strategy<R: PassRunner>(
    runner: &mut R,
    strategy: Strategy,
    config: &Config,
    input: &Plane,
    expected: Option<&Plane>,
) -> Result<BenchReport, PredError> {
    let label = format!("{} {strategy}", runner.backend());

    runner.restore(input)?;
    if let Some(expected) = expected {
        runner.run(strategy)?;
        verify(&label, &runner.output()?, expected)?;
        runner.restore(input)?;
        debug!(%label, "output verified");
    }

    measure(label, config.warmup, config.times, || runner.run(strategy))
}

/// Compare a pass output against the reference.
///
/// # Errors
/// `Mismatch` at the first differing pixel in raster order.
pub fn verify(label: &str, got: &Plane, expected: &Plane) -> Result<(), PredError> {
    match got.first_mismatch(expected) {
        None => Ok(()),
        Some((x, y, got, expected)) => Err(PredError::Mismatch {
            label: label.to_string(),
            x,
            y,
            got,
            expected,
        }),
    }
}
