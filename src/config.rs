// config.rs — Run configuration shared by the driver, benches and tests.
//
// Defaults reproduce the reference workload: a 1024×2048 plane in 16×16
// tiles, 15 untimed warm-up passes followed by 10 timed ones.

use std::fmt;
use std::time::Duration;

use crate::completion::WaitLimit;
use crate::error::PredError;
use crate::grid::{TileGrid, DEFAULT_BLOCK};
use crate::schedule::Strategy;

/// Where the passes execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Backend {
    /// OS threads; one thread per execution unit.
    Cpu,
    /// wgpu compute; one workgroup per tile.
    Gpu,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Cpu => write!(f, "cpu"),
            Backend::Gpu => write!(f, "gpu"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub width: usize,
    pub height: usize,
    pub block: usize,
    /// Timed passes per strategy.
    pub times: usize,
    /// Untimed passes before timing starts.
    pub warmup: usize,
    /// Strategies to run, in order.
    pub strategies: Vec<Strategy>,
    pub backend: Backend,
    /// CPU execution units. Ignored by the GPU backend.
    pub units: usize,
    /// GPU threads per workgroup; `None` keeps the device default. Ignored by
    /// the CPU backend.
    pub workgroup: Option<u32>,
    /// Bound on how long one tile waits for its neighbours in the
    /// device-resident strategy.
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Map dispatch slots through the wave order instead of raster order.
    pub dispatch_hint: bool,
    /// Rerun a device-resident pass that timed out with the host-barrier
    /// strategy instead of failing.
    pub fallback: bool,
    /// Compare against the sequential reference before timing.
    pub verify: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            width: 1024,
            height: 2048,
            block: DEFAULT_BLOCK,
            times: 10,
            warmup: 15,
            strategies: Strategy::ALL.to_vec(),
            backend: Backend::Cpu,
            units: default_units(),
            workgroup: None,
            timeout: Some(Duration::from_secs(2)),
            dispatch_hint: true,
            fallback: false,
            verify: false,
        }
    }
}

impl Config {
    /// Check the configuration and build the tile grid it describes.
    ///
    /// # Errors
    /// `Configuration` for a plane that is not a whole number of tiles, a
    /// zero repetition count or unit count, an empty strategy list, a block
    /// size the GPU kernel cannot pack, or a workgroup size that is not a
    /// power of two.
    pub fn validate(&self) -> Result<TileGrid, PredError> {
        let grid = TileGrid::for_image(self.width, self.height, self.block)?;
        if self.times == 0 {
            return Err(PredError::config("at least one timed pass is required"));
        }
        if self.units == 0 {
            return Err(PredError::config("at least one execution unit is required"));
        }
        if self.strategies.is_empty() {
            return Err(PredError::config("no strategy selected"));
        }
        if self.backend == Backend::Gpu && self.block % 4 != 0 {
            return Err(PredError::config(format!(
                "block size {} must be a multiple of 4 on the gpu backend",
                self.block
            )));
        }
        if let Some(threads) = self.workgroup {
            if !threads.is_power_of_two() {
                return Err(PredError::config(format!(
                    "workgroup size {threads} is not a power of two"
                )));
            }
        }
        Ok(grid)
    }

    pub fn wait_limit(&self) -> WaitLimit {
        match self.timeout {
            Some(d) => WaitLimit::Timeout(d),
            None => WaitLimit::Unbounded,
        }
    }
}

fn default_units() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
