// wavepred — benchmark wavefront tile prediction.
//
//   wavepred                                  both strategies, CPU, defaults
//   wavepred --backend gpu --strategy device-resident --verify
//   wavepred --backend gpu --workgroup 16
//   RUST_LOG=wavepred=trace wavepred --width 256 --height 256

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use wavepred::bench;
use wavepred::config::{Backend, Config};
use wavepred::schedule::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    HostBarrier,
    DeviceResident,
    Both,
}

impl StrategyArg {
    fn strategies(self) -> Vec<Strategy> {
        match self {
            StrategyArg::HostBarrier => vec![Strategy::HostBarrier],
            StrategyArg::DeviceResident => vec![Strategy::DeviceResident],
            StrategyArg::Both => Strategy::ALL.to_vec(),
        }
    }
}

/// Wavefront-scheduled tile prediction: host barriers vs device-resident
/// completion flags.
#[derive(Parser, Debug)]
#[command(name = "wavepred")]
#[command(version)]
#[command(about = "Benchmark wavefront tile prediction schedules", long_about = None)]
struct Cli {
    /// Plane width in pixels
    #[arg(long, default_value_t = 1024)]
    width: usize,

    /// Plane height in pixels
    #[arg(long, default_value_t = 2048)]
    height: usize,

    /// Tile edge in pixels
    #[arg(long, default_value_t = wavepred::grid::DEFAULT_BLOCK)]
    block: usize,

    /// Timed passes per strategy
    #[arg(long, default_value_t = 10)]
    times: usize,

    /// Untimed warm-up passes per strategy
    #[arg(long, default_value_t = 15)]
    warmup: usize,

    #[arg(long, value_enum, default_value_t = StrategyArg::Both)]
    strategy: StrategyArg,

    #[arg(long, value_enum, default_value_t = Backend::Cpu)]
    backend: Backend,

    /// CPU execution units (default: available parallelism)
    #[arg(long)]
    units: Option<usize>,

    /// GPU threads per workgroup, a power of two (default: 64)
    #[arg(long)]
    workgroup: Option<u32>,

    /// Per-tile neighbour wait bound in milliseconds; 0 waits forever
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Hand out tiles in raster order instead of wave order
    #[arg(long)]
    no_dispatch_hint: bool,

    /// Rerun a stalled device-resident pass with host barriers
    #[arg(long)]
    fallback: bool,

    /// Check each strategy against the sequential reference first
    #[arg(long)]
    verify: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> Config {
        let defaults = Config::default();
        Config {
            width: self.width,
            height: self.height,
            block: self.block,
            times: self.times,
            warmup: self.warmup,
            strategies: self.strategy.strategies(),
            backend: self.backend,
            units: self.units.unwrap_or(defaults.units),
            workgroup: self.workgroup,
            timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            dispatch_hint: !self.no_dispatch_hint,
            fallback: self.fallback,
            verify: self.verify,
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("wavepred=debug"),
        _ => EnvFilter::new("wavepred=trace"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = cli.into_config();

    match bench::run(&config) {
        Ok(reports) => {
            for report in reports {
                println!("{report}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("ERROR: {err}");
            ExitCode::FAILURE
        }
    }
}
