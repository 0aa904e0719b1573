// wavepred: wavefront-scheduled intra tile prediction
// CPU threads and wgpu compute, two ways of enforcing the same dependency order
//
// Every tile depends on its left, top and top-right neighbours. Tiles on the
// same anti-diagonal wave w = x + 2y are independent and run in parallel; the
// schedulers differ only in how they make wave w's results visible to w+1.

pub mod error;
pub mod grid;
pub mod wave;
pub mod plane;
pub mod completion;
pub mod predict;
pub mod schedule;
pub mod config;
pub mod bench;
pub mod gpu;

pub use error::PredError;
pub use grid::{Tile, TileGrid};
pub use wave::WaveOrder;
