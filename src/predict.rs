// predict.rs — The per-tile prediction kernel seen by the schedulers.
//
// Schedulers treat prediction as a black box: "compute tile t in place, given
// that its left, top and top-right neighbours are finished". `TilePredictor`
// is that box. The production arithmetic lives elsewhere; this module ships
// `EdgePredictor`, a deterministic reference with exactly the dependency
// footprint the schedulers have to respect, so that a wrongly ordered pass
// shows up as a byte mismatch instead of passing silently.
//
// EDGE PREDICTOR
// ──────────────
// For a tile at pixel origin (x0, y0), block B:
//
//            above[0 .. B)     above[B .. 2B)
//          +----------------+----------------+
//          |   top tile     | top-right tile |   row y0-1
//   +------+----------------+----------------+
//   | left |                |
//   | [j]  |    tile (i,j)  |
//   +------+----------------+
//
//   pred(i, j) = (above[min(i + j + 1, 2B - 1)] + left[j] + 1) >> 1
//   out(i, j)  = residual(i, j) + pred(i, j)   (mod 256)
//
// Missing edges are substituted so the footprint never leaves the neighbour
// set: no top-right → repeat above[B-1]; no top → every above[k] is the
// first left pixel (or 128 with no left either); no left → every left[j] is
// above[0] (or 128 with no top either).
//
// The GPU shader (shaders/wavefront.wgsl) implements the same arithmetic so
// CPU and GPU planes compare byte-for-byte.

use crate::grid::{Neighbor, Neighbors, Tile, TileGrid};
use crate::plane::{Plane, SharedPlane};

/// Value used when a tile has no neighbour to predict from.
pub const NEUTRAL: u32 = 128;

/// Computes one tile of the plane in place.
///
/// Implementations may read any pixel of the tile's neighbour set and the
/// tile's own pixels, and must write only inside the tile.
pub trait TilePredictor: Sync {
    fn predict(&self, grid: &TileGrid, plane: &SharedPlane, tile: Tile);
}

/// Reference diagonal/left edge predictor. See the module comment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgePredictor;

impl TilePredictor for EdgePredictor {
    fn predict(&self, grid: &TileGrid, plane: &SharedPlane, tile: Tile) {
        let b = grid.block();
        let (x0, y0) = grid.origin(tile);
        let n = grid.neighbors(tile);

        let (above, left) = edges(b, x0, y0, &n, |x, y| plane.load(x, y) as u32);

        for j in 0..b {
            for i in 0..b {
                let a = above[(i + j + 1).min(2 * b - 1)];
                let pred = (a + left[j] + 1) >> 1;
                let residual = plane.load(x0 + i, y0 + j) as u32;
                plane.store(x0 + i, y0 + j, (residual + pred) as u8);
            }
        }
    }
}

/// Gather the `above` (2B) and `left` (B) edge arrays for a tile.
fn edges(
    b: usize,
    x0: usize,
    y0: usize,
    n: &Neighbors,
    px: impl Fn(usize, usize) -> u32,
) -> (Vec<u32>, Vec<u32>) {
    let has_left = n.has(Neighbor::Left);
    let has_top = n.has(Neighbor::Top);
    let has_top_right = n.has(Neighbor::TopRight);

    let above: Vec<u32> = if has_top {
        (0..2 * b)
            .map(|k| {
                if k < b || has_top_right {
                    px(x0 + k, y0 - 1)
                } else {
                    px(x0 + b - 1, y0 - 1)
                }
            })
            .collect()
    } else {
        let fill = if has_left { px(x0 - 1, y0) } else { NEUTRAL };
        vec![fill; 2 * b]
    };

    let left: Vec<u32> = if has_left {
        (0..b).map(|j| px(x0 - 1, y0 + j)).collect()
    } else {
        let fill = if has_top { above[0] } else { NEUTRAL };
        vec![fill; b]
    };

    (above, left)
}

/// Run `predictor` over every tile in raster order on one thread.
///
/// Raster order visits left, top and top-right before each tile, so this is
/// the ground truth every parallel schedule must reproduce.
pub fn predict_sequential<P: TilePredictor>(
    grid: &TileGrid,
    predictor: &P,
    input: &Plane,
) -> Plane {
    let plane = SharedPlane::from_plane(input.clone());
    for tile in grid.tiles() {
        predictor.predict(grid, &plane, tile);
    }
    plane.into_plane()
}
