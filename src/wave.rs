// wave.rs — Diagonal wave order over a tile grid.
//
// Wave w holds every tile with x + 2y = w. For a 4×3 grid:
//
//        x=0  x=1  x=2  x=3
//   y=0    0    1    2    3
//   y=1    2    3    4    5
//   y=2    4    5    6    7
//
// There are tile_w + 2(tile_h - 1) waves. Membership is computed in closed
// form, never by scanning the grid:
//
//   offset_y = 0                       if w < tile_w
//            = (w - tile_w) / 2 + 1    otherwise
//   ny       = min(w/2 + 1, tile_h) - offset_y
//   tiles    = { (w - 2y, y) : y in [offset_y, offset_y + ny) }
//
// offset_y is the first row whose x = w - 2y fits inside the grid; the min()
// clamps the last row to both x ≥ 0 and y < tile_h. When ny ≤ 0 the wave is
// empty (every odd wave of a one-column grid, for instance) and the span
// records len = 0 rather than going negative.
//
// The flattened dispatch order concatenates the waves (increasing w, then
// increasing y). It is only a hint for which tile a device-resident unit
// should pick up; correctness never depends on it.

use crate::grid::{Tile, TileGrid};

/// Number of waves for a `tile_w × tile_h` grid; 0 for an empty grid.
pub fn wave_count(tile_w: usize, tile_h: usize) -> usize {
    if tile_w == 0 || tile_h == 0 {
        return 0;
    }
    tile_w + (tile_h - 1) * 2
}

/// The scalar arguments handed to one host-barrier invocation: the wave index,
/// the first row it touches, and how many tiles it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveSpan {
    pub wave: usize,
    pub offset_y: usize,
    pub len: usize,
}

impl WaveSpan {
    /// Closed-form span for wave `w`.
    pub fn compute(w: usize, tile_w: usize, tile_h: usize) -> Self {
        let offset_y = if w < tile_w { 0 } else { (w - tile_w) / 2 + 1 };
        let last = ((w >> 1) + 1).min(tile_h);
        let len = last.saturating_sub(offset_y);
        WaveSpan { wave: w, offset_y, len }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The `i`-th tile of the wave (increasing y).
    #[inline]
    pub fn tile(&self, i: usize) -> Tile {
        debug_assert!(i < self.len);
        let y = self.offset_y + i;
        Tile::new(self.wave - 2 * y, y)
    }

    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.len).map(move |i| self.tile(i))
    }
}

/// Wave membership and dispatch order for one grid shape.
#[derive(Debug, Clone)]
pub struct WaveOrder {
    tile_w: usize,
    tile_h: usize,
    spans: Vec<WaveSpan>,
    /// Tile linear indices, wave-major. `u32` so it uploads to the GPU as-is.
    dispatch: Vec<u32>,
}

impl WaveOrder {
    /// Build the wave order for a `tile_w × tile_h` grid. An empty grid
    /// yields zero waves and an empty dispatch order.
    pub fn build(tile_w: usize, tile_h: usize) -> Self {
        let count = wave_count(tile_w, tile_h);
        let spans: Vec<WaveSpan> = (0..count)
            .map(|w| WaveSpan::compute(w, tile_w, tile_h))
            .collect();

        let mut dispatch = Vec::with_capacity(tile_w * tile_h);
        for span in &spans {
            dispatch.extend(span.tiles().map(|t| (tile_w * t.y + t.x) as u32));
        }

        WaveOrder { tile_w, tile_h, spans, dispatch }
    }

    pub fn for_grid(grid: &TileGrid) -> Self {
        Self::build(grid.tile_w(), grid.tile_h())
    }

    pub fn tile_w(&self) -> usize {
        self.tile_w
    }

    pub fn tile_h(&self) -> usize {
        self.tile_h
    }

    pub fn wave_count(&self) -> usize {
        self.spans.len()
    }

    pub fn span(&self, w: usize) -> WaveSpan {
        self.spans[w]
    }

    pub fn spans(&self) -> &[WaveSpan] {
        &self.spans
    }

    /// Tiles of wave `w` in increasing y.
    pub fn wave(&self, w: usize) -> Vec<Tile> {
        self.spans[w].tiles().collect()
    }

    /// Size of the widest wave: the most tiles that can ever run at once.
    pub fn max_parallelism(&self) -> usize {
        self.spans.iter().map(|s| s.len).max().unwrap_or(0)
    }

    /// Flattened wave-major permutation of tile linear indices.
    pub fn dispatch_order(&self) -> &[u32] {
        &self.dispatch
    }
}

/// Brute-force membership of wave `w`: scan every tile and keep those with
/// `x + 2y == w`, ordered by y. Used to cross-check the closed form.
pub fn enumerate_wave(tile_w: usize, tile_h: usize, w: usize) -> Vec<Tile> {
    let mut out = Vec::new();
    for y in 0..tile_h {
        for x in 0..tile_w {
            if x + 2 * y == w {
                out.push(Tile::new(x, y));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiles(pairs: &[(usize, usize)]) -> Vec<Tile> {
        pairs.iter().map(|&(x, y)| Tile::new(x, y)).collect()
    }

    #[test]
    fn test_4x3_membership() {
        let order = WaveOrder::build(4, 3);
        assert_eq!(order.wave_count(), 8);

        let expected = [
            tiles(&[(0, 0)]),
            tiles(&[(1, 0)]),
            tiles(&[(2, 0), (0, 1)]),
            tiles(&[(3, 0), (1, 1)]),
            tiles(&[(2, 1), (0, 2)]),
            tiles(&[(3, 1), (1, 2)]),
            tiles(&[(2, 2)]),
            tiles(&[(3, 2)]),
        ];
        for (w, want) in expected.iter().enumerate() {
            assert_eq!(&order.wave(w), want, "wave {w}");
        }

        let total: usize = order.spans().iter().map(|s| s.len).sum();
        assert_eq!(total, 12);
    }

    #[test]
    fn test_4x3_dispatch_order() {
        let order = WaveOrder::build(4, 3);
        assert_eq!(
            order.dispatch_order(),
            &[0, 1, 2, 4, 3, 5, 6, 8, 7, 9, 10, 11]
        );
    }

    #[test]
    fn test_wave_count_formula() {
        assert_eq!(wave_count(1, 1), 1);
        assert_eq!(wave_count(4, 3), 8);
        assert_eq!(wave_count(9, 1), 9);
        assert_eq!(wave_count(1, 9), 17);
        assert_eq!(wave_count(0, 5), 0);
        assert_eq!(wave_count(5, 0), 0);
        assert_eq!(wave_count(0, 0), 0);
    }

    #[test]
    fn test_empty_grid() {
        let order = WaveOrder::build(0, 0);
        assert_eq!(order.wave_count(), 0);
        assert!(order.dispatch_order().is_empty());
        assert_eq!(order.max_parallelism(), 0);
    }

    #[test]
    fn test_single_column_odd_waves_empty() {
        let order = WaveOrder::build(1, 9);
        for w in 0..order.wave_count() {
            let span = order.span(w);
            if w % 2 == 1 {
                assert!(span.is_empty(), "wave {w} should be empty");
            } else {
                assert_eq!(order.wave(w), vec![Tile::new(0, w / 2)]);
            }
        }
    }

    #[test]
    fn test_span_at_grid_boundaries() {
        // Last wave of a tall narrow grid: offset_y lands on the final row.
        let span = WaveSpan::compute(16, 1, 9);
        assert_eq!(span, WaveSpan { wave: 16, offset_y: 8, len: 1 });

        // Wave just past the last one yields nothing rather than indexing
        // past the grid.
        let span = WaveSpan::compute(17, 1, 9);
        assert!(span.is_empty());
        let span = WaveSpan::compute(8, 4, 3);
        assert!(span.is_empty());
    }

    #[test]
    fn test_closed_form_matches_enumeration() {
        for &(tw, th) in &[(1, 1), (4, 3), (8, 8), (17, 13), (1, 9), (9, 1), (2, 7), (6, 2)] {
            let order = WaveOrder::build(tw, th);
            for w in 0..order.wave_count() {
                assert_eq!(order.wave(w), enumerate_wave(tw, th, w), "{tw}×{th} wave {w}");
            }
        }
    }

    #[test]
    fn test_max_parallelism() {
        // 8×8: widest diagonal holds 4 tiles (x = w - 2y for y = 0..3).
        assert_eq!(WaveOrder::build(8, 8).max_parallelism(), 4);
        assert_eq!(WaveOrder::build(9, 1).max_parallelism(), 1);
    }
}
