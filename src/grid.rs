// grid.rs — Tile grid and the neighbour-dependency relation.
//
// The image is cut into B×B tiles. Predicting a tile reads pixels from up to
// three tiles that must already be finished:
//
//            +--------+--------+
//            |  top   |  top-  |
//            | (x,y-1)| right  |
//   +--------+--------+(x+1,y-1)
//   |  left  |  tile  |
//   | (x-1,y)| (x,y)  |
//   +--------+--------+
//
// Tiles on the left column have no left neighbour, tiles on the top row have
// neither top nor top-right, tiles on the right column have no top-right.
//
// WAVE INDEX
// ──────────
// w(x, y) = x + 2y. Each of the three edges lowers w strictly:
//   left      : (x-1) + 2y       = w - 1
//   top       : x + 2(y-1)       = w - 2
//   top-right : (x+1) + 2(y-1)   = w - 1
// so every tile with the same w is independent of every other, and processing
// waves in increasing w respects all dependencies.

use std::fmt;

use crate::error::PredError;

/// Default block size in pixels (tiles are `DEFAULT_BLOCK × DEFAULT_BLOCK`).
pub const DEFAULT_BLOCK: usize = 16;

/// A tile coordinate in tile units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tile {
    pub x: usize,
    pub y: usize,
}

impl Tile {
    pub const fn new(x: usize, y: usize) -> Self {
        Tile { x, y }
    }

    /// Diagonal wave this tile belongs to.
    #[inline]
    pub const fn wave(&self) -> usize {
        self.x + 2 * self.y
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Which of the three dependency edges a neighbour sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    Left,
    Top,
    TopRight,
}

impl Neighbor {
    pub const ALL: [Neighbor; 3] = [Neighbor::Left, Neighbor::Top, Neighbor::TopRight];
}

/// The clipped dependency set of one tile. At most three entries, no heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbors {
    left: Option<Tile>,
    top: Option<Tile>,
    top_right: Option<Tile>,
}

impl Neighbors {
    pub fn get(&self, which: Neighbor) -> Option<Tile> {
        match which {
            Neighbor::Left => self.left,
            Neighbor::Top => self.top,
            Neighbor::TopRight => self.top_right,
        }
    }

    pub fn has(&self, which: Neighbor) -> bool {
        self.get(which).is_some()
    }

    /// Present neighbours in left, top, top-right order.
    pub fn iter(&self) -> impl Iterator<Item = Tile> + '_ {
        [self.left, self.top, self.top_right].into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.top.is_none() && self.top_right.is_none()
    }
}

/// A non-empty `tile_w × tile_h` grid of `block × block` pixel tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    tile_w: usize,
    tile_h: usize,
    block: usize,
}

impl TileGrid {
    /// Build a grid directly from tile counts.
    ///
    /// # Errors
    /// `PredError::Configuration` if either dimension or the block size is 0.
    pub fn new(tile_w: usize, tile_h: usize, block: usize) -> Result<Self, PredError> {
        if tile_w == 0 || tile_h == 0 {
            return Err(PredError::config(format!(
                "tile grid must be non-empty (got {tile_w}×{tile_h})"
            )));
        }
        if block == 0 {
            return Err(PredError::config("block size must be positive"));
        }
        Ok(TileGrid { tile_w, tile_h, block })
    }

    /// Derive the grid from image dimensions.
    ///
    /// # Errors
    /// `PredError::Configuration` if the image is not an exact multiple of
    /// `block` in both dimensions, or would produce an empty grid.
    pub fn for_image(width: usize, height: usize, block: usize) -> Result<Self, PredError> {
        if block == 0 {
            return Err(PredError::config("block size must be positive"));
        }
        if width % block != 0 || height % block != 0 {
            return Err(PredError::config(format!(
                "image {width}×{height} is not a multiple of block size {block}"
            )));
        }
        Self::new(width / block, height / block, block)
    }

    pub fn tile_w(&self) -> usize {
        self.tile_w
    }

    pub fn tile_h(&self) -> usize {
        self.tile_h
    }

    pub fn block(&self) -> usize {
        self.block
    }

    /// Image width in pixels.
    pub fn width(&self) -> usize {
        self.tile_w * self.block
    }

    /// Image height in pixels.
    pub fn height(&self) -> usize {
        self.tile_h * self.block
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.tile_w * self.tile_h
    }

    /// Always false; kept for the `len`/`is_empty` pair.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, tile: Tile) -> bool {
        tile.x < self.tile_w && tile.y < self.tile_h
    }

    /// Row-major linear index `tile_w * y + x`.
    #[inline]
    pub fn index_of(&self, tile: Tile) -> usize {
        debug_assert!(self.contains(tile), "{tile} outside {self}");
        self.tile_w * tile.y + tile.x
    }

    /// Inverse of [`index_of`](Self::index_of).
    #[inline]
    pub fn tile_at(&self, index: usize) -> Tile {
        debug_assert!(index < self.len(), "tile index {index} out of range");
        Tile::new(index % self.tile_w, index / self.tile_w)
    }

    /// All tiles in raster order.
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.tile_h).flat_map(move |y| (0..self.tile_w).map(move |x| Tile::new(x, y)))
    }

    /// The tiles `tile` depends on, clipped to the grid.
    pub fn neighbors(&self, tile: Tile) -> Neighbors {
        let left = (tile.x > 0).then(|| Tile::new(tile.x - 1, tile.y));
        let top = (tile.y > 0).then(|| Tile::new(tile.x, tile.y - 1));
        let top_right =
            (tile.y > 0 && tile.x + 1 < self.tile_w).then(|| Tile::new(tile.x + 1, tile.y - 1));
        Neighbors { left, top, top_right }
    }

    /// Pixel origin (top-left corner) of a tile.
    pub fn origin(&self, tile: Tile) -> (usize, usize) {
        (tile.x * self.block, tile.y * self.block)
    }
}

impl fmt::Display for TileGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}×{} tiles of {}px ({}×{} image)",
            self.tile_w,
            self.tile_h,
            self.block,
            self.width(),
            self.height()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_image_reference_size() {
        let grid = TileGrid::for_image(1024, 2048, 16).unwrap();
        assert_eq!(grid.tile_w(), 64);
        assert_eq!(grid.tile_h(), 128);
        assert_eq!(grid.len(), 8192);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(TileGrid::new(0, 3, 16).is_err());
        assert!(TileGrid::new(4, 0, 16).is_err());
        assert!(TileGrid::new(4, 3, 0).is_err());
        assert!(TileGrid::for_image(100, 64, 16).is_err());
        assert!(TileGrid::for_image(64, 100, 16).is_err());
        assert!(TileGrid::for_image(0, 64, 16).is_err());
    }

    #[test]
    fn test_corner_neighbors() {
        let grid = TileGrid::new(4, 3, 16).unwrap();

        // Origin: nothing to wait for.
        assert!(grid.neighbors(Tile::new(0, 0)).is_empty());

        // Top row: only left.
        let n = grid.neighbors(Tile::new(2, 0));
        assert_eq!(n.iter().collect::<Vec<_>>(), vec![Tile::new(1, 0)]);

        // Left column: top and top-right.
        let n = grid.neighbors(Tile::new(0, 1));
        assert!(!n.has(Neighbor::Left));
        assert_eq!(n.get(Neighbor::Top), Some(Tile::new(0, 0)));
        assert_eq!(n.get(Neighbor::TopRight), Some(Tile::new(1, 0)));

        // Right column: no top-right.
        let n = grid.neighbors(Tile::new(3, 2));
        assert_eq!(n.len(), 2);
        assert!(!n.has(Neighbor::TopRight));

        // Interior: all three.
        let n = grid.neighbors(Tile::new(1, 1));
        assert_eq!(
            n.iter().collect::<Vec<_>>(),
            vec![Tile::new(0, 1), Tile::new(1, 0), Tile::new(2, 0)]
        );
    }

    #[test]
    fn test_single_column_has_no_top_right() {
        let grid = TileGrid::new(1, 5, 16).unwrap();
        for tile in grid.tiles() {
            assert!(!grid.neighbors(tile).has(Neighbor::TopRight));
            assert!(!grid.neighbors(tile).has(Neighbor::Left));
        }
    }

    #[test]
    fn test_index_round_trip() {
        let grid = TileGrid::new(5, 3, 8).unwrap();
        for (i, tile) in grid.tiles().enumerate() {
            assert_eq!(grid.index_of(tile), i);
            assert_eq!(grid.tile_at(i), tile);
        }
    }

    #[test]
    fn test_neighbors_lower_wave() {
        let grid = TileGrid::new(7, 6, 16).unwrap();
        for tile in grid.tiles() {
            for n in grid.neighbors(tile).iter() {
                assert!(n.wave() < tile.wave(), "{n} does not precede {tile}");
            }
        }
    }
}
