//! Screen partitioning into fixed-size tiles and per-tile primitive lists.

use serde::Serialize;

/// Half-open pixel rectangle `[x0, x1) × [y0, y1)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Integer pixels whose centers lie in `[min, max]`, clipped to the image.
    /// Empty when the span misses the image entirely.
    pub fn from_bounds(min_x: f32, min_y: f32, max_x: f32, max_y: f32, width: u32, height: u32) -> Self {
        let clip = |v: f32, dim: u32| v.clamp(0.0, dim as f32) as u32;
        Self {
            x0: clip(min_x.ceil(), width),
            y0: clip(min_y.ceil(), height),
            x1: clip(max_x.floor() + 1.0, width),
            y1: clip(max_y.floor() + 1.0, height),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }
}

/// For each rectangle, whether it overlaps `tile`.
pub fn compute_tile_mask(rects: &[PixelRect], tile: &PixelRect) -> Vec<bool> {
    rects
        .iter()
        .map(|r| !r.is_empty() && r.intersects(tile))
        .collect()
}

/// Tile layout of an image. Border tiles are clipped to the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        assert!(tile_size > 0, "tile size must be positive");
        Self {
            width,
            height,
            tile_size,
            tiles_x: width.div_ceil(tile_size),
            tiles_y: height.div_ceil(tile_size),
        }
    }

    pub fn num_tiles(&self) -> usize {
        (self.tiles_x * self.tiles_y) as usize
    }

    /// Pixel rectangle of tile `t` (row-major tile order).
    pub fn tile_rect(&self, t: usize) -> PixelRect {
        let tx = t as u32 % self.tiles_x;
        let ty = t as u32 / self.tiles_x;
        let x0 = tx * self.tile_size;
        let y0 = ty * self.tile_size;
        PixelRect {
            x0,
            y0,
            x1: (x0 + self.tile_size).min(self.width),
            y1: (y0 + self.tile_size).min(self.height),
        }
    }

    /// Tiles touched by `rect` as `(tx0, ty0, tx1, ty1)`, exclusive upper bounds.
    pub fn tile_span(&self, rect: &PixelRect) -> (u32, u32, u32, u32) {
        if rect.is_empty() {
            return (0, 0, 0, 0);
        }
        (
            rect.x0 / self.tile_size,
            rect.y0 / self.tile_size,
            (rect.x1 - 1) / self.tile_size + 1,
            (rect.y1 - 1) / self.tile_size + 1,
        )
    }

    /// Number of tiles touched by `rect`.
    pub fn tile_count(&self, rect: &PixelRect) -> usize {
        let (x0, y0, x1, y1) = self.tile_span(rect);
        ((x1 - x0) * (y1 - y0)) as usize
    }
}

/// Per-tile lists of record indices, sorted front to back by `(depth, index)`.
///
/// Produced once by the forward pass and reused unchanged by the backward
/// pass.
#[derive(Clone, Debug)]
pub struct TileAssignment {
    pub grid: TileGrid,
    /// `entries[ranges[t].0..ranges[t].1]` is tile `t`'s list.
    pub ranges: Vec<(u32, u32)>,
    pub entries: Vec<u32>,
}

impl TileAssignment {
    pub fn tile_entries(&self, t: usize) -> &[u32] {
        let (start, end) = self.ranges[t];
        &self.entries[start as usize..end as usize]
    }

    /// Total (tile, primitive) pairs.
    pub fn num_intersections(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_tile_mask() {
        let tile = PixelRect::new(0, 0, 16, 16);
        let rects = [PixelRect::new(10, 10, 20, 20), PixelRect::new(16, 0, 32, 16)];
        assert_eq!(compute_tile_mask(&rects, &tile), vec![true, false]);
    }

    #[test]
    fn test_empty_rect_never_overlaps() {
        let tile = PixelRect::new(0, 0, 16, 16);
        assert_eq!(compute_tile_mask(&[PixelRect::new(4, 4, 4, 9)], &tile), vec![false]);
    }

    #[test]
    fn test_border_tiles_are_clipped() {
        let grid = TileGrid::new(40, 20, 16);
        assert_eq!(grid.tiles_x, 3);
        assert_eq!(grid.tiles_y, 2);
        assert_eq!(grid.tile_rect(2), PixelRect::new(32, 0, 40, 16));
        assert_eq!(grid.tile_rect(5), PixelRect::new(32, 16, 40, 20));
    }

    #[test]
    fn test_tile_span_matches_mask() {
        let grid = TileGrid::new(64, 48, 16);
        let rect = PixelRect::new(15, 16, 33, 17);
        let (x0, y0, x1, y1) = grid.tile_span(&rect);
        for t in 0..grid.num_tiles() {
            let tx = t as u32 % grid.tiles_x;
            let ty = t as u32 / grid.tiles_x;
            let inside = tx >= x0 && tx < x1 && ty >= y0 && ty < y1;
            assert_eq!(inside, compute_tile_mask(&[rect], &grid.tile_rect(t))[0], "tile {t}");
        }
        assert_eq!(grid.tile_count(&rect), 3);
    }

    #[test]
    fn test_rect_from_bounds_clips_to_image() {
        let r = PixelRect::from_bounds(-3.5, 2.2, 4.0, 100.0, 10, 8);
        assert_eq!(r, PixelRect::new(0, 3, 5, 8));
        assert!(PixelRect::from_bounds(20.0, 0.0, 30.0, 5.0, 10, 8).is_empty());
    }
}
