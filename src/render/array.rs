//! Array backend: per-tile index lists built with `compute_tile_mask`, then
//! a sequential tile loop.

use crate::render::composite::{render_tile, TileImage};
use crate::render::project::ProjectedPrimitive;
use crate::render::tile::{compute_tile_mask, PixelRect, TileAssignment, TileGrid};
use crate::render::RenderConfig;

pub fn assign(records: &[ProjectedPrimitive], grid: &TileGrid) -> TileAssignment {
    let rects: Vec<PixelRect> = records.iter().map(|r| r.rect).collect();
    let mut ranges = Vec::with_capacity(grid.num_tiles());
    let mut entries = Vec::new();

    for t in 0..grid.num_tiles() {
        let mask = compute_tile_mask(&rects, &grid.tile_rect(t));
        let mut list: Vec<u32> = mask
            .iter()
            .enumerate()
            .filter(|(_, &hit)| hit)
            .map(|(slot, _)| slot as u32)
            .collect();
        list.sort_by(|&a, &b| {
            records[a as usize]
                .depth
                .total_cmp(&records[b as usize].depth)
                .then(a.cmp(&b))
        });

        let start = entries.len() as u32;
        entries.extend_from_slice(&list);
        ranges.push((start, entries.len() as u32));
    }

    TileAssignment {
        grid: *grid,
        ranges,
        entries,
    }
}

pub fn composite(records: &[ProjectedPrimitive], assignment: &TileAssignment, config: &RenderConfig) -> Vec<TileImage> {
    let grid = &assignment.grid;
    (0..grid.num_tiles())
        .map(|t| render_tile(records, assignment.tile_entries(t), grid.tile_rect(t), config))
        .collect()
}
