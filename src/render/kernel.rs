//! Kernel backend: a GPU-style pipeline on the rayon pool.
//!
//! 1. Every record emits one `(tile << 32 | depth bits, slot)` key per
//!    overlapped tile into a bounded key buffer.
//! 2. Keys are sorted globally; positive depths sort correctly by their
//!    IEEE bit pattern.
//! 3. A linear scan derives each tile's range in the sorted buffer.
//! 4. Tiles are composited as an independent parallel grid.

use crate::render::composite::{render_tile, TileImage};
use crate::render::project::ProjectedPrimitive;
use crate::render::tile::{TileAssignment, TileGrid};
use crate::render::{KernelCapacity, RenderConfig, RenderError};
use rayon::prelude::*;

fn tile_keys(rec: &ProjectedPrimitive, slot: usize, grid: &TileGrid) -> impl Iterator<Item = (u64, u32)> {
    let (x0, y0, x1, y1) = grid.tile_span(&rec.rect);
    let depth_bits = rec.depth.to_bits() as u64;
    let tiles_x = grid.tiles_x;
    (y0..y1).flat_map(move |ty| {
        (x0..x1).map(move |tx| {
            let tile = (ty * tiles_x + tx) as u64;
            ((tile << 32) | depth_bits, slot as u32)
        })
    })
}

pub fn assign(
    records: &[ProjectedPrimitive],
    grid: &TileGrid,
    capacity: &KernelCapacity,
) -> Result<TileAssignment, RenderError> {
    if records.len() > capacity.max_primitives {
        return Err(RenderError::CapacityExceeded {
            what: "primitive",
            required: records.len(),
            capacity: capacity.max_primitives,
        });
    }

    let num_keys: usize = records.par_iter().map(|r| grid.tile_count(&r.rect)).sum();
    if num_keys > capacity.max_keys {
        return Err(RenderError::CapacityExceeded {
            what: "key",
            required: num_keys,
            capacity: capacity.max_keys,
        });
    }

    let mut keys: Vec<(u64, u32)> = records
        .par_iter()
        .enumerate()
        .flat_map_iter(|(slot, rec)| tile_keys(rec, slot, grid))
        .collect();
    keys.par_sort_unstable();

    let mut ranges = vec![(0u32, 0u32); grid.num_tiles()];
    let mut start = 0usize;
    while start < keys.len() {
        let tile = (keys[start].0 >> 32) as usize;
        let mut end = start + 1;
        while end < keys.len() && (keys[end].0 >> 32) as usize == tile {
            end += 1;
        }
        ranges[tile] = (start as u32, end as u32);
        start = end;
    }

    Ok(TileAssignment {
        grid: *grid,
        ranges,
        entries: keys.into_iter().map(|(_, slot)| slot).collect(),
    })
}

pub fn composite(records: &[ProjectedPrimitive], assignment: &TileAssignment, config: &RenderConfig) -> Vec<TileImage> {
    let grid = &assignment.grid;
    (0..grid.num_tiles())
        .into_par_iter()
        .map(|t| render_tile(records, assignment.tile_entries(t), grid.tile_rect(t), config))
        .collect()
}
