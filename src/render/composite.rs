//! Per-pixel front-to-back compositing shared by both backends and the
//! backward pass.

use crate::render::project::ProjectedPrimitive;
use crate::render::tile::PixelRect;
use crate::render::RenderConfig;
use nalgebra::{Vector2, Vector3};

/// One primitive that contributed to a pixel.
#[derive(Clone, Copy, Debug)]
pub struct Contribution {
    /// Index into the record list.
    pub slot: usize,
    /// Footprint weight at the pixel.
    pub weight: f32,
    /// `min(cap, opacity · weight)`.
    pub alpha: f32,
    /// Whether the alpha cap was active.
    pub capped: bool,
    /// Transmittance before this contribution.
    pub transmittance: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct PixelResult {
    pub color: Vector3<f32>,
    pub depth: f32,
    pub alpha: f32,
    pub transmittance: f32,
}

/// Composite the sorted `entries` at pixel `(x, y)`, calling `visit` for
/// every contribution in front-to-back order.
pub fn walk_pixel<F>(
    records: &[ProjectedPrimitive],
    entries: &[u32],
    x: u32,
    y: u32,
    config: &RenderConfig,
    mut visit: F,
) -> PixelResult
where
    F: FnMut(&Contribution),
{
    let pixel = Vector2::new(x as f32, y as f32);
    let mut color = Vector3::zeros();
    let mut depth = 0.0f32;
    let mut acc = 0.0f32;
    let mut t = 1.0f32;

    for &slot in entries {
        let rec = &records[slot as usize];
        if !rec.rect.contains(x, y) {
            continue;
        }
        let weight = rec.weight(&pixel);
        let raw = rec.opacity * weight;
        let alpha = raw.min(config.alpha_cap);
        if alpha < config.min_alpha {
            continue;
        }

        visit(&Contribution {
            slot: slot as usize,
            weight,
            alpha,
            capped: raw >= config.alpha_cap,
            transmittance: t,
        });

        let w = t * alpha;
        color += rec.color.color * w;
        depth += rec.depth * w;
        acc += w;
        t *= 1.0 - alpha;
        if t < config.transmittance_floor {
            break;
        }
    }

    PixelResult {
        color: color + config.background() * t,
        depth,
        alpha: acc,
        transmittance: t,
    }
}

/// Rendered pixels of one tile, row-major within `rect`.
#[derive(Clone, Debug)]
pub struct TileImage {
    pub rect: PixelRect,
    pub color: Vec<Vector3<f32>>,
    pub depth: Vec<f32>,
    pub alpha: Vec<f32>,
}

/// Render one tile from its sorted record list.
pub fn render_tile(records: &[ProjectedPrimitive], entries: &[u32], rect: PixelRect, config: &RenderConfig) -> TileImage {
    let n = (rect.width() * rect.height()) as usize;
    if entries.len() <= config.skip_threshold {
        return TileImage {
            rect,
            color: vec![config.background(); n],
            depth: vec![0.0; n],
            alpha: vec![0.0; n],
        };
    }

    let mut color = Vec::with_capacity(n);
    let mut depth = Vec::with_capacity(n);
    let mut alpha = Vec::with_capacity(n);
    for y in rect.y0..rect.y1 {
        for x in rect.x0..rect.x1 {
            let px = walk_pixel(records, entries, x, y, config, |_| {});
            color.push(px.color);
            depth.push(px.depth);
            alpha.push(px.alpha);
        }
    }
    TileImage {
        rect,
        color,
        depth,
        alpha,
    }
}

/// Full-frame buffers assembled from tiles.
pub(crate) struct Frame {
    pub color: Vec<Vector3<f32>>,
    pub depth: Vec<f32>,
    pub alpha: Vec<f32>,
}

pub(crate) fn assemble(width: u32, height: u32, tiles: Vec<TileImage>) -> Frame {
    let n = (width * height) as usize;
    let mut frame = Frame {
        color: vec![Vector3::zeros(); n],
        depth: vec![0.0; n],
        alpha: vec![0.0; n],
    };
    for tile in tiles {
        let mut k = 0;
        for y in tile.rect.y0..tile.rect.y1 {
            for x in tile.rect.x0..tile.rect.x1 {
                let i = (y * width + x) as usize;
                frame.color[i] = tile.color[k];
                frame.depth[i] = tile.depth[k];
                frame.alpha[i] = tile.alpha[k];
                k += 1;
            }
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sh::ShColor;
    use crate::render::footprint::{Ellipse, Footprint};
    use approx::assert_relative_eq;

    fn record(opacity: f32, depth: f32, color: Vector3<f32>) -> ProjectedPrimitive {
        ProjectedPrimitive {
            index: 0,
            mean: Vector2::new(2.0, 2.0),
            depth,
            color: ShColor {
                color,
                clamped: [false; 3],
            },
            opacity,
            radius: 6.0,
            rect: PixelRect::new(0, 0, 5, 5),
            footprint: Footprint::Ellipse(Ellipse::from_cov([100.0, 0.0, 100.0]).unwrap()),
        }
    }

    #[test]
    fn test_zero_opacity_composite_is_background() {
        let records = vec![record(0.0, 1.0, Vector3::new(1.0, 0.0, 0.0))];
        for white in [false, true] {
            let config = RenderConfig {
                white_background: white,
                ..RenderConfig::default()
            };
            let px = walk_pixel(&records, &[0], 2, 2, &config, |_| panic!("no contribution expected"));
            assert_eq!(px.color, config.background());
            assert_eq!(px.alpha, 0.0);
            assert_eq!(px.transmittance, 1.0);
        }
    }

    #[test]
    fn test_front_to_back_order_and_cap() {
        let records = vec![
            record(1.0, 1.0, Vector3::new(1.0, 0.0, 0.0)),
            record(1.0, 2.0, Vector3::new(0.0, 1.0, 0.0)),
        ];
        let config = RenderConfig::default();
        let mut seen = Vec::new();
        let px = walk_pixel(&records, &[0, 1], 2, 2, &config, |c| seen.push(*c));
        // Front record saturates at the cap and the second one still sees T = 0.01.
        assert_eq!(seen.len(), 2);
        assert!(seen[0].capped);
        assert_relative_eq!(seen[1].transmittance, 0.01, epsilon = 1e-6);
        assert_relative_eq!(px.color.x, 0.99, epsilon = 1e-5);
        assert_relative_eq!(px.color.y, 0.01 * 0.99, epsilon = 1e-5);
        assert_relative_eq!(px.alpha, 0.99 + 0.01 * 0.99, epsilon = 1e-5);
        assert_relative_eq!(px.depth, 0.99 + 2.0 * 0.0099, epsilon = 1e-5);
    }

    #[test]
    fn test_early_termination() {
        let records: Vec<_> = (0..4).map(|i| record(1.0, i as f32 + 1.0, Vector3::repeat(1.0))).collect();
        let mut count = 0;
        walk_pixel(&records, &[0, 1, 2, 3], 2, 2, &RenderConfig::default(), |_| count += 1);
        // T: 1 -> 0.01 -> 1e-4 (below the floor) -> stop.
        assert_eq!(count, 2);
    }

    #[test]
    fn test_skip_threshold_emits_background() {
        let records = vec![record(1.0, 1.0, Vector3::new(1.0, 0.0, 0.0))];
        let config = RenderConfig {
            skip_threshold: 1,
            white_background: true,
            ..RenderConfig::default()
        };
        let tile = render_tile(&records, &[0], PixelRect::new(0, 0, 4, 4), &config);
        assert!(tile.color.iter().all(|c| *c == Vector3::repeat(1.0)));
        assert!(tile.alpha.iter().all(|a| *a == 0.0));
    }
}
