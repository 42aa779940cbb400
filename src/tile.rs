// tile.rs — Tile planning.
//
// An image is cut into square-edge tiles, row-major, with the last column
// and row clipped to the image:
//
//   ┌──────┬──────┬───┐
//   │  0   │  1   │ 2 │   edge = 6, image 15×9
//   │      │      │   │
//   ├──────┼──────┼───┤
//   │  3   │  4   │ 5 │
//   └──────┴──────┴───┘
//
// Each tile is read with `prepadding` context pixels on every side (edge
// replicated outside the image) plus extra right/bottom padding that makes
// the padded footprint a multiple of the model alignment. The network crops
// the context away again; only the interior reaches the output.
//
// Edge selection: start from the requested size (or AUTO_TILE_SIZE), halve
// while the largest padded tile's working set exceeds budget × headroom, and
// give the minimum viable edge (2·prepadding + 1) one last try before
// reporting a configuration error.

use tracing::debug;

use crate::error::{Result, UpscaleError};

/// Starting edge when the caller asks for automatic tile sizing.
pub const AUTO_TILE_SIZE: usize = 400;

/// Axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Rect { x, y, width, height }
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn right(&self) -> usize {
        self.x + self.width
    }

    pub fn bottom(&self) -> usize {
        self.y + self.height
    }

    pub fn scaled(&self, s: usize) -> Rect {
        Rect::new(self.x * s, self.y * s, self.width * s, self.height * s)
    }
}

/// Context pixels read around a tile's interior, per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub left: usize,
    pub top: usize,
    pub right: usize,
    pub bottom: usize,
}

/// One tile: where it reads, how much context, where it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRegion {
    /// Row-major position in the plan.
    pub index: usize,
    /// Interior in input pixels.
    pub input: Rect,
    /// May extend past the image edge.
    pub padding: Padding,
    /// `input` scaled to output pixels.
    pub output: Rect,
}

impl TileRegion {
    pub fn padded_width(&self) -> usize {
        self.padding.left + self.input.width + self.padding.right
    }

    pub fn padded_height(&self) -> usize {
        self.padding.top + self.input.height + self.padding.bottom
    }

    /// Top-left of the padded footprint in image coordinates; negative when
    /// the padding hangs off the image.
    pub fn padded_origin(&self) -> (isize, isize) {
        (
            self.input.x as isize - self.padding.left as isize,
            self.input.y as isize - self.padding.top as isize,
        )
    }
}

/// Inputs to the planner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileParams {
    /// Requested edge; 0 = automatic.
    pub tile_size: usize,
    pub prepadding: usize,
    pub scale: usize,
    pub alignment: usize,
    /// Fraction of the budget one tile may use.
    pub headroom: f64,
}

impl TileParams {
    /// Smallest edge that still leaves an interior after cropping context.
    pub fn min_edge(&self) -> usize {
        2 * self.prepadding + 1
    }

    /// Padded extent for an interior of `n` pixels: `(total, extra)` where
    /// `extra` is the alignment padding added on the far side.
    pub fn padded_extent(&self, n: usize) -> (usize, usize) {
        let base = n + 2 * self.prepadding;
        let align = self.alignment.max(1);
        let extra = (align - base % align) % align;
        (base + extra, extra)
    }
}

/// An ordered tile partition of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
    pub width: usize,
    pub height: usize,
    /// Resolved square edge.
    pub edge: usize,
    pub cols: usize,
    pub rows: usize,
    pub tiles: Vec<TileRegion>,
}

impl TilePlan {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Largest padded footprint in the plan.
    pub fn max_padded(&self) -> (usize, usize) {
        self.tiles.iter().fold((0, 0), |(w, h), t| {
            (w.max(t.padded_width()), h.max(t.padded_height()))
        })
    }
}

/// Partition a `width × height` image into tiles whose estimated working set
/// fits `budget × headroom`.
///
/// `estimate(padded_w, padded_h)` returns the peak bytes one tile needs.
pub fn plan_tiles<F>(width: usize, height: usize, params: &TileParams, budget: u64, estimate: F) -> Result<TilePlan>
where
    F: Fn(usize, usize) -> Result<u64>,
{
    if width == 0 || height == 0 {
        return Err(UpscaleError::Input(format!("cannot tile a {width}×{height} image")));
    }
    let min_edge = params.min_edge();
    if params.tile_size != 0 && params.tile_size < min_edge {
        return Err(UpscaleError::Config(format!(
            "tile size {} must exceed twice the prepadding ({})",
            params.tile_size,
            2 * params.prepadding
        )));
    }

    let limit = budget as f64 * params.headroom;
    let mut edge = match params.tile_size {
        0 => AUTO_TILE_SIZE.max(min_edge),
        n => n,
    };
    loop {
        let (pw, _) = params.padded_extent(edge.min(width));
        let (ph, _) = params.padded_extent(edge.min(height));
        let need = estimate(pw, ph)?;
        if need as f64 <= limit {
            break;
        }
        if edge == min_edge {
            return Err(UpscaleError::Config(format!(
                "a {min_edge}-pixel tile needs {need} bytes, budget allows {}",
                limit as u64
            )));
        }
        let half = edge / 2;
        edge = if half <= 2 * params.prepadding { min_edge } else { half };
    }

    let plan = layout(width, height, edge, params);
    debug!(width, height, edge, cols = plan.cols, rows = plan.rows, "tile plan");
    Ok(plan)
}

/// Plan the whole image as exactly one tile, failing with a configuration
/// error if that tile does not fit the budget.
pub fn plan_single<F>(width: usize, height: usize, params: &TileParams, budget: u64, estimate: F) -> Result<TilePlan>
where
    F: Fn(usize, usize) -> Result<u64>,
{
    if width == 0 || height == 0 {
        return Err(UpscaleError::Input(format!("cannot tile a {width}×{height} image")));
    }
    let edge = width.max(height).max(params.min_edge());
    let (pw, _) = params.padded_extent(width);
    let (ph, _) = params.padded_extent(height);
    let need = estimate(pw, ph)?;
    let limit = budget as f64 * params.headroom;
    if need as f64 > limit {
        return Err(UpscaleError::Config(format!(
            "whole {width}×{height} image needs {need} bytes as one tile, budget allows {}",
            limit as u64
        )));
    }
    Ok(layout(width, height, edge, params))
}

fn layout(width: usize, height: usize, edge: usize, params: &TileParams) -> TilePlan {
    let cols = width.div_ceil(edge);
    let rows = height.div_ceil(edge);
    let p = params.prepadding;
    let mut tiles = Vec::with_capacity(cols * rows);
    for r in 0..rows {
        for c in 0..cols {
            let x = c * edge;
            let y = r * edge;
            let input = Rect::new(x, y, edge.min(width - x), edge.min(height - y));
            let (_, extra_x) = params.padded_extent(input.width);
            let (_, extra_y) = params.padded_extent(input.height);
            tiles.push(TileRegion {
                index: tiles.len(),
                input,
                padding: Padding { left: p, top: p, right: p + extra_x, bottom: p + extra_y },
                output: input.scaled(params.scale),
            });
        }
    }
    TilePlan { width, height, edge, cols, rows, tiles }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(tile_size: usize, prepadding: usize, alignment: usize) -> TileParams {
        TileParams { tile_size, prepadding, scale: 2, alignment, headroom: 1.0 }
    }

    fn unlimited(_: usize, _: usize) -> Result<u64> {
        Ok(0)
    }

    #[test]
    fn test_clipped_last_column_and_row() {
        let plan = plan_tiles(15, 9, &params(6, 2, 1), u64::MAX, unlimited).unwrap();
        assert_eq!((plan.cols, plan.rows), (3, 2));
        assert_eq!(plan.tiles[2].input, Rect::new(12, 0, 3, 6));
        assert_eq!(plan.tiles[5].input, Rect::new(12, 6, 3, 3));
        assert_eq!(plan.tiles[5].output, Rect::new(24, 12, 6, 6));
    }

    #[test]
    fn test_alignment_padding_goes_right_and_bottom() {
        let plan = plan_tiles(10, 7, &params(10, 3, 4), u64::MAX, unlimited).unwrap();
        let t = plan.tiles[0];
        // 10 + 6 = 16 already aligned; 7 + 6 = 13 → 16 needs 3 extra.
        assert_eq!(t.padding, Padding { left: 3, top: 3, right: 3, bottom: 6 });
        assert_eq!(t.padded_width() % 4, 0);
        assert_eq!(t.padded_height() % 4, 0);
    }

    #[test]
    fn test_auto_halves_until_fit() {
        // Budget admits padded edges up to 120: 400 → 200 → 100.
        let est = |w: usize, h: usize| Ok((w * h) as u64);
        let plan = plan_tiles(1000, 1000, &params(0, 10, 1), 120 * 120, est).unwrap();
        assert_eq!(plan.edge, 100);
    }

    #[test]
    fn test_minimum_edge_tried_once() {
        // Only padded 41×41 fits (edge 21 + 2·10).
        let est = |w: usize, h: usize| Ok((w * h) as u64);
        let plan = plan_tiles(500, 500, &params(0, 10, 1), 41 * 41, est).unwrap();
        assert_eq!(plan.edge, 21);

        let err = plan_tiles(500, 500, &params(0, 10, 1), 40 * 40, est).unwrap_err();
        assert!(matches!(err, UpscaleError::Config(_)));
    }

    #[test]
    fn test_requested_size_too_small() {
        let err = plan_tiles(100, 100, &params(20, 10, 1), u64::MAX, unlimited).unwrap_err();
        assert!(matches!(err, UpscaleError::Config(_)));
    }

    #[test]
    fn test_small_image_does_not_pay_for_unused_edge() {
        // A 30×30 image fits even though a padded 400 edge would not.
        let est = |w: usize, h: usize| Ok((w * h) as u64);
        let plan = plan_tiles(30, 30, &params(0, 5, 1), 40 * 40, est).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_every_pixel_covered_exactly_once() {
        for width in 1..70 {
            for height in [1, 2, 7, 33, 64, 65] {
                for tile_size in [0, 5, 9, 21, 40] {
                    for alignment in [1, 2, 4] {
                        let p = params(tile_size, 2, alignment);
                        let plan = plan_tiles(width, height, &p, u64::MAX, unlimited).unwrap();
                        let mut hits = vec![0u8; width * height];
                        for (i, t) in plan.tiles.iter().enumerate() {
                            assert_eq!(t.index, i);
                            assert_eq!(t.output, t.input.scaled(2));
                            assert_eq!(t.padded_width() % alignment, 0);
                            assert_eq!(t.padded_height() % alignment, 0);
                            for y in t.input.y..t.input.bottom() {
                                for x in t.input.x..t.input.right() {
                                    hits[y * width + x] += 1;
                                }
                            }
                        }
                        assert!(
                            hits.iter().all(|&n| n == 1),
                            "{width}×{height}, tile {tile_size}, alignment {alignment}"
                        );
                        assert_eq!(plan.len(), plan.cols * plan.rows);
                    }
                }
            }
        }
    }

    #[test]
    fn test_planning_is_idempotent() {
        let est = |w: usize, h: usize| Ok((w * h) as u64);
        for (width, height, tile_size) in [(1000, 700, 0), (97, 31, 9), (64, 64, 21), (5, 300, 40)] {
            let p = params(tile_size, 2, 2);
            let a = plan_tiles(width, height, &p, 200 * 200, est).unwrap();
            let b = plan_tiles(width, height, &p, 200 * 200, est).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_single_tile_plan() {
        let plan = plan_single(50, 20, &params(0, 4, 2), u64::MAX, unlimited).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.tiles[0].input, Rect::new(0, 0, 50, 20));

        let est = |w: usize, h: usize| Ok((w * h) as u64);
        assert!(matches!(plan_single(50, 20, &params(0, 4, 2), 100, est), Err(UpscaleError::Config(_))));
    }
}
