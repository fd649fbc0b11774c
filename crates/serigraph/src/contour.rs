//! Moore-neighbor boundary tracing over tile masks.
//!
//! Tracing runs on the mask clipped to the tile's core rectangle; cores
//! partition the image exactly, so every region boundary is traced by
//! exactly one tile. The overlap band is still consulted read-only: a
//! boundary point on a core border is an artificial cut only when the
//! full mask continues across that border, and loops are split into
//! open fragments at those cuts so the stitcher can rejoin them with
//! their counterparts from neighboring tiles. Each trace is a clockwise
//! Moore walk (8-connectivity, left-first turning, backtrack persisted
//! between steps) terminated by Jacob's stopping criterion plus a hard
//! step cap.

use tracing::trace;

use crate::mask::{Mask, MaskSource};
use crate::types::{Contour, Tile};

/// Contours with fewer points than this are discarded as noise.
pub const MIN_CONTOUR_POINTS: usize = 8;

/// Clockwise 8-neighborhood, starting west.
const NEIGHBORS: [(i32, i32); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

/// Trace all boundaries of `mask` within the tile's core and return
/// them in global image coordinates. `image_width`/`image_height`
/// decide which core edges are interior seams (as opposed to the image
/// border).
pub fn trace_tile(
    mask: &Mask,
    tile: &Tile,
    image_width: u32,
    image_height: u32,
) -> Vec<Contour> {
    let w = mask.width() as i32;
    let h = mask.height() as i32;
    if w == 0 || h == 0 {
        return Vec::new();
    }

    // Core rectangle in tile-local coordinates.
    let cx0 = (tile.core_x - tile.x) as i32;
    let cy0 = (tile.core_y - tile.y) as i32;
    let cx1 = cx0 + tile.core_width as i32;
    let cy1 = cy0 + tile.core_height as i32;
    let core_set = |x: i32, y: i32| -> bool {
        x >= cx0 && x < cx1 && y >= cy0 && y < cy1 && mask.is_set(x as u32, y as u32)
    };

    let palette_index = match mask.source {
        MaskSource::Palette(i) => i,
        MaskSource::Binary => 0,
    };

    let mut visited = vec![false; (w * h) as usize];
    let step_cap = (w as usize * h as usize).saturating_mul(4);
    let mut contours = Vec::new();

    for y in cy0..cy1 {
        for x in cx0..cx1 {
            if !core_set(x, y) || visited[(y * w + x) as usize] {
                continue;
            }
            // Seed at boundary pixels whose west neighbor is background.
            if core_set(x - 1, y) {
                continue;
            }

            let (loop_points, truncated) =
                moore_trace(&core_set, (x, y), w, step_cap, &mut visited);
            if loop_points.len() < MIN_CONTOUR_POINTS {
                continue;
            }

            contours.extend(split_at_cuts(
                loop_points,
                truncated,
                mask,
                tile,
                (cx0, cy0, cx1, cy1),
                image_width,
                image_height,
                palette_index,
            ));
        }
    }

    trace!(tile = %tile.id, count = contours.len(), "tile traced");
    contours
}

/// Follow the boundary clockwise from `start`, whose west neighbor is
/// known to be background. Returns local pixel coordinates of the loop
/// and whether the step cap fired.
///
/// The backtrack position (the background neighbor checked just before
/// the current pixel was entered) persists across steps; tracing stops
/// when the start pixel is re-entered from the original backtrack
/// (Jacob's stopping criterion).
fn moore_trace(
    is_set: &impl Fn(i32, i32) -> bool,
    start: (i32, i32),
    w: i32,
    step_cap: usize,
    visited: &mut [bool],
) -> (Vec<(i32, i32)>, bool) {
    let mut points = Vec::new();
    let mut current = start;
    let mut backtrack = (start.0 - 1, start.1);
    let initial = (current, backtrack);
    let mut truncated = false;

    points.push(current);
    visited[(current.1 * w + current.0) as usize] = true;

    for step in 0..step_cap {
        let bdir = direction_index(backtrack.0 - current.0, backtrack.1 - current.1);
        let mut advanced = false;
        for i in 1..=8 {
            let dir = (bdir + i) % 8;
            let (dx, dy) = NEIGHBORS[dir];
            let nx = current.0 + dx;
            let ny = current.1 + dy;
            if is_set(nx, ny) {
                let prev = (dir + 7) % 8;
                backtrack = (current.0 + NEIGHBORS[prev].0, current.1 + NEIGHBORS[prev].1);
                current = (nx, ny);
                advanced = true;
                break;
            }
        }

        if !advanced {
            // Isolated pixel.
            break;
        }
        if (current, backtrack) == initial {
            return (points, false);
        }
        points.push(current);
        visited[(current.1 * w + current.0) as usize] = true;

        if step + 1 == step_cap {
            truncated = true;
        }
    }

    (points, truncated)
}

/// Index into [`NEIGHBORS`] of a unit king-move offset.
#[inline]
fn direction_index(dx: i32, dy: i32) -> usize {
    match (dx, dy) {
        (-1, 0) => 0,
        (-1, -1) => 1,
        (0, -1) => 2,
        (1, -1) => 3,
        (1, 0) => 4,
        (1, 1) => 5,
        (-1, 1) => 7,
        (0, 1) => 6,
        _ => 0,
    }
}

/// Split a traced loop into open fragments at artificial cuts: points
/// on an interior core border where the full mask continues into the
/// overlap band. A point on a core border where the mask genuinely ends
/// is real geometry and stays; loops with no cuts close normally.
#[allow(clippy::too_many_arguments)]
fn split_at_cuts(
    loop_points: Vec<(i32, i32)>,
    truncated: bool,
    mask: &Mask,
    tile: &Tile,
    core: (i32, i32, i32, i32),
    image_width: u32,
    image_height: u32,
    palette_index: usize,
) -> Vec<Contour> {
    let (cx0, cy0, cx1, cy1) = core;
    let w = mask.width() as i32;
    let h = mask.height() as i32;

    let seam_left = tile.core_x > 0;
    let seam_top = tile.core_y > 0;
    let seam_right = tile.core_x + tile.core_width < image_width;
    let seam_bottom = tile.core_y + tile.core_height < image_height;

    let full = |x: i32, y: i32| -> bool {
        x >= 0 && y >= 0 && x < w && y < h && mask.is_set(x as u32, y as u32)
    };
    let cut = |p: &(i32, i32)| -> bool {
        (seam_left && p.0 == cx0 && full(p.0 - 1, p.1))
            || (seam_top && p.1 == cy0 && full(p.0, p.1 - 1))
            || (seam_right && p.0 == cx1 - 1 && full(p.0 + 1, p.1))
            || (seam_bottom && p.1 == cy1 - 1 && full(p.0, p.1 + 1))
    };

    let to_global = |p: &(i32, i32)| -> [f32; 2] {
        [(tile.x as i32 + p.0) as f32, (tile.y as i32 + p.1) as f32]
    };

    let n = loop_points.len();
    let Some(first_cut) = loop_points.iter().position(cut) else {
        let mut points: Vec<[f32; 2]> = loop_points.iter().map(to_global).collect();
        if !truncated {
            points.push(points[0]);
        }
        return vec![Contour {
            points,
            palette_index,
            origin_tile: Some(tile.id),
            truncated,
        }];
    };

    // Rotate so the loop starts on a cut point, then carve out the
    // uncut runs as open fragments.
    let mut fragments = Vec::new();
    let mut run: Vec<[f32; 2]> = Vec::new();
    for k in 0..n {
        let p = &loop_points[(first_cut + k) % n];
        if cut(p) {
            if run.len() >= 2 {
                fragments.push(std::mem::take(&mut run));
            } else {
                run.clear();
            }
        } else {
            run.push(to_global(p));
        }
    }
    if run.len() >= 2 {
        fragments.push(run);
    }

    fragments
        .into_iter()
        .map(|points| Contour {
            points,
            palette_index,
            origin_tile: Some(tile.id),
            truncated,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MaskSource;
    use crate::types::TileId;
    use image::{GrayImage, Luma};

    fn mask_from_fn(w: u32, h: u32, f: impl Fn(u32, u32) -> bool) -> Mask {
        let mut image = GrayImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                image.put_pixel(x, y, Luma([if f(x, y) { 255 } else { 0 }]));
            }
        }
        Mask {
            tile: TileId(0),
            source: MaskSource::Palette(0),
            image,
            coverage: 0.0,
        }
    }

    fn standalone_tile(w: u32, h: u32) -> Tile {
        Tile {
            id: TileId(0),
            x: 0,
            y: 0,
            width: w,
            height: h,
            core_x: 0,
            core_y: 0,
            core_width: w,
            core_height: h,
        }
    }

    #[test]
    fn empty_mask_yields_no_contours() {
        let mask = mask_from_fn(16, 16, |_, _| false);
        let tile = standalone_tile(16, 16);
        assert!(trace_tile(&mask, &tile, 16, 16).is_empty());
    }

    #[test]
    fn square_produces_one_closed_contour() {
        let mask = mask_from_fn(20, 20, |x, y| (5..15).contains(&x) && (5..15).contains(&y));
        let tile = standalone_tile(20, 20);
        let contours = trace_tile(&mask, &tile, 20, 20);
        assert_eq!(contours.len(), 1);
        let c = &contours[0];
        assert!(c.is_closed());
        assert!(!c.truncated);
        let b = c.bounds();
        assert_eq!(b.min, [5.0, 5.0]);
        assert_eq!(b.max, [14.0, 14.0]);
        // Perimeter of a 10x10 square boundary is 36 pixels.
        assert!(c.points.len() >= 30 && c.points.len() <= 40, "{}", c.points.len());
    }

    #[test]
    fn annulus_produces_outer_and_hole_contours() {
        let mask = mask_from_fn(30, 30, |x, y| {
            let outer = (5..25).contains(&x) && (5..25).contains(&y);
            let hole = (11..19).contains(&x) && (11..19).contains(&y);
            outer && !hole
        });
        let tile = standalone_tile(30, 30);
        let contours = trace_tile(&mask, &tile, 30, 30);
        assert_eq!(contours.len(), 2, "outer boundary and hole boundary");
        assert!(contours.iter().all(|c| c.is_closed()));
    }

    #[test]
    fn tiny_speckle_is_filtered() {
        let mask = mask_from_fn(16, 16, |x, y| x == 8 && y == 8);
        let tile = standalone_tile(16, 16);
        assert!(trace_tile(&mask, &tile, 16, 16).is_empty());
    }

    #[test]
    fn shape_continuing_past_the_core_becomes_open_fragments() {
        // Core covers the left 20 columns of a 40x20 image; the tile
        // extends 4 columns of overlap past it and the shape continues
        // through the cut.
        let mask = mask_from_fn(24, 20, |x, y| x >= 10 && (5..15).contains(&y));
        let tile = Tile {
            id: TileId(0),
            x: 0,
            y: 0,
            width: 24,
            height: 20,
            core_x: 0,
            core_y: 0,
            core_width: 20,
            core_height: 20,
        };
        let contours = trace_tile(&mask, &tile, 40, 20);
        assert!(!contours.is_empty());
        assert!(
            contours.iter().all(|c| !c.is_closed()),
            "cut shape should yield only open fragments"
        );
        // The cut column itself is not part of any fragment.
        for c in &contours {
            assert!(c.points.iter().all(|p| p[0] < 19.0), "{:?}", c.points);
        }
    }

    #[test]
    fn shape_ending_at_the_core_border_stays_closed() {
        // Same core geometry, but the mask ends exactly at the core
        // border: the boundary there is real, not an artifact.
        let mask = mask_from_fn(24, 20, |x, y| (10..20).contains(&x) && (5..15).contains(&y));
        let tile = Tile {
            id: TileId(0),
            x: 0,
            y: 0,
            width: 24,
            height: 20,
            core_x: 0,
            core_y: 0,
            core_width: 20,
            core_height: 20,
        };
        let contours = trace_tile(&mask, &tile, 40, 20);
        assert_eq!(contours.len(), 1);
        assert!(contours[0].is_closed());
        assert_eq!(contours[0].bounds().max, [19.0, 14.0]);
    }

    #[test]
    fn shape_on_image_border_stays_closed() {
        // The tile covers the whole image: its right edge is the image
        // border, never a cut.
        let mask = mask_from_fn(20, 20, |x, y| x >= 10 && (5..15).contains(&y));
        let tile = standalone_tile(20, 20);
        let contours = trace_tile(&mask, &tile, 20, 20);
        assert_eq!(contours.len(), 1);
        assert!(contours[0].is_closed());
    }

    #[test]
    fn overlap_band_is_not_traced() {
        // Shape lives entirely in the overlap band left of the core.
        let mask = mask_from_fn(24, 20, |x, y| x < 4 && (5..15).contains(&y));
        let tile = Tile {
            id: TileId(0),
            x: 96,
            y: 0,
            width: 24,
            height: 20,
            core_x: 100,
            core_y: 0,
            core_width: 20,
            core_height: 20,
        };
        assert!(trace_tile(&mask, &tile, 200, 20).is_empty());
    }

    #[test]
    fn visited_marking_prevents_duplicate_traces() {
        let mask = mask_from_fn(20, 20, |x, y| (5..15).contains(&x) && (5..15).contains(&y));
        let tile = standalone_tile(20, 20);
        let contours = trace_tile(&mask, &tile, 20, 20);
        assert_eq!(contours.len(), 1, "one region, one contour");
    }
}
