//! Per-tile binary mask construction.
//!
//! Classifies tile pixels against a palette entry with an adaptive
//! perceptual tolerance, or against an automatic (Otsu) luminance
//! threshold in binary mode. A morphological opening removes isolated
//! noise while 8-neighborhood transition counting protects genuine
//! corner pixels from being smoothed away.

use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::morphology::open;
use tracing::trace;

use crate::quantize::color_distance;
use crate::types::{luminance, PaletteEntry, PixelBuffer, Tile, TileId};

const FG: u8 = 255;
const BG: u8 = 0;

/// What a mask selects: one palette color, or the Otsu foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskSource {
    Palette(usize),
    Binary,
}

/// Binary membership bitmap for one tile. Owned by the tile worker and
/// released as soon as contours have been extracted.
#[derive(Debug)]
pub struct Mask {
    pub tile: TileId,
    pub source: MaskSource,
    pub image: GrayImage,
    /// Fraction of tile pixels classified as members.
    pub coverage: f32,
}

impl Mask {
    #[inline]
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y).0[0] != BG
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Widen the tolerance band for mid-tones, narrow it near black and
/// white where small distances are perceptually large.
pub fn adaptive_tolerance(base: f32, target_luma: f32) -> f32 {
    if target_luma < 30.0 || target_luma > 225.0 {
        base * 0.8
    } else if (60.0..=200.0).contains(&target_luma) {
        base * 1.3
    } else {
        base
    }
}

/// Build the membership mask of `entry` over `tile`. `scratch` is a
/// recycled classification plane (any size); the resized backing is
/// returned for reuse by the next mask.
pub fn color_mask(
    buffer: &PixelBuffer<'_>,
    tile: &Tile,
    entry: &PaletteEntry,
    base_tolerance: f32,
    scratch: Vec<u8>,
) -> (Mask, Vec<u8>) {
    let tolerance = adaptive_tolerance(base_tolerance, entry.luminance());
    let mut plane = classification_plane(tile, scratch);

    for ty in 0..tile.height {
        for tx in 0..tile.width {
            let rgb = buffer.pixel(tile.x + tx, tile.y + ty);
            let member = buffer.alpha(tile.x + tx, tile.y + ty) >= 16
                && color_distance(rgb, entry.rgb) <= tolerance;
            plane.put_pixel(tx, ty, Luma([if member { FG } else { BG }]));
        }
    }

    finish(plane, tile.id, MaskSource::Palette(entry.index))
}

/// Build a foreground/background mask via between-class variance
/// maximization over the tile's luminance histogram. Dark pixels are
/// foreground, matching the print convention of tracing ink.
pub fn binary_mask(buffer: &PixelBuffer<'_>, tile: &Tile, scratch: Vec<u8>) -> (Mask, Vec<u8>) {
    let luma = tile_luma(buffer, tile);
    let level = otsu_level(&luma);

    let mut plane = classification_plane(tile, scratch);
    for (x, y, p) in luma.enumerate_pixels() {
        let member = p.0[0] <= level;
        plane.put_pixel(x, y, Luma([if member { FG } else { BG }]));
    }

    finish(plane, tile.id, MaskSource::Binary)
}

/// Tile-sized grayscale plane backed by `scratch`.
fn classification_plane(tile: &Tile, mut scratch: Vec<u8>) -> GrayImage {
    scratch.clear();
    scratch.resize(tile.pixel_count(), BG);
    GrayImage::from_raw(tile.width, tile.height, scratch)
        .unwrap_or_else(|| GrayImage::new(tile.width, tile.height))
}

/// Grayscale copy of a tile region.
pub fn tile_luma(buffer: &PixelBuffer<'_>, tile: &Tile) -> GrayImage {
    let mut luma = GrayImage::new(tile.width, tile.height);
    for ty in 0..tile.height {
        for tx in 0..tile.width {
            let rgb = buffer.pixel(tile.x + tx, tile.y + ty);
            luma.put_pixel(tx, ty, Luma([luminance(rgb).round() as u8]));
        }
    }
    luma
}

fn finish(raw: GrayImage, tile: TileId, source: MaskSource) -> (Mask, Vec<u8>) {
    let image = open_preserving_corners(&raw);
    let total = (image.width() * image.height()) as f32;
    let set = image.pixels().filter(|p| p.0[0] != BG).count() as f32;
    let coverage = if total > 0.0 { set / total } else { 0.0 };
    trace!(%tile, ?source, coverage, "mask built");
    let mask = Mask {
        tile,
        source,
        image,
        coverage,
    };
    (mask, raw.into_raw())
}

/// 3x3 erosion-then-dilation, restoring foreground pixels that the
/// opening removed but that transition counting identifies as corners.
fn open_preserving_corners(mask: &GrayImage) -> GrayImage {
    let mut opened = open(mask, Norm::LInf, 1);
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            if mask.get_pixel(x, y).0[0] != BG
                && opened.get_pixel(x, y).0[0] == BG
                && is_corner_pixel(mask, x, y)
            {
                opened.put_pixel(x, y, Luma([FG]));
            }
        }
    }
    opened
}

/// Clockwise 8-neighborhood ring starting at north.
const RING: [(i32, i32); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// A foreground pixel is a corner when its neighborhood has exactly one
/// background-to-foreground transition and a small foreground run: the
/// tip of a convex feature rather than isolated speckle.
fn is_corner_pixel(mask: &GrayImage, x: u32, y: u32) -> bool {
    let (w, h) = (mask.width() as i32, mask.height() as i32);
    let at = |dx: i32, dy: i32| -> bool {
        let nx = x as i32 + dx;
        let ny = y as i32 + dy;
        nx >= 0 && ny >= 0 && nx < w && ny < h && mask.get_pixel(nx as u32, ny as u32).0[0] != BG
    };

    let mut transitions = 0;
    let mut fg_count = 0;
    for i in 0..8 {
        let cur = at(RING[i].0, RING[i].1);
        let next = at(RING[(i + 1) % 8].0, RING[(i + 1) % 8].1);
        if !cur && next {
            transitions += 1;
        }
        if cur {
            fg_count += 1;
        }
    }
    transitions == 1 && (2..=4).contains(&fg_count)
}
