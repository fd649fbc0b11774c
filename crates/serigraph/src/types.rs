use geo_types::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

/// Borrowed view over a decoded raster image.
///
/// The pipeline never owns pixel data; decoding image containers is the
/// responsibility of an external collaborator. Bytes are row-major,
/// interleaved, 3 (RGB) or 4 (RGBA) channels.
#[derive(Debug, Clone, Copy)]
pub struct PixelBuffer<'a> {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub bytes: &'a [u8],
}

impl<'a> PixelBuffer<'a> {
    pub fn new(width: u32, height: u32, channels: u8, bytes: &'a [u8]) -> Self {
        Self {
            width,
            height,
            channels,
            bytes,
        }
    }

    /// Check dimensions against the byte slice length.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(TraceError::InvalidInput(format!(
                "zero dimension: {}x{}",
                self.width, self.height
            )));
        }
        if self.channels != 3 && self.channels != 4 {
            return Err(TraceError::InvalidInput(format!(
                "unsupported channel count {} (expected 3 or 4)",
                self.channels
            )));
        }
        let expected = self.width as usize * self.height as usize * self.channels as usize;
        if self.bytes.len() != expected {
            return Err(TraceError::InvalidInput(format!(
                "byte length {} does not match {}x{}x{} = {}",
                self.bytes.len(),
                self.width,
                self.height,
                self.channels,
                expected
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        [self.bytes[idx], self.bytes[idx + 1], self.bytes[idx + 2]]
    }

    /// Alpha at (x, y); opaque for 3-channel buffers.
    #[inline]
    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        if self.channels == 4 {
            let idx = (y as usize * self.width as usize + x as usize) * 4;
            self.bytes[idx + 3]
        } else {
            255
        }
    }
}

/// One entry of the quantized color palette.
///
/// The palette is built once per run by the quantizer and immutable
/// thereafter; entries are ordered by descending pixel coverage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub rgb: [u8; 3],
    /// Fraction of sampled pixels assigned to this cluster.
    pub weight: f32,
    /// Ordinal index in the palette; used as the stable color identifier
    /// throughout the pipeline instead of string keys.
    pub index: usize,
}

impl PaletteEntry {
    /// Rec.601 luminance, 0..=255.
    pub fn luminance(&self) -> f32 {
        luminance(self.rgb)
    }

    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.rgb[0], self.rgb[1], self.rgb[2])
    }
}

/// Rec.601 luminance of an RGB triple, 0..=255.
#[inline]
pub fn luminance(rgb: [u8; 3]) -> f32 {
    0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32
}

/// Stable identifier of a tile within the grid, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileId(pub usize);

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tile#{}", self.0)
    }
}

/// A rectangular, overlapping sub-region of the source image.
#[derive(Debug, Clone, Copy)]
pub struct Tile {
    pub id: TileId,
    /// Top-left corner in image coordinates, including the overlap margin.
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Core region (exclusive of overlap margins shared with neighbors).
    /// Cores partition the image exactly; tracing is clipped to the core
    /// so every boundary is produced by exactly one tile.
    pub core_x: u32,
    pub core_y: u32,
    pub core_width: u32,
    pub core_height: u32,
}

impl Tile {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Axis-aligned bounding box in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl Aabb {
    pub fn of_points(points: &[[f32; 2]]) -> Self {
        let mut min = [f32::INFINITY; 2];
        let mut max = [f32::NEG_INFINITY; 2];
        for &[x, y] in points {
            min[0] = min[0].min(x);
            min[1] = min[1].min(y);
            max[0] = max[0].max(x);
            max[1] = max[1].max(y);
        }
        Self { min, max }
    }

    pub fn width(&self) -> f32 {
        (self.max[0] - self.min[0]).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.max[1] - self.min[1]).max(0.0)
    }

    /// Gap between two boxes, zero when they touch or overlap.
    pub fn gap(&self, other: &Aabb) -> f32 {
        let dx = (other.min[0] - self.max[0]).max(self.min[0] - other.max[0]).max(0.0);
        let dy = (other.min[1] - self.max[1]).max(self.min[1] - other.max[1]).max(0.0);
        (dx * dx + dy * dy).sqrt()
    }
}

/// An ordered boundary polygon in global image coordinates.
///
/// Created per tile by the tracer; seam stitching merges fragments that
/// were cut by tile borders. Closed (`first == last`) unless the trace
/// step cap fired (`truncated`).
#[derive(Debug, Clone)]
pub struct Contour {
    pub points: Vec<[f32; 2]>,
    pub palette_index: usize,
    pub origin_tile: Option<TileId>,
    pub truncated: bool,
}

impl Contour {
    pub fn is_closed(&self) -> bool {
        match (self.points.first(), self.points.last()) {
            (Some(a), Some(b)) => {
                let dx = a[0] - b[0];
                let dy = a[1] - b[1];
                dx * dx + dy * dy < 1e-6
            }
            _ => false,
        }
    }

    /// Unsigned area of the polygon.
    pub fn area(&self) -> f32 {
        use geo::Area;
        self.to_geo_polygon().unsigned_area()
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::of_points(&self.points)
    }

    pub fn to_geo_polygon(&self) -> Polygon<f32> {
        let coords: Vec<Coord<f32>> = self.points.iter().map(|&[x, y]| Coord { x, y }).collect();
        Polygon::new(LineString::new(coords), vec![])
    }
}

/// A single subpath of a fitted vector path: a start point followed by
/// straight and cubic segments.
#[derive(Debug, Clone)]
pub struct BezierSubpath {
    pub start: [f32; 2],
    pub segments: Vec<PathSegment>,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum PathSegment {
    Line { to: [f32; 2] },
    Cubic { c1: [f32; 2], c2: [f32; 2], to: [f32; 2] },
}

impl PathSegment {
    pub fn endpoint(&self) -> [f32; 2] {
        match *self {
            PathSegment::Line { to } => to,
            PathSegment::Cubic { to, .. } => to,
        }
    }
}

/// A fitted vector path. Immutable once created by the curve fitter.
///
/// Subpaths beyond the first are rings merged by adjacency or holes;
/// they render as additional `M` commands inside one SVG path element.
#[derive(Debug, Clone)]
pub struct BezierPath {
    pub subpaths: Vec<BezierSubpath>,
    pub palette_index: usize,
    /// Worst observed point-to-curve distance across all fitted segments.
    pub max_error: f32,
    /// Unsigned area of the source geometry; used for tail-drop ordering.
    pub area: f32,
}

impl BezierPath {
    pub fn command_count(&self) -> usize {
        self.subpaths.iter().map(|s| s.segments.len() + 1).sum()
    }
}

/// SVG fill rule of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillRule {
    EvenOdd,
    NonZero,
}

impl FillRule {
    pub fn as_svg(&self) -> &'static str {
        match self {
            FillRule::EvenOdd => "evenodd",
            FillRule::NonZero => "nonzero",
        }
    }
}

/// One color plane of the final document.
#[derive(Debug, Clone)]
pub struct Layer {
    pub color: [u8; 3],
    pub z_index: usize,
    pub paths: Vec<BezierPath>,
    pub fill_rule: FillRule,
    /// Paths discarded by the per-layer cap; reported, not an error.
    pub dropped_paths: usize,
}

impl Layer {
    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.color[0], self.color[1], self.color[2])
    }

    pub fn luminance(&self) -> f32 {
        luminance(self.color)
    }
}

/// Processing metadata returned alongside the serialized document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub layer_count: usize,
    pub path_count: usize,
    pub byte_size: usize,
    pub skipped_tiles: usize,
    /// True when any degradation fired: adaptive tile shrink, quality
    /// ladder, or output-size ladder.
    pub degraded: bool,
}

/// Result of a full pipeline run.
#[derive(Debug, Clone)]
pub struct TraceOutput {
    pub svg: String,
    pub summary: TraceSummary,
}
