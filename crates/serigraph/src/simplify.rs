//! Polyline reduction and corner annotation.
//!
//! Douglas-Peucker reduction (via `geo`), turn-angle corner marking,
//! adjacency-based merging of same-color rings into multi-ring paths,
//! and removal of degenerate contours.

use geo::Simplify;
use geo_types::{Coord, LineString};
use tracing::debug;

use crate::types::{Aabb, Contour};

/// Same-color rings whose bounding boxes are closer than this merge
/// into one multi-ring path. Keeps holes with their outer boundary and
/// improves print registration for touching regions.
pub const ADJACENCY_PROXIMITY: f32 = 4.0;

/// Rings whose total length falls below this are dropped.
const MIN_RING_LENGTH: f32 = 2.0;

/// One simplified closed ring. Points are stored without the duplicate
/// closing vertex; indices in `corners` mark hard-corner vertices.
#[derive(Debug, Clone)]
pub struct SimplifiedRing {
    pub points: Vec<[f32; 2]>,
    pub corners: Vec<usize>,
    pub area: f32,
}

/// A group of rings that will be fitted and emitted as one path.
#[derive(Debug, Clone)]
pub struct SimplifiedPath {
    pub rings: Vec<SimplifiedRing>,
    pub palette_index: usize,
    pub bounds: Aabb,
    pub area: f32,
}

/// Reduce, annotate, and group the stitched contours.
pub fn simplify_contours(
    contours: Vec<Contour>,
    tolerance: f64,
    corner_angle_deg: f64,
) -> Vec<SimplifiedPath> {
    let corner_threshold = corner_angle_deg.to_radians();
    let before = contours.len();

    let mut paths: Vec<SimplifiedPath> = Vec::new();
    for contour in contours {
        let Some(ring) = simplify_ring(&contour, tolerance as f32, corner_threshold) else {
            continue;
        };
        let bounds = Aabb::of_points(&ring.points);
        let area = ring.area;
        merge_or_push(
            &mut paths,
            SimplifiedPath {
                rings: vec![ring],
                palette_index: contour.palette_index,
                bounds,
                area,
            },
        );
    }

    debug!(contours = before, paths = paths.len(), "simplification done");
    paths
}

fn simplify_ring(contour: &Contour, tolerance: f32, corner_threshold: f64) -> Option<SimplifiedRing> {
    if contour.points.len() < 4 {
        return None;
    }

    let coords: Vec<Coord<f32>> = contour
        .points
        .iter()
        .map(|&[x, y]| Coord { x, y })
        .collect();
    let simplified = LineString::new(coords).simplify(&tolerance);

    let mut points: Vec<[f32; 2]> = simplified.coords().map(|c| [c.x, c.y]).collect();
    // Drop the duplicate closing vertex; rings are treated cyclically.
    if points.len() >= 2 {
        let first = points[0];
        let last = *points.last().unwrap();
        if (first[0] - last[0]).abs() < 1e-6 && (first[1] - last[1]).abs() < 1e-6 {
            points.pop();
        }
    }
    if points.len() < 3 {
        return None;
    }
    if ring_length(&points) < MIN_RING_LENGTH {
        return None;
    }

    let corners = detect_corners(&points, corner_threshold);
    let area = shoelace_area(&points).abs();
    Some(SimplifiedRing {
        points,
        corners,
        area,
    })
}

/// Vertices where the polyline turns more than the threshold become
/// segment boundaries for curve fitting.
pub fn detect_corners(points: &[[f32; 2]], threshold_rad: f64) -> Vec<usize> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }
    let mut corners = Vec::new();
    for i in 0..n {
        let prev = points[(i + n - 1) % n];
        let cur = points[i];
        let next = points[(i + 1) % n];
        let v_in = (f64::from(cur[0] - prev[0]), f64::from(cur[1] - prev[1]));
        let v_out = (f64::from(next[0] - cur[0]), f64::from(next[1] - cur[1]));
        if turn_angle(v_in, v_out) > threshold_rad {
            corners.push(i);
        }
    }
    corners
}

/// Unsigned turn angle between two direction vectors, radians in [0, pi].
fn turn_angle(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dot = a.0 * b.0 + a.1 * b.1;
    let cross = a.0 * b.1 - a.1 * b.0;
    cross.atan2(dot).abs()
}

fn ring_length(points: &[[f32; 2]]) -> f32 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let a = points[i];
            let b = points[(i + 1) % n];
            let dx = b[0] - a[0];
            let dy = b[1] - a[1];
            (dx * dx + dy * dy).sqrt()
        })
        .sum()
}

/// Signed area via the shoelace formula; positive = counterclockwise.
pub fn shoelace_area(points: &[[f32; 2]]) -> f32 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    (0..n)
        .map(|i| {
            let j = (i + 1) % n;
            points[i][0] * points[j][1] - points[j][0] * points[i][1]
        })
        .sum::<f32>()
        / 2.0
}

/// Merge into an existing same-color path whose bounds are adjacent,
/// otherwise keep as its own path.
fn merge_or_push(paths: &mut Vec<SimplifiedPath>, candidate: SimplifiedPath) {
    if let Some(target) = paths.iter_mut().find(|p| {
        p.palette_index == candidate.palette_index
            && p.bounds.gap(&candidate.bounds) <= ADJACENCY_PROXIMITY
    }) {
        target.area += candidate.area;
        target.bounds = Aabb {
            min: [
                target.bounds.min[0].min(candidate.bounds.min[0]),
                target.bounds.min[1].min(candidate.bounds.min[1]),
            ],
            max: [
                target.bounds.max[0].max(candidate.bounds.max[0]),
                target.bounds.max[1].max(candidate.bounds.max[1]),
            ],
        };
        target.rings.extend(candidate.rings);
    } else {
        paths.push(candidate);
    }
}
