//! Piecewise cubic Bezier fitting.
//!
//! Each ring is split at its hard corners; segments of 4+ points get a
//! single cubic whose control points start at the 25%/75% chord
//! positions and are refined by a bounded local search minimizing mean
//! point-to-curve distance. Shorter segments stay straight lines. This
//! is a deliberately approximate fitter for print tracing, not a full
//! least-squares solve.

use tracing::debug;

use crate::simplify::{SimplifiedPath, SimplifiedRing};
use crate::types::{BezierPath, BezierSubpath, PathSegment};

/// Refinement rounds per segment.
const SEARCH_ROUNDS: usize = 4;

/// Fit every simplified path, one [`BezierPath`] per input path.
pub fn fit_paths(paths: &[SimplifiedPath], max_error: f64) -> Vec<BezierPath> {
    let fitted: Vec<BezierPath> = paths
        .iter()
        .map(|path| {
            let mut worst = 0.0f32;
            let subpaths = path
                .rings
                .iter()
                .map(|ring| {
                    let (sub, err) = fit_ring(ring, max_error);
                    worst = worst.max(err);
                    sub
                })
                .collect();
            BezierPath {
                subpaths,
                palette_index: path.palette_index,
                max_error: worst,
                area: path.area,
            }
        })
        .collect();
    debug!(paths = fitted.len(), "curve fitting done");
    fitted
}

/// Fit one closed ring into a subpath.
fn fit_ring(ring: &SimplifiedRing, max_error: f64) -> (BezierSubpath, f32) {
    let points = &ring.points;
    let n = points.len();

    let boundaries = segment_boundaries(&ring.corners, n);
    let start = points[boundaries[0]];
    let mut segments = Vec::new();
    let mut worst = 0.0f32;

    for w in 0..boundaries.len() {
        let from = boundaries[w];
        let to = boundaries[(w + 1) % boundaries.len()];
        let seg = cyclic_slice(points, from, to);
        if seg.len() < 4 {
            for &p in seg.iter().skip(1) {
                segments.push(PathSegment::Line { to: p });
            }
        } else {
            let (cubic, err) = fit_cubic(&seg, max_error);
            worst = worst.max(err);
            segments.push(cubic);
        }
    }

    (
        BezierSubpath {
            start,
            segments,
            closed: true,
        },
        worst,
    )
}

/// Corner indices as segment boundaries; cornerless (or single-corner)
/// rings get synthetic boundaries at the quartiles so a closed shape is
/// never forced through one degenerate cubic.
fn segment_boundaries(corners: &[usize], n: usize) -> Vec<usize> {
    if corners.len() >= 2 {
        return corners.to_vec();
    }
    let anchor = corners.first().copied().unwrap_or(0);
    let mut out: Vec<usize> = (0..4).map(|q| (anchor + q * n / 4) % n).collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// Inclusive cyclic run of points from index `from` to index `to`.
fn cyclic_slice(points: &[[f32; 2]], from: usize, to: usize) -> Vec<[f32; 2]> {
    let n = points.len();
    let mut out = Vec::new();
    let mut i = from;
    loop {
        out.push(points[i]);
        if i == to {
            break;
        }
        i = (i + 1) % n;
        if out.len() > n {
            break;
        }
    }
    out
}

/// Fit a single cubic through `seg` (>= 4 points) by perturbation
/// search over the two control points.
fn fit_cubic(seg: &[[f32; 2]], max_error: f64) -> (PathSegment, f32) {
    let p0 = seg[0];
    let p3 = *seg.last().unwrap();

    let params = chord_length_params(seg);
    let mut c1 = lerp(p0, p3, 0.25);
    let mut c2 = lerp(p0, p3, 0.75);
    let mut err = mean_distance(seg, &params, p0, c1, c2, p3);

    let bounds_diag = {
        let b = crate::types::Aabb::of_points(seg);
        (b.width() * b.width() + b.height() * b.height()).sqrt().max(1.0)
    };
    let mut step = bounds_diag * 0.25;

    for _ in 0..SEARCH_ROUNDS {
        if f64::from(err) <= max_error {
            break;
        }
        let mut improved = true;
        while improved {
            improved = false;
            for target in 0..2 {
                for (dx, dy) in [(step, 0.0), (-step, 0.0), (0.0, step), (0.0, -step)] {
                    let (t1, t2) = if target == 0 {
                        ([c1[0] + dx, c1[1] + dy], c2)
                    } else {
                        (c1, [c2[0] + dx, c2[1] + dy])
                    };
                    let e = mean_distance(seg, &params, p0, t1, t2, p3);
                    if e < err {
                        err = e;
                        c1 = t1;
                        c2 = t2;
                        improved = true;
                    }
                }
            }
        }
        step *= 0.5;
    }

    (PathSegment::Cubic { c1, c2, to: p3 }, err)
}

/// Normalized chord-length parameterization of a polyline.
fn chord_length_params(seg: &[[f32; 2]]) -> Vec<f32> {
    let mut acc = Vec::with_capacity(seg.len());
    let mut total = 0.0f32;
    acc.push(0.0);
    for w in seg.windows(2) {
        let dx = w[1][0] - w[0][0];
        let dy = w[1][1] - w[0][1];
        total += (dx * dx + dy * dy).sqrt();
        acc.push(total);
    }
    if total <= f32::EPSILON {
        return vec![0.0; seg.len()];
    }
    acc.iter_mut().for_each(|t| *t /= total);
    acc
}

/// Point on a cubic Bezier at parameter `t`.
pub fn bezier_point(p0: [f32; 2], c1: [f32; 2], c2: [f32; 2], p3: [f32; 2], t: f32) -> [f32; 2] {
    let u = 1.0 - t;
    let b0 = u * u * u;
    let b1 = 3.0 * u * u * t;
    let b2 = 3.0 * u * t * t;
    let b3 = t * t * t;
    [
        b0 * p0[0] + b1 * c1[0] + b2 * c2[0] + b3 * p3[0],
        b0 * p0[1] + b1 * c1[1] + b2 * c2[1] + b3 * p3[1],
    ]
}

fn mean_distance(
    seg: &[[f32; 2]],
    params: &[f32],
    p0: [f32; 2],
    c1: [f32; 2],
    c2: [f32; 2],
    p3: [f32; 2],
) -> f32 {
    let mut sum = 0.0f32;
    for (p, &t) in seg.iter().zip(params) {
        let q = bezier_point(p0, c1, c2, p3, t);
        let dx = p[0] - q[0];
        let dy = p[1] - q[1];
        sum += (dx * dx + dy * dy).sqrt();
    }
    sum / seg.len() as f32
}

#[inline]
fn lerp(a: [f32; 2], b: [f32; 2], t: f32) -> [f32; 2] {
    [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]
}
