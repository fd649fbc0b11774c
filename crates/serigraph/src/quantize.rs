//! Weighted K-means color quantization.
//!
//! K-means++ seeding followed by Lloyd refinement over the sampled
//! pixels, using a luma-weighted distance that matches perceptual
//! separation better than plain RGB Euclidean. Degenerate inputs fall
//! back to a fixed palette rather than failing the run.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::types::PaletteEntry;

/// Lloyd iteration cap.
const MAX_ITERATIONS: usize = 20;

/// Refinement stops once no centroid moves further than this (RGB units).
const CONVERGENCE_EPS: f32 = 1.0;

/// Palette entries closer than this (weighted distance) are merged.
const MERGE_THRESHOLD: f32 = 10.0;

/// Channel weights of the perceptual distance (≈ Rec.601 luma split).
const WR: f32 = 0.30;
const WG: f32 = 0.59;
const WB: f32 = 0.11;

/// Luma-weighted squared distance between two colors.
#[inline]
pub fn color_distance_sq(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    WR * dr * dr + WG * dg * dg + WB * db * db
}

#[inline]
pub fn color_distance(a: [u8; 3], b: [u8; 3]) -> f32 {
    color_distance_sq(to_f(a), to_f(b)).sqrt()
}

#[inline]
fn to_f(c: [u8; 3]) -> [f32; 3] {
    [c[0] as f32, c[1] as f32, c[2] as f32]
}

/// Fixed palette used when clustering has nothing to work with.
pub fn fallback_palette() -> Vec<PaletteEntry> {
    [[0, 0, 0], [255, 255, 255], [128, 128, 128]]
        .into_iter()
        .enumerate()
        .map(|(index, rgb)| PaletteEntry {
            rgb,
            weight: if index == 0 { 0.5 } else { 0.25 },
            index,
        })
        .collect()
}

/// Cluster the sample into at most `max_colors` palette entries.
///
/// The palette is sorted by descending coverage and re-indexed; a fixed
/// `seed` makes the run deterministic.
pub fn quantize(samples: &[[u8; 3]], max_colors: usize, seed: Option<u64>) -> Vec<PaletteEntry> {
    if samples.is_empty() || max_colors == 0 {
        debug!("empty sample, using fallback palette");
        return fallback_palette();
    }

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    };

    let points: Vec<[f32; 3]> = samples.iter().map(|&c| to_f(c)).collect();
    let k = max_colors.min(points.len());

    let mut centroids = seed_centroids(&points, k, &mut rng);
    let mut assignment = vec![0usize; points.len()];

    for iteration in 0..MAX_ITERATIONS {
        // Assign.
        for (i, p) in points.iter().enumerate() {
            assignment[i] = nearest_centroid(*p, &centroids);
        }

        // Recompute.
        let mut sums = vec![[0.0f64; 3]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (i, p) in points.iter().enumerate() {
            let c = assignment[i];
            sums[c][0] += p[0] as f64;
            sums[c][1] += p[1] as f64;
            sums[c][2] += p[2] as f64;
            counts[c] += 1;
        }

        let mut max_shift = 0.0f32;
        for (c, centroid) in centroids.iter_mut().enumerate() {
            if counts[c] == 0 {
                // Reseed empty clusters from a random sample point.
                *centroid = points[rng.random_range(0..points.len())];
                max_shift = f32::INFINITY;
                continue;
            }
            let next = [
                (sums[c][0] / counts[c] as f64) as f32,
                (sums[c][1] / counts[c] as f64) as f32,
                (sums[c][2] / counts[c] as f64) as f32,
            ];
            let shift = color_distance_sq(*centroid, next).sqrt();
            max_shift = max_shift.max(shift);
            *centroid = next;
        }

        if max_shift < CONVERGENCE_EPS {
            debug!(iteration, "k-means converged");
            break;
        }
    }

    // Final assignment for weights.
    let mut counts = vec![0usize; centroids.len()];
    for p in &points {
        counts[nearest_centroid(*p, &centroids)] += 1;
    }

    let total = points.len() as f32;
    let mut entries: Vec<([f32; 3], f32)> = centroids
        .into_iter()
        .zip(&counts)
        .filter(|&(_, &n)| n > 0)
        .map(|(c, &n)| (c, n as f32 / total))
        .collect();

    merge_near_duplicates(&mut entries);

    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let palette: Vec<PaletteEntry> = entries
        .into_iter()
        .enumerate()
        .map(|(index, (c, weight))| PaletteEntry {
            rgb: [
                c[0].round().clamp(0.0, 255.0) as u8,
                c[1].round().clamp(0.0, 255.0) as u8,
                c[2].round().clamp(0.0, 255.0) as u8,
            ],
            weight,
            index,
        })
        .collect();

    if palette.is_empty() {
        return fallback_palette();
    }
    debug!(colors = palette.len(), "palette built");
    palette
}

/// K-means++ seeding: first centroid random, each subsequent one drawn
/// with probability proportional to squared distance from the nearest
/// existing centroid.
fn seed_centroids(points: &[[f32; 3]], k: usize, rng: &mut StdRng) -> Vec<[f32; 3]> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.random_range(0..points.len())]);

    let mut dist_sq: Vec<f32> = points
        .iter()
        .map(|&p| color_distance_sq(p, centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f32 = dist_sq.iter().sum();
        if total <= f32::EPSILON {
            // All points coincide with an existing centroid.
            break;
        }
        let mut target = rng.random::<f32>() * total;
        let mut chosen = points.len() - 1;
        for (i, &d) in dist_sq.iter().enumerate() {
            target -= d;
            if target <= 0.0 {
                chosen = i;
                break;
            }
        }
        let c = points[chosen];
        centroids.push(c);
        for (i, &p) in points.iter().enumerate() {
            dist_sq[i] = dist_sq[i].min(color_distance_sq(p, c));
        }
    }
    centroids
}

fn nearest_centroid(p: [f32; 3], centroids: &[[f32; 3]]) -> usize {
    let mut best = 0;
    let mut best_d = f32::INFINITY;
    for (i, &c) in centroids.iter().enumerate() {
        let d = color_distance_sq(p, c);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

/// Collapse centroids closer than [`MERGE_THRESHOLD`], summing weights
/// into the heavier entry.
fn merge_near_duplicates(entries: &mut Vec<([f32; 3], f32)>) {
    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut merged: Vec<([f32; 3], f32)> = Vec::with_capacity(entries.len());
    for &(c, w) in entries.iter() {
        match merged
            .iter_mut()
            .find(|(m, _)| color_distance_sq(*m, c).sqrt() < MERGE_THRESHOLD)
        {
            Some((_, mw)) => *mw += w,
            None => merged.push((c, w)),
        }
    }
    *entries = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sample_yields_fallback() {
        let palette = quantize(&[], 5, Some(1));
        assert_eq!(palette.len(), 3);
        assert_eq!(palette[0].rgb, [0, 0, 0]);
    }

    #[test]
    fn uniform_sample_yields_single_color() {
        let samples = vec![[200, 10, 10]; 500];
        let palette = quantize(&samples, 5, Some(42));
        assert_eq!(palette.len(), 1);
        assert_eq!(palette[0].rgb, [200, 10, 10]);
        assert!((palette[0].weight - 1.0).abs() < 1e-6);
    }

    #[test]
    fn two_well_separated_colors() {
        let mut samples = vec![[255, 0, 0]; 300];
        samples.extend(vec![[0, 0, 255]; 100]);
        let palette = quantize(&samples, 4, Some(42));
        assert_eq!(palette.len(), 2);
        // Heavier cluster sorts first.
        assert!(palette[0].weight > palette[1].weight);
        assert_eq!(palette[0].rgb, [255, 0, 0]);
        assert_eq!(palette[0].index, 0);
        assert_eq!(palette[1].index, 1);
    }

    #[test]
    fn seeded_runs_are_deterministic() {
        let mut samples = Vec::new();
        for i in 0..1000u32 {
            samples.push([(i % 256) as u8, ((i * 7) % 256) as u8, ((i * 13) % 256) as u8]);
        }
        let a = quantize(&samples, 6, Some(9));
        let b = quantize(&samples, 6, Some(9));
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.rgb, y.rgb);
        }
    }

    #[test]
    fn near_duplicates_are_merged() {
        let mut samples = vec![[100, 100, 100]; 200];
        samples.extend(vec![[103, 101, 102]; 200]);
        let palette = quantize(&samples, 8, Some(5));
        assert_eq!(palette.len(), 1);
        assert!((palette[0].weight - 1.0).abs() < 1e-6);
    }

    #[test]
    fn palette_never_exceeds_max_colors() {
        let mut samples = Vec::new();
        for i in 0..2000u32 {
            samples.push([(i % 256) as u8, ((i / 8) % 256) as u8, ((i / 64) % 256) as u8]);
        }
        let palette = quantize(&samples, 3, Some(11));
        assert!(palette.len() <= 3);
        assert!(!palette.is_empty());
    }
}
