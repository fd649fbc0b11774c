//! Seam stitching: rejoin contour fragments cut by tile borders.
//!
//! Open fragments of the same color whose endpoints lie within a small
//! connection threshold are merged, trying all four end-pairings and
//! taking the closest. Merging repeats to a fixed point, bounded by a
//! maximum merge count; whatever remains open afterwards is closed in
//! place so downstream stages only ever see loops.

use tracing::debug;

use crate::types::Contour;

/// Endpoint distance below which two fragments are considered the same
/// boundary cut by a seam.
pub const CONNECT_THRESHOLD: f32 = 5.0;

/// Upper bound on merges per run; guards against pathological inputs
/// cycling the fixed-point loop.
pub const MAX_MERGES: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pairing {
    EndStart,
    EndEnd,
    StartStart,
    StartEnd,
}

/// Merge seam fragments and close every contour.
pub fn stitch_contours(contours: Vec<Contour>, threshold: f32) -> Vec<Contour> {
    let (mut open, mut closed): (Vec<Contour>, Vec<Contour>) =
        contours.into_iter().partition(|c| !c.is_closed());

    let mut merges = 0usize;
    loop {
        let Some((i, j, pairing)) = best_join(&open, threshold) else {
            break;
        };
        // Remove the higher index first so the lower stays valid.
        let (a, b) = if i < j {
            let b = open.swap_remove(j);
            let a = open.swap_remove(i);
            (a, b)
        } else {
            let a = open.swap_remove(i);
            let b = open.swap_remove(j);
            (a, b)
        };
        let merged = join(a, b, pairing);
        if merged.is_closed() || endpoint_gap(&merged) <= threshold {
            let mut m = merged;
            close(&mut m);
            closed.push(m);
        } else {
            open.push(merged);
        }

        merges += 1;
        if merges >= MAX_MERGES {
            debug!(merges, "seam stitching hit merge cap");
            break;
        }
    }

    if merges > 0 {
        debug!(merges, remaining_open = open.len(), "seam stitching done");
    }

    // Anything still open gets force-closed; a fragment whose partner
    // tile failed is better emitted as a flat-edged shape than dropped.
    for mut c in open {
        close(&mut c);
        closed.push(c);
    }
    closed
}

fn endpoint_gap(c: &Contour) -> f32 {
    match (c.points.first(), c.points.last()) {
        (Some(a), Some(b)) => dist(*a, *b),
        _ => f32::INFINITY,
    }
}

fn close(c: &mut Contour) {
    if !c.is_closed() {
        if let Some(&first) = c.points.first() {
            c.points.push(first);
        }
    }
}

#[inline]
fn dist(a: [f32; 2], b: [f32; 2]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}

/// Closest joinable pair among the open fragments, if any pairing is
/// within `threshold`.
fn best_join(open: &[Contour], threshold: f32) -> Option<(usize, usize, Pairing)> {
    let mut best: Option<(usize, usize, Pairing, f32)> = None;
    for i in 0..open.len() {
        for j in (i + 1)..open.len() {
            if open[i].palette_index != open[j].palette_index {
                continue;
            }
            let (a_start, a_end) = ends(&open[i]);
            let (b_start, b_end) = ends(&open[j]);
            let candidates = [
                (Pairing::EndStart, dist(a_end, b_start)),
                (Pairing::EndEnd, dist(a_end, b_end)),
                (Pairing::StartStart, dist(a_start, b_start)),
                (Pairing::StartEnd, dist(a_start, b_end)),
            ];
            for (pairing, d) in candidates {
                if d <= threshold && best.map_or(true, |(_, _, _, bd)| d < bd) {
                    best = Some((i, j, pairing, d));
                }
            }
        }
    }
    best.map(|(i, j, p, _)| (i, j, p))
}

fn ends(c: &Contour) -> ([f32; 2], [f32; 2]) {
    (c.points[0], *c.points.last().unwrap())
}

/// Concatenate `b` onto `a` according to the chosen end-pairing.
fn join(mut a: Contour, mut b: Contour, pairing: Pairing) -> Contour {
    match pairing {
        Pairing::EndStart => {}
        Pairing::EndEnd => b.points.reverse(),
        Pairing::StartStart => {
            a.points.reverse();
        }
        Pairing::StartEnd => {
            a.points.reverse();
            b.points.reverse();
        }
    }
    a.points.extend(b.points);
    a.truncated |= b.truncated;
    // Merged contours span tiles; the origin is no longer meaningful.
    a.origin_tile = None;
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(points: Vec<[f32; 2]>, palette_index: usize) -> Contour {
        Contour {
            points,
            palette_index,
            origin_tile: None,
            truncated: false,
        }
    }

    #[test]
    fn two_fragments_join_into_one_loop() {
        // Top half and bottom half of a rectangle, cut at x=0 and x=10.
        let top = fragment(vec![[0.0, 0.0], [5.0, 0.0], [10.0, 0.0], [10.0, 1.0]], 0);
        let bottom = fragment(vec![[10.0, 2.0], [5.0, 4.0], [0.0, 4.0], [0.0, 1.0]], 0);
        let out = stitch_contours(vec![top, bottom], CONNECT_THRESHOLD);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_closed());
        assert_eq!(out[0].points.len(), 9, "8 points plus closing point");
    }

    #[test]
    fn different_colors_never_join() {
        let a = fragment(vec![[0.0, 0.0], [10.0, 0.0]], 0);
        let b = fragment(vec![[10.0, 1.0], [20.0, 1.0]], 1);
        let out = stitch_contours(vec![a, b], CONNECT_THRESHOLD);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn distant_fragments_are_closed_separately() {
        let a = fragment(vec![[0.0, 0.0], [10.0, 0.0], [10.0, 5.0]], 0);
        let b = fragment(vec![[100.0, 100.0], [110.0, 100.0], [110.0, 105.0]], 0);
        let out = stitch_contours(vec![a, b], CONNECT_THRESHOLD);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.is_closed()));
    }

    #[test]
    fn reversed_fragment_joins_via_end_end() {
        let a = fragment(vec![[0.0, 0.0], [10.0, 0.0]], 0);
        // b runs the "wrong" way: its end sits next to a's end.
        let b = fragment(vec![[0.0, 4.0], [10.0, 4.0], [10.0, 1.0]], 0);
        let out = stitch_contours(vec![a, b], CONNECT_THRESHOLD);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_closed());
    }

    #[test]
    fn closed_contours_pass_through_untouched() {
        let c = fragment(
            vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]],
            0,
        );
        let before = c.points.clone();
        let out = stitch_contours(vec![c], CONNECT_THRESHOLD);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].points, before);
    }

    #[test]
    fn chain_of_three_fragments() {
        let a = fragment(vec![[0.0, 0.0], [10.0, 0.0]], 0);
        let b = fragment(vec![[10.0, 1.0], [10.0, 10.0]], 0);
        let c = fragment(vec![[10.0, 11.0], [0.0, 11.0], [0.0, 1.0]], 0);
        let out = stitch_contours(vec![a, b, c], CONNECT_THRESHOLD);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_closed());
    }
}
