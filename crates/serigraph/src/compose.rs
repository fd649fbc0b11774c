//! Layer composition: fitted paths grouped by color into z-ordered
//! planes with a fill discipline.
//!
//! Layers are ordered darkest ink first so lighter passes print on
//! top. Abutting fill contracts each path slightly and fills `evenodd`
//! so adjacent inks meet without overlap; overlapping fill expands
//! paths with `nonzero` fill instead.

use tracing::{debug, warn};

use crate::config::{FillMethod, LayerOrder, TraceConfig};
use crate::types::{BezierPath, BezierSubpath, FillRule, Layer, PaletteEntry, PathSegment};

/// How far paths contract (abutting) or expand (overlapping), px.
const FILL_OFFSET: f32 = 0.25;

/// Command count above which a path is dropped from its layer.
const MAX_PATH_COMMANDS: usize = 10_000;

/// Group fitted paths into per-color layers.
pub fn compose_layers(
    paths: Vec<BezierPath>,
    palette: &[PaletteEntry],
    config: &TraceConfig,
) -> Vec<Layer> {
    // Arena keyed by palette index, not by color strings.
    let mut groups: Vec<Vec<BezierPath>> = vec![Vec::new(); palette.len()];
    for path in paths {
        if let Some(group) = groups.get_mut(path.palette_index) {
            group.push(path);
        }
    }

    let (fill_rule, offset) = match config.fill_method {
        FillMethod::Abutting => (FillRule::EvenOdd, -FILL_OFFSET),
        FillMethod::Overlapping => (FillRule::NonZero, FILL_OFFSET),
    };

    let mut layers: Vec<Layer> = Vec::new();
    for (index, mut group) in groups.into_iter().enumerate() {
        if group.is_empty() {
            continue;
        }

        // Largest shapes first, then cap renderer cost.
        group.sort_by(|a, b| b.area.partial_cmp(&a.area).unwrap_or(std::cmp::Ordering::Equal));
        let before = group.len();
        group.retain(|p| p.command_count() <= MAX_PATH_COMMANDS);
        let over_commands = before - group.len();

        let mut dropped_paths = over_commands;
        if group.len() > config.max_paths_per_layer {
            dropped_paths += group.len() - config.max_paths_per_layer;
            group.truncate(config.max_paths_per_layer);
        }
        if dropped_paths > 0 {
            warn!(
                palette_index = index,
                dropped_paths, "path caps exceeded, tail dropped"
            );
        }

        let paths = group
            .into_iter()
            .map(|p| offset_path(p, offset))
            .collect();

        layers.push(Layer {
            color: palette[index].rgb,
            z_index: 0,
            paths,
            fill_rule,
            dropped_paths,
        });
    }

    order_layers(&mut layers, config.layer_order);
    debug!(layers = layers.len(), "layer composition done");
    layers
}

/// Assign z-indices by luminance and sort bottom-first.
fn order_layers(layers: &mut [Layer], order: LayerOrder) {
    layers.sort_by(|a, b| {
        let cmp = a
            .luminance()
            .partial_cmp(&b.luminance())
            .unwrap_or(std::cmp::Ordering::Equal);
        match order {
            LayerOrder::DarkToLight => cmp,
            LayerOrder::LightToDark => cmp.reverse(),
        }
    });
    for (z, layer) in layers.iter_mut().enumerate() {
        layer.z_index = z;
    }
}

/// Move every point of the path radially from its subpath centroid:
/// negative offsets contract, positive expand.
fn offset_path(path: BezierPath, offset: f32) -> BezierPath {
    if offset == 0.0 {
        return path;
    }
    let subpaths = path
        .subpaths
        .into_iter()
        .map(|sub| offset_subpath(sub, offset))
        .collect();
    BezierPath { subpaths, ..path }
}

fn offset_subpath(sub: BezierSubpath, offset: f32) -> BezierSubpath {
    let mut cx = sub.start[0];
    let mut cy = sub.start[1];
    let mut count = 1.0f32;
    for seg in &sub.segments {
        let p = seg.endpoint();
        cx += p[0];
        cy += p[1];
        count += 1.0;
    }
    let centroid = [cx / count, cy / count];

    let shift = |p: [f32; 2]| -> [f32; 2] {
        let dx = p[0] - centroid[0];
        let dy = p[1] - centroid[1];
        let len = (dx * dx + dy * dy).sqrt();
        if len <= f32::EPSILON {
            return p;
        }
        let scale = (len + offset).max(0.0) / len;
        [centroid[0] + dx * scale, centroid[1] + dy * scale]
    };

    BezierSubpath {
        start: shift(sub.start),
        segments: sub
            .segments
            .iter()
            .map(|seg| match *seg {
                PathSegment::Line { to } => PathSegment::Line { to: shift(to) },
                PathSegment::Cubic { c1, c2, to } => PathSegment::Cubic {
                    c1: shift(c1),
                    c2: shift(c2),
                    to: shift(to),
                },
            })
            .collect(),
        closed: sub.closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_path(palette_index: usize, side: f32) -> BezierPath {
        BezierPath {
            subpaths: vec![BezierSubpath {
                start: [0.0, 0.0],
                segments: vec![
                    PathSegment::Line { to: [side, 0.0] },
                    PathSegment::Line { to: [side, side] },
                    PathSegment::Line { to: [0.0, side] },
                ],
                closed: true,
            }],
            palette_index,
            max_error: 0.0,
            area: side * side,
        }
    }

    fn palette(colors: &[[u8; 3]]) -> Vec<PaletteEntry> {
        colors
            .iter()
            .enumerate()
            .map(|(index, &rgb)| PaletteEntry {
                rgb,
                weight: 1.0 / colors.len() as f32,
                index,
            })
            .collect()
    }

    #[test]
    fn layers_ordered_dark_to_light() {
        let palette = palette(&[[255, 255, 255], [0, 0, 0], [128, 128, 128]]);
        let paths = vec![square_path(0, 10.0), square_path(1, 10.0), square_path(2, 10.0)];
        let layers = compose_layers(paths, &palette, &TraceConfig::default());
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0].color, [0, 0, 0]);
        assert_eq!(layers[1].color, [128, 128, 128]);
        assert_eq!(layers[2].color, [255, 255, 255]);
        assert_eq!(layers[0].z_index, 0);
        assert_eq!(layers[2].z_index, 2);
    }

    #[test]
    fn light_to_dark_reverses_order() {
        let palette = palette(&[[255, 255, 255], [0, 0, 0]]);
        let config = TraceConfig {
            layer_order: LayerOrder::LightToDark,
            ..TraceConfig::default()
        };
        let layers = compose_layers(
            vec![square_path(0, 10.0), square_path(1, 10.0)],
            &palette,
            &config,
        );
        assert_eq!(layers[0].color, [255, 255, 255]);
    }

    #[test]
    fn abutting_contracts_and_uses_evenodd() {
        let palette = palette(&[[0, 0, 0]]);
        let layers = compose_layers(vec![square_path(0, 10.0)], &palette, &TraceConfig::default());
        assert_eq!(layers[0].fill_rule, FillRule::EvenOdd);
        let sub = &layers[0].paths[0].subpaths[0];
        // Start corner moved toward the centroid (5,5).
        assert!(sub.start[0] > 0.0 && sub.start[1] > 0.0);
        assert!(sub.start[0] < 0.5);
    }

    #[test]
    fn overlapping_expands_and_uses_nonzero() {
        let palette = palette(&[[0, 0, 0]]);
        let config = TraceConfig {
            fill_method: FillMethod::Overlapping,
            ..TraceConfig::default()
        };
        let layers = compose_layers(vec![square_path(0, 10.0)], &palette, &config);
        assert_eq!(layers[0].fill_rule, FillRule::NonZero);
        let sub = &layers[0].paths[0].subpaths[0];
        assert!(sub.start[0] < 0.0 && sub.start[1] < 0.0);
    }

    #[test]
    fn path_cap_drops_smallest_tail() {
        let palette = palette(&[[0, 0, 0]]);
        let config = TraceConfig {
            max_paths_per_layer: 2,
            ..TraceConfig::default()
        };
        let paths = vec![
            square_path(0, 5.0),
            square_path(0, 20.0),
            square_path(0, 10.0),
        ];
        let layers = compose_layers(paths, &palette, &config);
        assert_eq!(layers[0].paths.len(), 2);
        assert_eq!(layers[0].dropped_paths, 1);
        // Largest survive.
        assert!(layers[0].paths[0].area >= layers[0].paths[1].area);
        assert_eq!(layers[0].paths[1].area, 100.0);
    }

    #[test]
    fn empty_color_groups_produce_no_layer() {
        let palette = palette(&[[0, 0, 0], [255, 255, 255]]);
        let layers = compose_layers(vec![square_path(0, 10.0)], &palette, &TraceConfig::default());
        assert_eq!(layers.len(), 1);
    }
}
