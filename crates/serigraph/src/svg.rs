//! SVG 1.1 serialization with a bounded output size.
//!
//! One `<g>` per layer carrying its fill color and fill-rule; path data
//! is rounded to a fixed decimal precision with whitespace kept
//! minimal. When the document exceeds the byte cap, an ordered
//! degradation ladder is walked: strip metadata, round harder, drop
//! the low-area path tail, and finally fall back to a single-layer
//! silhouette. Emission never fails; a placeholder document is the
//! absolute fallback.

use std::fmt::Write;

use tracing::{debug, warn};

use crate::types::{Layer, PathSegment};

/// Smallest document the emitter can produce; the configured byte cap
/// must at least cover this.
pub const PLACEHOLDER_RESERVE: usize = 256;

/// Halving passes of the tail-drop rung before the silhouette fallback.
const MAX_TAIL_DROPS: u32 = 10;

/// Result of serialization.
#[derive(Debug)]
pub struct Emitted {
    pub svg: String,
    pub degraded: bool,
    /// Paths surviving in the emitted document.
    pub path_count: usize,
}

/// One rung of the degradation ladder, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rung {
    Full,
    StripMetadata,
    Precision(usize),
    /// Keep the largest half of each layer's paths, `n` times over.
    DropTail(u32),
    Silhouette,
}

fn ladder() -> Vec<Rung> {
    let mut rungs = vec![
        Rung::Full,
        Rung::StripMetadata,
        Rung::Precision(1),
        Rung::Precision(0),
    ];
    for n in 1..=MAX_TAIL_DROPS {
        rungs.push(Rung::DropTail(n));
    }
    rungs.push(Rung::Silhouette);
    rungs
}

/// Serialize `layers`, degrading until the document fits `max_bytes`.
pub fn emit_document(layers: &[Layer], width: u32, height: u32, max_bytes: usize) -> Emitted {
    for rung in ladder() {
        let (svg, path_count) = render(layers, width, height, rung);
        if svg.len() <= max_bytes {
            let degraded = rung != Rung::Full;
            if degraded {
                debug!(?rung, bytes = svg.len(), "output fit after degradation");
            }
            return Emitted {
                svg,
                degraded,
                path_count,
            };
        }
    }

    warn!(max_bytes, "degradation ladder exhausted, emitting placeholder");
    Emitted {
        svg: placeholder(layers, width, height),
        degraded: true,
        path_count: 0,
    }
}

fn render(layers: &[Layer], width: u32, height: u32, rung: Rung) -> (String, usize) {
    let decimals = match rung {
        Rung::Full | Rung::StripMetadata => 2,
        Rung::Precision(d) => d,
        Rung::DropTail(_) | Rung::Silhouette => 0,
    };
    let with_metadata = rung == Rung::Full;

    let mut path_count = 0usize;
    let mut out = String::new();
    let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#,
    );

    if with_metadata {
        let total_paths: usize = layers.iter().map(|l| l.paths.len()).sum();
        let _ = writeln!(
            out,
            "<metadata><serigraph:trace xmlns:serigraph=\"https://serigraph.dev/ns/1\">generator=serigraph layers={} paths={}</serigraph:trace></metadata>",
            layers.len(),
            total_paths,
        );
    }

    match rung {
        Rung::Silhouette => {
            // Darkest layer only, single largest path per layer merged
            // into one maximally simplified trace.
            if let Some(layer) = layers.first() {
                let _ = writeln!(
                    out,
                    r#"<g fill="{}" fill-rule="{}">"#,
                    layer.hex(),
                    layer.fill_rule.as_svg(),
                );
                if let Some(path) = layer.paths.first() {
                    let _ = writeln!(out, r#"<path d="{}"/>"#, path_data(path, decimals));
                    path_count += 1;
                }
                let _ = writeln!(out, "</g>");
            }
        }
        _ => {
            let keep_fraction = match rung {
                Rung::DropTail(n) => 0.5f64.powi(n as i32),
                _ => 1.0,
            };
            for layer in layers {
                // Paths are already sorted largest-area first by the
                // composer, so truncation drops the low-area tail.
                let keep = ((layer.paths.len() as f64 * keep_fraction).ceil() as usize)
                    .clamp(1, layer.paths.len().max(1));
                let _ = writeln!(
                    out,
                    r#"<g fill="{}" fill-rule="{}">"#,
                    layer.hex(),
                    layer.fill_rule.as_svg(),
                );
                for path in layer.paths.iter().take(keep) {
                    let _ = writeln!(out, r#"<path d="{}"/>"#, path_data(path, decimals));
                    path_count += 1;
                }
                let _ = writeln!(out, "</g>");
            }
        }
    }

    let _ = writeln!(out, "</svg>");
    (out, path_count)
}

/// Minimal valid document: the canvas filled with the bottom layer's
/// color (black when there are no layers at all).
pub fn placeholder(layers: &[Layer], width: u32, height: u32) -> String {
    let fill = layers
        .first()
        .map(|l| l.hex())
        .unwrap_or_else(|| "#000000".to_string());
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            "\n",
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            r#"<rect width="{w}" height="{h}" fill="{fill}"/></svg>"#,
        ),
        w = width,
        h = height,
        fill = fill,
    )
}

/// Build the `d` attribute of one path element.
fn path_data(path: &crate::types::BezierPath, decimals: usize) -> String {
    let mut d = String::new();
    for sub in &path.subpaths {
        if !d.is_empty() {
            d.push(' ');
        }
        let _ = write!(
            d,
            "M{} {}",
            num(sub.start[0], decimals),
            num(sub.start[1], decimals)
        );
        for seg in &sub.segments {
            match *seg {
                PathSegment::Line { to } => {
                    let _ = write!(d, "L{} {}", num(to[0], decimals), num(to[1], decimals));
                }
                PathSegment::Cubic { c1, c2, to } => {
                    let _ = write!(
                        d,
                        "C{} {} {} {} {} {}",
                        num(c1[0], decimals),
                        num(c1[1], decimals),
                        num(c2[0], decimals),
                        num(c2[1], decimals),
                        num(to[0], decimals),
                        num(to[1], decimals),
                    );
                }
            }
        }
        if sub.closed {
            d.push('Z');
        }
    }
    d
}

/// Fixed-precision number with trailing zeros stripped.
fn num(v: f32, decimals: usize) -> String {
    let s = format!("{v:.decimals$}");
    let trimmed = if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s.as_str()
    };
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BezierPath, BezierSubpath, FillRule, Layer};

    fn layer_with_paths(n: usize) -> Layer {
        let paths = (0..n)
            .map(|i| BezierPath {
                subpaths: vec![BezierSubpath {
                    start: [i as f32, 0.0],
                    segments: vec![
                        PathSegment::Line { to: [i as f32 + 10.0, 0.0] },
                        PathSegment::Cubic {
                            c1: [i as f32 + 12.0, 3.0],
                            c2: [i as f32 + 12.0, 7.0],
                            to: [i as f32 + 10.0, 10.0],
                        },
                        PathSegment::Line { to: [i as f32, 10.0] },
                    ],
                    closed: true,
                }],
                palette_index: 0,
                max_error: 0.5,
                area: 100.0 - i as f32,
            })
            .collect();
        Layer {
            color: [10, 20, 30],
            z_index: 0,
            paths,
            fill_rule: FillRule::EvenOdd,
            dropped_paths: 0,
        }
    }

    fn assert_balanced(svg: &str) {
        assert!(svg.starts_with("<?xml"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<g ").count(), svg.matches("</g>").count());
        assert_eq!(svg.matches("<svg").count(), svg.matches("</svg>").count());
    }

    #[test]
    fn full_document_has_metadata_and_paths() {
        let layers = vec![layer_with_paths(2)];
        let out = emit_document(&layers, 100, 80, 1_000_000);
        assert!(!out.degraded);
        assert_eq!(out.path_count, 2);
        assert!(out.svg.contains("viewBox=\"0 0 100 80\""));
        assert!(out.svg.contains("<metadata>"));
        assert!(out.svg.contains("fill=\"#0a141e\""));
        assert!(out.svg.contains("fill-rule=\"evenodd\""));
        assert_balanced(&out.svg);
    }

    #[test]
    fn tight_cap_degrades_but_stays_valid() {
        let layers = vec![layer_with_paths(50)];
        let out = emit_document(&layers, 100, 80, 600);
        assert!(out.degraded);
        assert!(out.svg.len() <= 600);
        assert!(out.path_count < 50);
        assert_balanced(&out.svg);
    }

    #[test]
    fn impossible_cap_yields_placeholder() {
        let layers = vec![layer_with_paths(50)];
        let out = emit_document(&layers, 100, 80, PLACEHOLDER_RESERVE);
        assert!(out.degraded);
        assert_eq!(out.path_count, 0);
        assert!(out.svg.contains("<rect"));
        assert_balanced(&out.svg);
    }

    #[test]
    fn first_degradation_rung_strips_metadata() {
        let layers = vec![layer_with_paths(2)];
        let full = emit_document(&layers, 100, 80, 1_000_000);
        let cap = full.svg.len() - 1;
        let out = emit_document(&layers, 100, 80, cap);
        assert!(out.degraded);
        assert!(!out.svg.contains("<metadata>"));
        assert_eq!(out.path_count, 2, "paths survive metadata stripping");
    }

    #[test]
    fn number_formatting_trims_zeros() {
        assert_eq!(num(1.50, 2), "1.5");
        assert_eq!(num(2.0, 2), "2");
        assert_eq!(num(-0.004, 2), "0");
        assert_eq!(num(3.14159, 2), "3.14");
        assert_eq!(num(7.0, 0), "7");
    }

    #[test]
    fn empty_layers_still_produce_valid_document() {
        let out = emit_document(&[], 10, 10, 1_000_000);
        assert!(!out.degraded);
        assert_eq!(out.path_count, 0);
        assert_balanced(&out.svg);
    }

    #[test]
    fn placeholder_uses_bottom_layer_color() {
        let svg = placeholder(&[layer_with_paths(1)], 5, 5);
        assert!(svg.contains("#0a141e"));
        assert!(svg.len() <= PLACEHOLDER_RESERVE);
    }
}
